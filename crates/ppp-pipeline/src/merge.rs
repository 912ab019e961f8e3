//! Reduction of candidate profiles into one.

use std::collections::HashSet;

use ppp_core::PersonProfile;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeStrategy {
    DedupUnion,
    LastWriterWins,
    Concatenate,
    FirstWins,
}

/// Strategy for every [`PersonProfile`] field. A new field must be added here
/// and to [`merge_profiles`] before it ships.
pub const FIELD_STRATEGIES: &[(&str, MergeStrategy)] = &[
    ("full_name", MergeStrategy::FirstWins),
    ("professional_headline", MergeStrategy::FirstWins),
    ("current_role", MergeStrategy::FirstWins),
    ("company", MergeStrategy::FirstWins),
    ("location", MergeStrategy::FirstWins),
    ("work_experience", MergeStrategy::Concatenate),
    ("education", MergeStrategy::Concatenate),
    ("skills", MergeStrategy::DedupUnion),
    ("social_profiles", MergeStrategy::LastWriterWins),
    ("websites", MergeStrategy::DedupUnion),
    ("publications", MergeStrategy::Concatenate),
    ("speaking_engagements", MergeStrategy::Concatenate),
    ("interests", MergeStrategy::DedupUnion),
    ("achievements", MergeStrategy::DedupUnion),
    ("certifications", MergeStrategy::DedupUnion),
    ("languages", MergeStrategy::DedupUnion),
    ("interesting_facts", MergeStrategy::DedupUnion),
    ("key_topics", MergeStrategy::DedupUnion),
    ("collaborations", MergeStrategy::DedupUnion),
    ("organizations", MergeStrategy::DedupUnion),
    ("key_events", MergeStrategy::Concatenate),
    ("recent_events", MergeStrategy::Concatenate),
    ("upcoming_events", MergeStrategy::Concatenate),
    ("last_known_activity_date", MergeStrategy::FirstWins),
    ("data_sources", MergeStrategy::DedupUnion),
    ("last_updated", MergeStrategy::FirstWins),
];

pub fn strategy_for(field: &str) -> Option<MergeStrategy> {
    FIELD_STRATEGIES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, strategy)| *strategy)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn first_wins(acc: &mut Option<String>, incoming: &Option<String>) {
    if is_blank(acc) && !is_blank(incoming) {
        acc.clone_from(incoming);
    }
}

fn dedup_union(acc: &mut Vec<String>, incoming: &[String]) {
    let mut seen: HashSet<&str> = HashSet::with_capacity(acc.len() + incoming.len());
    let union: Vec<String> = acc
        .iter()
        .chain(incoming)
        .filter(|value| seen.insert(value.as_str()))
        .cloned()
        .collect();
    *acc = union;
}

fn fold_into(merged: &mut PersonProfile, profile: &PersonProfile) {
    dedup_union(&mut merged.skills, &profile.skills);
    dedup_union(&mut merged.interests, &profile.interests);
    dedup_union(&mut merged.achievements, &profile.achievements);
    dedup_union(&mut merged.certifications, &profile.certifications);
    dedup_union(&mut merged.languages, &profile.languages);
    dedup_union(&mut merged.interesting_facts, &profile.interesting_facts);
    dedup_union(&mut merged.key_topics, &profile.key_topics);
    dedup_union(&mut merged.collaborations, &profile.collaborations);
    dedup_union(&mut merged.organizations, &profile.organizations);
    dedup_union(&mut merged.websites, &profile.websites);

    merged.social_profiles.extend(
        profile
            .social_profiles
            .iter()
            .map(|(platform, url)| (platform.clone(), url.clone())),
    );

    merged.work_experience.extend_from_slice(&profile.work_experience);
    merged.education.extend_from_slice(&profile.education);
    merged.publications.extend_from_slice(&profile.publications);
    merged.speaking_engagements.extend_from_slice(&profile.speaking_engagements);
    merged.key_events.extend_from_slice(&profile.key_events);
    merged.recent_events.extend_from_slice(&profile.recent_events);
    merged.upcoming_events.extend_from_slice(&profile.upcoming_events);

    first_wins(&mut merged.full_name, &profile.full_name);
    first_wins(&mut merged.professional_headline, &profile.professional_headline);
    first_wins(&mut merged.current_role, &profile.current_role);
    first_wins(&mut merged.company, &profile.company);
    first_wins(&mut merged.location, &profile.location);
    first_wins(&mut merged.last_known_activity_date, &profile.last_known_activity_date);
    first_wins(&mut merged.last_updated, &profile.last_updated);

    dedup_union(&mut merged.data_sources, &profile.data_sources);
}

/// Merge candidates left to right into a new profile.
///
/// Inputs are only read. An empty slice gives the default profile and a
/// single candidate comes back as an equal copy.
pub fn merge_profiles(profiles: &[PersonProfile]) -> PersonProfile {
    let Some((first, rest)) = profiles.split_first() else {
        return PersonProfile::default();
    };
    let mut merged = first.clone();
    for profile in rest {
        fold_into(&mut merged, profile);
    }
    merged
}
