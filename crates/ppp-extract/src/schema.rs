//! JSON schema for [`ppp_core::PersonProfile`], sent with every completion request.

use serde_json::{json, Value};

pub const PERSON_PROFILE_SCHEMA_NAME: &str = "person_profile";

fn text(description: &str) -> Value {
    json!({ "type": ["string", "null"], "description": description })
}

fn text_list(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn object_list(item: Value, description: &str) -> Value {
    json!({ "type": "array", "items": item, "description": description })
}

fn object(properties: Value) -> Value {
    json!({ "type": "object", "properties": properties, "additionalProperties": false })
}

fn work_experience_schema() -> Value {
    object(json!({
        "title": text("Job title"),
        "company": text("Employer"),
        "description": text("What the role involved"),
        "duration": text("Time span, e.g. 2019-2022"),
    }))
}

fn education_schema() -> Value {
    object(json!({
        "degree": text("Degree or qualification"),
        "institution": text("School or university"),
        "year": text("Graduation year"),
    }))
}

fn publication_schema() -> Value {
    object(json!({
        "title": text("Title of the article, paper or book"),
        "year": text("Publication year"),
        "description": text("Short summary"),
    }))
}

fn event_schema() -> Value {
    object(json!({
        "title": text("Event title"),
        "description": text("What happened"),
        "date": text("Date as YYYY-MM-DD"),
        "event_type": text("professional, personal or achievement"),
        "importance": text("high, medium or low"),
        "url": text("Link with more information"),
        "related_people": text_list("People involved"),
        "related_organizations": text_list("Organizations involved"),
    }))
}

pub fn person_profile_schema() -> Value {
    object(json!({
        "full_name": text("Full name of the person"),
        "professional_headline": text("Professional title or headline"),
        "current_role": text("Current job role"),
        "company": text("Current company"),
        "location": text("Geographic location"),
        "work_experience": object_list(work_experience_schema(), "Work history"),
        "education": object_list(education_schema(), "Educational background"),
        "skills": text_list("Professional skills and expertise"),
        "social_profiles": {
            "type": "object",
            "additionalProperties": { "type": "string" },
            "description": "Social media profiles keyed by platform name"
        },
        "websites": text_list("Personal or professional websites"),
        "publications": object_list(publication_schema(), "Articles, papers or other publications"),
        "speaking_engagements": object_list(event_schema(), "Talks and presentations"),
        "interests": text_list("Professional and personal interests"),
        "achievements": text_list("Notable achievements and awards"),
        "certifications": text_list("Professional certifications"),
        "languages": text_list("Languages spoken"),
        "interesting_facts": text_list("Interesting or unusual facts about the person"),
        "key_topics": text_list("Topics or themes the person focuses on"),
        "collaborations": text_list("Notable collaborations or partnerships"),
        "organizations": text_list("Professional organizations or memberships"),
        "key_events": object_list(event_schema(), "Significant events in the person's career or life"),
        "recent_events": object_list(event_schema(), "Events from roughly the last six months"),
        "upcoming_events": object_list(event_schema(), "Scheduled future events or announced plans"),
        "last_known_activity_date": text("Date of the most recent known activity"),
        "data_sources": text_list("Sources of the information"),
        "last_updated": text("When this profile was last updated"),
    }))
}
