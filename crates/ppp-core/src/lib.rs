//! Core person-profile model for PPP.
//!
//! Every field is optional. Model output is untrusted, so deserialization
//! coerces missing, `null` or mistyped fields to their defaults instead of
//! failing.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "ppp-core";

pub const EVENT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkExperience {
    #[serde(deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub company: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    #[serde(deserialize_with = "lenient::text")]
    pub degree: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub institution: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Publication {
    #[serde(deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub year: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub date: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub event_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub importance: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub related_people: Vec<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub related_organizations: Vec<String>,
}

impl Event {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), EVENT_DATE_FORMAT).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Key,
    Recent,
    Upcoming,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [Self::Key, Self::Recent, Self::Upcoming];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Recent => "recent",
            Self::Upcoming => "upcoming",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event category `{0}` (expected key, recent or upcoming)")]
pub struct UnknownEventCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownEventCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" => Ok(Self::Key),
            "recent" => Ok(Self::Recent),
            "upcoming" => Ok(Self::Upcoming),
            _ => Err(UnknownEventCategory(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("profile payload must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("profile payload could not be decoded: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonProfile {
    #[serde(deserialize_with = "lenient::text")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub professional_headline: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub current_role: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub company: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub location: Option<String>,

    #[serde(deserialize_with = "lenient::object_list")]
    pub work_experience: Vec<WorkExperience>,
    #[serde(deserialize_with = "lenient::object_list")]
    pub education: Vec<Education>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub skills: Vec<String>,

    #[serde(deserialize_with = "lenient::text_map")]
    pub social_profiles: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub websites: Vec<String>,

    #[serde(deserialize_with = "lenient::object_list")]
    pub publications: Vec<Publication>,
    #[serde(deserialize_with = "lenient::object_list")]
    pub speaking_engagements: Vec<Event>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub interests: Vec<String>,

    #[serde(deserialize_with = "lenient::text_list")]
    pub achievements: Vec<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub certifications: Vec<String>,

    #[serde(deserialize_with = "lenient::text_list")]
    pub languages: Vec<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub interesting_facts: Vec<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub key_topics: Vec<String>,

    #[serde(deserialize_with = "lenient::text_list")]
    pub collaborations: Vec<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub organizations: Vec<String>,

    #[serde(deserialize_with = "lenient::object_list")]
    pub key_events: Vec<Event>,
    /// Activity within roughly the last six months.
    #[serde(deserialize_with = "lenient::object_list")]
    pub recent_events: Vec<Event>,
    #[serde(deserialize_with = "lenient::object_list")]
    pub upcoming_events: Vec<Event>,

    #[serde(deserialize_with = "lenient::text")]
    pub last_known_activity_date: Option<String>,

    #[serde(deserialize_with = "lenient::text_list")]
    pub data_sources: Vec<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub last_updated: Option<String>,
}

impl PersonProfile {
    /// Build a profile from untrusted model output.
    ///
    /// Only a non-object payload is rejected; every field inside an object is
    /// coerced to its default when missing or mistyped.
    pub fn from_json_value(value: JsonValue) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::NotAnObject {
                found: json_kind(&value),
            });
        }
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ValidationError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_json_value(value)
    }

    /// True when anything beyond provenance and `last_updated` is known.
    pub fn has_content(&self) -> bool {
        let mut bare = self.clone();
        bare.data_sources.clear();
        bare.last_updated = None;
        bare != Self::default()
    }

    pub fn events(&self, category: EventCategory) -> &[Event] {
        match category {
            EventCategory::Key => &self.key_events,
            EventCategory::Recent => &self.recent_events,
            EventCategory::Upcoming => &self.upcoming_events,
        }
    }

    fn events_mut(&mut self, category: EventCategory) -> &mut Vec<Event> {
        match category {
            EventCategory::Key => &mut self.key_events,
            EventCategory::Recent => &mut self.recent_events,
            EventCategory::Upcoming => &mut self.upcoming_events,
        }
    }

    pub fn add_event(&mut self, event: Event, category: EventCategory) {
        self.events_mut(category).push(event);
    }

    /// Sort each event list by date, most recent first.
    ///
    /// Events with a missing or unparsable date rank ahead of every dated
    /// event. The sort is stable.
    pub fn sort_events(&mut self) {
        for category in EventCategory::ALL {
            self.events_mut(category).sort_by_key(event_sort_key);
        }
    }
}

fn event_sort_key(event: &Event) -> (bool, Reverse<Option<NaiveDate>>) {
    let date = event.parsed_date();
    (date.is_some(), Reverse(date))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

mod lenient {
    use std::collections::BTreeMap;

    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value as JsonValue;

    fn scalar_text(value: JsonValue) -> Option<String> {
        match value {
            JsonValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(scalar_text(JsonValue::deserialize(deserializer)?))
    }

    pub fn text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match JsonValue::deserialize(deserializer)? {
            JsonValue::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
            other => scalar_text(other).into_iter().collect(),
        })
    }

    pub fn text_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match JsonValue::deserialize(deserializer)? {
            JsonValue::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| scalar_text(v).map(|v| (k, v)))
                .collect(),
            _ => BTreeMap::new(),
        })
    }

    /// A bare object is treated as a one-element list.
    pub fn object_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let items = match JsonValue::deserialize(deserializer)? {
            JsonValue::Array(items) => items,
            obj @ JsonValue::Object(_) => vec![obj],
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter(JsonValue::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }
}
