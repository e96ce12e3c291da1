use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    /// Accepts names in any case and the numeric levels `0..=3`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" | "0" => Ok(Self::Urgent),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            "none" => Ok(Self::None),
            other => Err(CoreError::validation(format!(
                "unknown priority '{other}' (expected urgent, high, medium, low or none)"
            ))),
        }
    }
}

/// A searchable record: the id plus the title the matcher scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.title
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sequence_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "deserialize_estimate",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimate_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sequence_id: 0,
            description_html: None,
            state: None,
            priority: Priority::None,
            assignees: Vec::new(),
            labels: Vec::new(),
            start_date: None,
            target_date: None,
            estimate_point: None,
            module: None,
            cycle: None,
            parent: None,
        }
    }

    pub fn candidate(&self) -> Candidate {
        Candidate {
            id: self.id.clone(),
            title: self.name.clone(),
        }
    }

    /// `[12] Title`, truncated for one-line listings.
    pub fn label(&self, max_title_chars: usize) -> String {
        format!("[{}] {}", self.sequence_id, truncate(&self.name, max_title_chars))
    }
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 3 {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EstimateRepr {
    Number(f64),
    Text(String),
}

// The API reports estimates either as numbers or as numeric strings.
fn deserialize_estimate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<EstimateRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(EstimateRepr::Number(value)) => Ok(Some(value)),
        Some(EstimateRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(EstimateRepr::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
