//! Add / replace / clear semantics for list-valued work item fields.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::payload::FieldChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    Add,
    Replace,
    Clear,
}

impl MergeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "replace" => Ok(Self::Replace),
            "clear" => Ok(Self::Clear),
            other => Err(CoreError::validation(format!(
                "unknown merge mode '{other}' (expected add, replace or clear)"
            ))),
        }
    }
}

/// Drop repeated values, keeping the first occurrence of each.
pub fn dedupe<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(AsRef::as_ref)
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

pub fn merge<S: AsRef<str>, T: AsRef<str>>(
    mode: MergeMode,
    incoming: &[S],
    existing: &[T],
) -> Vec<String> {
    match mode {
        MergeMode::Add => {
            let mut seen = HashSet::new();
            existing
                .iter()
                .map(AsRef::as_ref)
                .chain(incoming.iter().map(AsRef::as_ref))
                .filter(|value| seen.insert(*value))
                .map(str::to_string)
                .collect()
        }
        MergeMode::Replace => dedupe(incoming),
        MergeMode::Clear => Vec::new(),
    }
}

/// Ordered union of several lists: list order first, then member order.
pub fn union_all<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        for value in list {
            if seen.insert(value.as_str()) {
                out.push(value.clone());
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalFieldValue {
    pub target_id: String,
    pub value: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedField {
    /// Change carried by the batch payload; identical for every target.
    pub change: FieldChange<Vec<String>>,
    pub per_target: Vec<FinalFieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub mode: MergeMode,
    pub incoming: Vec<String>,
    pub existing_per_target: Vec<(String, Vec<String>)>,
}

impl MergeRequest {
    pub fn new(mode: MergeMode, incoming: Vec<String>) -> Self {
        Self {
            mode,
            incoming,
            existing_per_target: Vec::new(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>, existing: Vec<String>) -> Self {
        self.existing_per_target.push((target_id.into(), existing));
        self
    }

    /// Union of every target's current value, in batch order.
    pub fn batch_existing(&self) -> Vec<String> {
        union_all(
            self.existing_per_target
                .iter()
                .map(|(_, existing)| existing.as_slice()),
        )
    }

    /// Compute the single final set applied to every target in the batch.
    ///
    /// `Add` and `Replace` with nothing incoming leave the field untouched;
    /// only `Clear` produces an explicit empty value.
    pub fn resolve(self) -> MergedField {
        let change = match self.mode {
            MergeMode::Clear => FieldChange::Clear,
            _ if self.incoming.is_empty() => FieldChange::Keep,
            mode => FieldChange::Set(merge(mode, &self.incoming, &self.batch_existing())),
        };
        let per_target = self
            .existing_per_target
            .into_iter()
            .map(|(target_id, existing)| FinalFieldValue {
                value: match &change {
                    FieldChange::Keep => existing,
                    FieldChange::Clear => Vec::new(),
                    FieldChange::Set(value) => value.clone(),
                },
                target_id,
            })
            .collect();
        MergedField { change, per_target }
    }
}
