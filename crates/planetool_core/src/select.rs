use std::collections::HashSet;

use serde::Serialize;

use crate::error::CoreError;
use crate::fuzzy::{MatchConfig, MatchSource, find_matches_with_fallback, limit_results};
use crate::workitem::{Candidate, WorkItem};

const AMBIGUOUS_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch<'a> {
    /// 1-based rank, as shown to the user and accepted by `--select`.
    pub position: usize,
    pub score: u8,
    pub item: &'a WorkItem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection<'a> {
    pub pattern: String,
    pub source: MatchSource,
    /// Matches accepted before any display limit was applied.
    pub total_matches: usize,
    pub matches: Vec<RankedMatch<'a>>,
}

/// Rank `items` by title against `pattern` for display, keeping at most
/// `config.max_results()` matches.
pub fn search<'a>(
    pattern: &str,
    items: &'a [WorkItem],
    config: &MatchConfig,
) -> Result<Selection<'a>, CoreError> {
    rank(pattern, items, config, config.max_results())
}

/// Rank `items` like [`search`] but keep every accepted match. Mutations
/// target this full list.
pub fn search_all<'a>(
    pattern: &str,
    items: &'a [WorkItem],
    config: &MatchConfig,
) -> Result<Selection<'a>, CoreError> {
    rank(pattern, items, config, 0)
}

fn rank<'a>(
    pattern: &str,
    items: &'a [WorkItem],
    config: &MatchConfig,
    limit: usize,
) -> Result<Selection<'a>, CoreError> {
    if pattern.trim().is_empty() {
        return Err(CoreError::validation("search pattern cannot be empty"));
    }

    let candidates: Vec<Candidate> = items.iter().map(WorkItem::candidate).collect();
    let match_set = find_matches_with_fallback(pattern, &candidates, config);
    let total_matches = match_set.results.len();
    let results = limit_results(match_set.results, limit);
    if results.is_empty() {
        return Err(CoreError::NotFound {
            pattern: pattern.to_string(),
        });
    }

    let matches = results
        .into_iter()
        .enumerate()
        .map(|(rank, result)| RankedMatch {
            position: rank + 1,
            score: result.score,
            item: &items[result.candidate_index],
        })
        .collect();
    Ok(Selection {
        pattern: pattern.to_string(),
        source: match_set.source,
        total_matches,
        matches,
    })
}

impl<'a> Selection<'a> {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn used_fallback(&self) -> bool {
        self.source == MatchSource::Substring
    }

    /// Matches dropped by the display limit.
    pub fn hidden(&self) -> usize {
        self.total_matches.saturating_sub(self.matches.len())
    }

    /// Keep the matches named by a `1,3` style selection, or all of them for
    /// `all`. Ranks are renumbered after narrowing.
    pub fn narrow(self, input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("all") || trimmed.eq_ignore_ascii_case("a") {
            return Ok(self);
        }

        let picked = parse_selection(trimmed, self.matches.len());
        if picked.is_empty() {
            return Err(CoreError::validation(format!(
                "no valid selections in '{trimmed}' (choose 1-{})",
                self.matches.len()
            )));
        }

        let mut slots: Vec<Option<RankedMatch<'a>>> =
            self.matches.into_iter().map(Some).collect();
        let matches: Vec<RankedMatch<'a>> = picked
            .into_iter()
            .filter_map(|position| slots[position - 1].take())
            .enumerate()
            .map(|(rank, mut ranked)| {
                ranked.position = rank + 1;
                ranked
            })
            .collect();
        Ok(Self {
            pattern: self.pattern,
            source: self.source,
            total_matches: matches.len(),
            matches,
        })
    }

    /// Refuse more than one match unless `all` confirms every one of them.
    pub fn require_single(self, all: bool) -> Result<Self, CoreError> {
        if all || self.matches.len() <= 1 {
            return Ok(self);
        }
        let listed: Vec<String> = self
            .matches
            .iter()
            .map(|ranked| {
                format!(
                    "{}. {} (score {})",
                    ranked.position,
                    ranked.item.label(AMBIGUOUS_TITLE_CHARS),
                    ranked.score
                )
            })
            .collect();
        Err(CoreError::validation(format!(
            "'{}' matched {} work items: {}",
            self.pattern,
            self.matches.len(),
            listed.join("; ")
        )))
    }

    /// Owned copies of the selected items, in rank order.
    pub fn into_targets(self) -> Vec<WorkItem> {
        self.matches
            .into_iter()
            .map(|ranked| ranked.item.clone())
            .collect()
    }
}

/// Parse `1,3, 5` into 1-based positions within `1..=max`.
///
/// Non-numeric and out-of-range entries are ignored and duplicates collapse;
/// input order is kept.
pub fn parse_selection(input: &str, max: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    input
        .split(',')
        .filter_map(|part| part.trim().parse::<usize>().ok())
        .filter(|position| (1..=max).contains(position))
        .filter(|position| seen.insert(*position))
        .collect()
}

/// Find a work item by exact id, or by a `PROJ-12` identifier whose prefix
/// names the snapshot's project.
pub fn find_by_id<'a>(
    items: &'a [WorkItem],
    project: Option<&str>,
    id: &str,
) -> Option<&'a WorkItem> {
    let id = id.trim();
    if let Some(item) = items.iter().find(|item| item.id == id) {
        return Some(item);
    }
    let sequence = parse_sequence_identifier(id, project?)?;
    items.iter().find(|item| item.sequence_id == sequence)
}

/// `PROJ-12` -> `12`. Sequence numbers start at 1; `0` is the unset default.
fn parse_sequence_identifier(id: &str, project: &str) -> Option<u64> {
    let (identifier, number) = id.rsplit_once('-')?;
    if identifier.is_empty() || !identifier.eq_ignore_ascii_case(project.trim()) {
        return None;
    }
    number.parse::<u64>().ok().filter(|sequence| *sequence > 0)
}
