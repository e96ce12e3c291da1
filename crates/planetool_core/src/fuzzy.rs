//! Fuzzy title scoring and ranking.
//!
//! Raw scores come from the skim v2 subsequence matcher and are normalized
//! onto a 0-100 scale with a ceiling that depends on the pattern length, so
//! short patterns such as `api` remain comparable with long ones.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Serialize;

pub const DEFAULT_MIN_SCORE: u8 = 60;
pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const SUBSTRING_FALLBACK_SCORE: u8 = 50;

const SHORT_PATTERN_BOOST: u64 = 30;
/// Skim points per raw point; one plain matched character is worth two.
const SKIM_POINTS_PER_RAW: i64 = 8;

/// Immutable matcher settings, passed into every search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    min_score: u8,
    max_results: usize,
}

impl MatchConfig {
    /// Out-of-range thresholds are clamped into `[0, 100]`.
    pub fn new(min_score: i64, max_results: usize) -> Self {
        Self {
            min_score: min_score.clamp(0, 100) as u8,
            max_results,
        }
    }

    pub fn min_score(&self) -> u8 {
        self.min_score
    }

    /// Caller-side truncation limit; `0` means unlimited.
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn with_min_score(self, min_score: i64) -> Self {
        Self::new(min_score, self.max_results)
    }

    pub fn with_max_results(self, max_results: usize) -> Self {
        Self {
            max_results,
            ..self
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::new(i64::from(DEFAULT_MIN_SCORE), DEFAULT_MAX_RESULTS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub candidate_index: usize,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Fuzzy,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSet {
    pub source: MatchSource,
    pub results: Vec<MatchResult>,
}

impl MatchSet {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Trimmed, lowercased pattern plus its matcher, built once per search.
struct Pattern {
    text: String,
    len: usize,
    matcher: SkimMatcherV2,
}

impl Pattern {
    fn new(raw: &str) -> Self {
        let text = raw.trim().to_lowercase();
        Self {
            len: text.chars().count(),
            text,
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn raw_score(&self, candidate: &str) -> u32 {
        if self.is_empty() {
            return 0;
        }
        self.matcher
            .fuzzy_match(&candidate.trim().to_lowercase(), &self.text)
            .map(|skim| (skim.max(0) / SKIM_POINTS_PER_RAW) as u32)
            .unwrap_or(0)
    }

    fn score(&self, candidate: &str) -> u8 {
        normalize_score(self.raw_score(candidate), self.len)
    }
}

/// Normalized 0-100 similarity of `candidate` to `pattern`.
pub fn score(pattern: &str, candidate: &str) -> u8 {
    Pattern::new(pattern).score(candidate)
}

/// Raw skim score, scaled down for [`normalize_score`]. Zero when the
/// pattern is not a case-insensitive subsequence of the candidate.
pub fn raw_score(pattern: &str, candidate: &str) -> u32 {
    Pattern::new(pattern).raw_score(candidate)
}

/// Map a raw alignment score onto 0-100 using a length-aware ceiling.
pub fn normalize_score(raw: u32, pattern_len: usize) -> u8 {
    if raw == 0 || pattern_len == 0 {
        return 0;
    }
    let len = pattern_len as u64;
    let ceiling = match pattern_len {
        0..=2 => len * 2,
        3..=4 => len * 3,
        _ => len * 4,
    };
    let mut percentage = (u64::from(raw) * 200 + ceiling) / (2 * ceiling);
    if pattern_len <= 3 && u64::from(raw) >= len {
        percentage += SHORT_PATTERN_BOOST;
    }
    percentage.min(100) as u8
}

/// Rank every candidate scoring at least `config.min_score()`.
///
/// Sorting is stable, so equal scores keep candidate order. The result is
/// never truncated; see [`limit_results`].
pub fn find_matches<S: AsRef<str>>(
    pattern: &str,
    candidates: &[S],
    config: &MatchConfig,
) -> Vec<MatchResult> {
    let pattern = Pattern::new(pattern);
    if pattern.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<MatchResult> = candidates
        .iter()
        .enumerate()
        .filter_map(|(candidate_index, candidate)| {
            let score = pattern.score(candidate.as_ref());
            (score > 0 && score >= config.min_score()).then_some(MatchResult {
                candidate_index,
                score,
            })
        })
        .collect();
    results.sort_by(|left, right| right.score.cmp(&left.score));

    tracing::debug!(
        candidates = candidates.len(),
        matched = results.len(),
        min_score = config.min_score(),
        "fuzzy search finished"
    );
    results
}

/// Case-insensitive containment hits, each scored [`SUBSTRING_FALLBACK_SCORE`].
pub fn substring_matches<S: AsRef<str>>(pattern: &str, candidates: &[S]) -> Vec<MatchResult> {
    let needle = pattern.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    candidates
        .iter()
        .enumerate()
        .filter(|(_, candidate)| candidate.as_ref().to_lowercase().contains(&needle))
        .map(|(candidate_index, _)| MatchResult {
            candidate_index,
            score: SUBSTRING_FALLBACK_SCORE,
        })
        .collect()
}

/// Fuzzy search, falling back to substring containment only when the fuzzy
/// pass accepted nothing.
pub fn find_matches_with_fallback<S: AsRef<str>>(
    pattern: &str,
    candidates: &[S],
    config: &MatchConfig,
) -> MatchSet {
    let results = find_matches(pattern, candidates, config);
    if !results.is_empty() {
        return MatchSet {
            source: MatchSource::Fuzzy,
            results,
        };
    }
    let results = substring_matches(pattern, candidates);
    if !results.is_empty() {
        tracing::debug!(matched = results.len(), "substring fallback used");
    }
    MatchSet {
        source: MatchSource::Substring,
        results,
    }
}

/// Keep the first `limit` results; `0` keeps everything.
pub fn limit_results(mut results: Vec<MatchResult>, limit: usize) -> Vec<MatchResult> {
    if limit > 0 && results.len() > limit {
        results.truncate(limit);
    }
    results
}
