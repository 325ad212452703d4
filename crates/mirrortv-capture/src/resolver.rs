//! Staged window matching.
//!
//! Window titles drift while an application runs (a browser tab's title
//! follows the page), so a target that matched a moment ago may no longer
//! match exactly. Resolution walks a fixed waterfall and stops at the first
//! stage that finds anything:
//!
//! 1. exact title
//! 2. case-insensitive exact title
//! 3. title contains the target
//! 4. target contains the title
//! 5. best token overlap, if at least [`FUZZY_ACCEPT_THRESHOLD`]
//!
//! Candidates are scanned in enumeration order; ties go to the first seen.

use std::cmp::Ordering;

use tracing::{debug, instrument};

use mirrortv_ipc::WindowSuggestion;

use crate::error::CaptureError;
use crate::window::WindowCandidate;
use crate::{CaptureResult, FUZZY_ACCEPT_THRESHOLD, MAX_IGNORED_TOKEN_LEN};

/// Which waterfall stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Exact,
    CaseInsensitive,
    Contains,
    ReverseContains,
    TokenOverlap,
}

impl MatchStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case-insensitive",
            Self::Contains => "partial",
            Self::ReverseContains => "reverse partial",
            Self::TokenOverlap => "fuzzy",
        }
    }
}

/// A resolved window and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub window: WindowCandidate,
    pub stage: MatchStage,

    /// Token overlap score for [`MatchStage::TokenOverlap`], `1.0` otherwise.
    pub score: f64,
}

impl Resolution {
    fn direct(window: &WindowCandidate, stage: MatchStage) -> Self {
        Self {
            window: window.clone(),
            stage,
            score: 1.0,
        }
    }
}

/// Resolve `target` against the live `candidates`.
#[instrument(name = "resolve_window", skip(candidates), fields(candidates = candidates.len()))]
pub fn resolve(target: &str, candidates: &[WindowCandidate]) -> CaptureResult<Resolution> {
    let not_found = || CaptureError::WindowNotFound(target.to_string());

    // A blank target would "contain"-match every window.
    if candidates.is_empty() || target.trim().is_empty() {
        return Err(not_found());
    }

    let resolution = exact(target, candidates)
        .or_else(|| case_insensitive(target, candidates))
        .or_else(|| contains(target, candidates))
        .or_else(|| reverse_contains(target, candidates))
        .or_else(|| best_overlap(target, candidates))
        .ok_or_else(not_found)?;

    debug!(
        stage = resolution.stage.name(),
        score = resolution.score,
        title = %resolution.window.raw_title,
        "Window match found"
    );
    Ok(resolution)
}

fn exact(target: &str, candidates: &[WindowCandidate]) -> Option<Resolution> {
    candidates
        .iter()
        .find(|w| w.raw_title == target)
        .map(|w| Resolution::direct(w, MatchStage::Exact))
}

fn case_insensitive(target: &str, candidates: &[WindowCandidate]) -> Option<Resolution> {
    let target = target.to_lowercase();
    candidates
        .iter()
        .find(|w| w.raw_title.to_lowercase() == target)
        .map(|w| Resolution::direct(w, MatchStage::CaseInsensitive))
}

fn contains(target: &str, candidates: &[WindowCandidate]) -> Option<Resolution> {
    candidates
        .iter()
        .find(|w| w.raw_title.contains(target))
        .map(|w| Resolution::direct(w, MatchStage::Contains))
}

fn reverse_contains(target: &str, candidates: &[WindowCandidate]) -> Option<Resolution> {
    candidates
        .iter()
        .filter(|w| !w.raw_title.is_empty())
        .find(|w| target.contains(w.raw_title.as_str()))
        .map(|w| Resolution::direct(w, MatchStage::ReverseContains))
}

fn best_overlap(target: &str, candidates: &[WindowCandidate]) -> Option<Resolution> {
    let target_tokens = tokenize(target);
    let mut best: Option<(&WindowCandidate, f64)> = None;

    for window in candidates {
        let (score, _) = token_overlap(&target_tokens, &tokenize(&window.raw_title));
        let improves = best.map_or(true, |(_, best_score)| score > best_score);
        if score >= FUZZY_ACCEPT_THRESHOLD && improves {
            best = Some((window, score));
        }
    }

    best.map(|(window, score)| Resolution {
        window: window.clone(),
        stage: MatchStage::TokenOverlap,
        score,
    })
}

/// Lowercase whitespace tokens longer than [`MAX_IGNORED_TOKEN_LEN`],
/// de-duplicated in first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in text.to_lowercase().split_whitespace() {
        if token.chars().count() > MAX_IGNORED_TOKEN_LEN && !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// `|intersection| / max(|target|, |window|)` and the shared tokens.
pub fn token_overlap(target_tokens: &[String], window_tokens: &[String]) -> (f64, Vec<String>) {
    let denominator = target_tokens.len().max(window_tokens.len());
    if denominator == 0 {
        return (0.0, Vec::new());
    }

    let common: Vec<String> = target_tokens
        .iter()
        .filter(|t| window_tokens.contains(t))
        .cloned()
        .collect();

    (common.len() as f64 / denominator as f64, common)
}

/// Top `limit` windows by token overlap with `target`, zero scores dropped.
pub fn suggest(target: &str, candidates: &[WindowCandidate], limit: usize) -> Vec<WindowSuggestion> {
    let target_tokens = tokenize(target);

    let mut suggestions: Vec<WindowSuggestion> = candidates
        .iter()
        .filter_map(|window| {
            let (score, common_words) = token_overlap(&target_tokens, &tokenize(&window.raw_title));
            (score > 0.0).then(|| WindowSuggestion {
                id: window.os_id.clone(),
                title: window.raw_title.clone(),
                score,
                common_words,
            })
        })
        .collect();

    // Stable sort keeps enumeration order among equal scores.
    suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    suggestions.truncate(limit);
    suggestions
}
