//! Recall — turn a free-text prompt into ranked candidate entities.
//!
//! Pipeline: scrub the prompt (markup tags, fenced code, brace blobs, URLs),
//! tokenize and drop stopwords/short tokens, expand into bigrams and
//! concatenated compounds, query the lexical index per term, then score each
//! candidate against the full term set. Scoring is a deterministic heuristic
//! over the entity *name* — a candidate whose only overlap with the prompt is
//! in its summary is never surfaced, even though the index matched it.
//!
//! The per-term index queries run sequentially on purpose: each is a bounded,
//! indexed lookup and the term set is capped, so the latency cost is small
//! and the component stays single-threaded.

use std::collections::HashSet;

use tracing::debug;

use crate::error::AppError;
use crate::store::GraphStore;
use crate::types::GraphSearchResult;

/// Prompts shorter than this skip recall entirely.
const MIN_PROMPT_CHARS: usize = 5;
/// Tokens of this length or shorter are discarded.
const MAX_DISCARD_TOKEN_LEN: usize = 2;
/// Cap on the merged term set per prompt.
const MAX_TERMS: usize = 10;
/// Index hits collected per term.
const RESULTS_PER_TERM: usize = 3;
/// Minimum length for a term to participate in partial name matching.
const PARTIAL_MIN_TERM_LEN: usize = 5;
/// Candidates scoring below this are dropped.
const MIN_SCORE: f64 = 3.0;

/// Common function/filler words excluded from term extraction.
const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
    "any", "are", "aren't", "as", "at", "be", "because", "been", "before", "being",
    "below", "between", "both", "but", "by", "can", "can't", "cannot", "could",
    "couldn't", "did", "didn't", "do", "does", "doesn't", "doing", "don't", "down",
    "during", "each", "few", "for", "from", "further", "get", "got", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i'm", "i've", "if", "in", "into",
    "is", "isn't", "it", "it's", "its", "itself", "just", "know", "let", "like",
    "make", "me", "more", "most", "mustn't", "my", "myself", "need", "no", "nor",
    "not", "now", "of", "off", "on", "once", "only", "or", "other", "ought", "our",
    "ours", "ourselves", "out", "over", "own", "please", "same", "shan't", "she",
    "should", "shouldn't", "so", "some", "such", "than", "that", "that's", "the",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they",
    "they're", "this", "those", "through", "to", "too", "under", "until", "up",
    "use", "very", "want", "was", "wasn't", "we", "we're", "were", "weren't",
    "what", "what's", "when", "where", "which", "while", "who", "who's", "whom",
    "why", "will", "with", "won't", "would", "wouldn't", "you", "you're", "your",
    "yours", "yourself", "yourselves",
];

/// Extract up to [`MAX_TERMS`] search terms from a prompt.
///
/// Returns terms in priority order: concatenated compounds first, then
/// space-joined bigrams, then single tokens. Empty when the prompt is under
/// [`MIN_PROMPT_CHARS`] characters or yields no usable tokens.
pub fn extract_terms(prompt: &str) -> Vec<String> {
    if prompt.trim().chars().count() < MIN_PROMPT_CHARS {
        return Vec::new();
    }

    let scrubbed = scrub(prompt);
    let tokens: Vec<String> = scrubbed
        .to_lowercase()
        .split_whitespace()
        .filter(|tok| !is_url(tok))
        .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|tok| tok.chars().count() > MAX_DISCARD_TOKEN_LEN)
        .filter(|tok| !STOPWORDS.contains(&tok.as_str()))
        .collect();

    // Compounds match entity names written as one word from two spoken words;
    // bigrams match multi-word names directly.
    let compounds = tokens.windows(2).map(|pair| format!("{}{}", pair[0], pair[1]));
    let bigrams = tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1]));

    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for term in compounds.chain(bigrams).chain(tokens.iter().cloned()) {
        if seen.insert(term.clone()) {
            terms.push(term);
            if terms.len() == MAX_TERMS {
                break;
            }
        }
    }
    terms
}

/// Rank entities relevant to `prompt`, capped at `max_entities`.
///
/// Results carry their heuristic score and full neighbor lists. Returns an
/// empty list when the prompt is too short to recall against.
pub fn recall_entities(
    store: &GraphStore,
    prompt: &str,
    max_entities: usize,
) -> Result<Vec<GraphSearchResult>, AppError> {
    let terms = extract_terms(prompt);
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    debug!(?terms, "recall terms extracted");

    // Collect candidates per term; first occurrence wins position.
    let mut seen_ids = HashSet::new();
    let mut candidates: Vec<GraphSearchResult> = Vec::new();
    for term in &terms {
        for result in store.search(term, RESULTS_PER_TERM)? {
            if seen_ids.insert(result.node.id) {
                candidates.push(result);
            }
        }
    }

    let mut scored: Vec<GraphSearchResult> = candidates
        .into_iter()
        .filter_map(|mut candidate| {
            let score = score_candidate(&candidate, &terms);
            if score < MIN_SCORE {
                return None;
            }
            candidate.score = Some(score);
            Some(candidate)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(max_entities);
    Ok(scored)
}

/// Score one candidate against the full term set.
///
/// Name-match rules: exact (+10), partial — term inside name (+5), reverse
/// partial — name inside term (+4). If no rule fires for any term the score
/// is forced to 0: summary-only overlap never surfaces a candidate. A small
/// connectivity bonus (`min(neighbors, 5) * 0.1`) applies only to
/// name-matched candidates.
fn score_candidate(candidate: &GraphSearchResult, terms: &[String]) -> f64 {
    let name = candidate.node.name.as_str();
    let name_len = name.chars().count();

    let mut score = 0.0;
    let mut name_matched = false;
    for term in terms {
        let term_len = term.chars().count();
        if name == term.as_str() {
            score += 10.0;
            name_matched = true;
        } else if term_len >= PARTIAL_MIN_TERM_LEN
            && name.contains(term.as_str())
            && term_len * 2 >= name_len
        {
            score += 5.0;
            name_matched = true;
        } else if term_len >= PARTIAL_MIN_TERM_LEN
            && term.contains(name)
            && name_len * 2 >= term_len
        {
            score += 4.0;
            name_matched = true;
        }
    }

    if !name_matched {
        return 0.0;
    }
    score + (candidate.neighbors.len().min(5) as f64) * 0.1
}

/// Remove markup-tag spans, fenced code blocks, and brace-delimited blobs.
fn scrub(prompt: &str) -> String {
    let without_fences = strip_fenced(prompt);
    let without_tags = strip_spans(&without_fences, '<', '>');
    strip_spans(&without_tags, '{', '}')
}

/// Drop everything between triple-backtick fences. Odd-indexed segments of a
/// ``` split are inside a fence; an unterminated fence drops the remainder.
fn strip_fenced(text: &str) -> String {
    text.split("```")
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, seg)| seg)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop spans between `open` and `close`, tracking nesting depth. A closer
/// with no matching opener is ordinary text and passes through.
fn strip_spans(text: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        if c == open {
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                out.push(' ');
            }
        } else if depth == 0 {
            out.push(c);
        }
    }
    out
}

fn is_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://") || token.starts_with("www.")
}
