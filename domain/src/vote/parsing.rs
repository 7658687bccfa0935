//! Vote response parsing.
//!
//! Providers are asked for a JSON object `{score, pass, rationale?}`, but
//! responses arrive as free text: wrapped in markdown fences, prefixed with
//! prose, or not JSON at all. Extraction scans for the outermost brace
//! window and deserializes leniently; anything unusable degrades to a
//! neutral failing ballot rather than an error, so a single malformed
//! response never stalls a vote session.

use crate::util::truncate_str;
use serde::Deserialize;
use serde_json::Value;

/// Rationale recorded when a response could not be parsed.
pub const PARSE_FAILURE_RATIONALE: &str = "Failed to parse vote response";

/// A parsed (or substituted) ballot, before it becomes a persisted vote.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoteBallot {
    pub score: u8,
    pub pass: bool,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl VoteBallot {
    /// The neutral failing ballot substituted on parse failure.
    pub fn parse_failure() -> Self {
        Self {
            score: 50,
            pass: false,
            rationale: Some(PARSE_FAILURE_RATIONALE.to_string()),
        }
    }
}

/// Parse a provider response into a ballot.
///
/// Never fails: responses without a usable JSON object yield
/// [`VoteBallot::parse_failure`]. Scores outside 0..=100 are clamped;
/// rationales are capped at 2000 bytes.
pub fn parse_vote_response(response: &str) -> VoteBallot {
    let Some(json) = extract_json_object(response) else {
        return VoteBallot::parse_failure();
    };

    let score = match json.get("score").and_then(Value::as_f64) {
        Some(s) => s.clamp(0.0, 100.0).round() as u8,
        None => return VoteBallot::parse_failure(),
    };
    let Some(pass) = json.get("pass").and_then(Value::as_bool) else {
        return VoteBallot::parse_failure();
    };
    let rationale = json
        .get("rationale")
        .and_then(Value::as_str)
        .map(|r| truncate_str(r, 2_000).to_string());

    VoteBallot {
        score,
        pass,
        rationale,
    }
}

/// Find the outermost `{...}` window in a response and parse it as JSON.
pub(crate) fn extract_json_object(response: &str) -> Option<Value> {
    let start = response.find('{')?;
    let end = response[start..].rfind('}')?;
    serde_json::from_str(&response[start..start + end + 1]).ok()
}
