//! Facilitator output schema.
//!
//! The facilitator is asked for a JSON object with a round summary,
//! surfaced disagreements, a proposed patch to the emerging proposal and
//! the next focus. Parsing is lenient about surrounding prose but strict
//! about the required fields; field-level caps are enforced on the way in.

use crate::util::truncate_str;
use crate::vote::parsing::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ROUND_SUMMARY_MAX_CHARS: usize = 2_000;
const PROPOSED_PATCH_MAX_CHARS: usize = 4_000;
const DISAGREEMENTS_MAX: usize = 3;
const NEXT_FOCUS_MAX: usize = 2;

/// Structured facilitator output for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorOutput {
    pub round_summary: String,
    pub disagreements: Vec<String>,
    pub proposed_patch: String,
    pub next_focus: Vec<String>,
}

impl FacilitatorOutput {
    /// Parse a provider response; `None` when the response carries no
    /// usable JSON object or misses required fields.
    pub fn parse(response: &str) -> Option<Self> {
        let json = extract_json_object(response)?;

        let round_summary = json.get("round_summary").and_then(Value::as_str)?;
        let proposed_patch = json
            .get("proposed_patch")
            .and_then(Value::as_str)
            .unwrap_or("");
        let disagreements = string_list(&json, "disagreements", DISAGREEMENTS_MAX);
        let next_focus = string_list(&json, "next_focus", NEXT_FOCUS_MAX);

        Some(Self {
            round_summary: truncate_str(round_summary, ROUND_SUMMARY_MAX_CHARS).to_string(),
            disagreements,
            proposed_patch: truncate_str(proposed_patch, PROPOSED_PATCH_MAX_CHARS).to_string(),
            next_focus,
        })
    }

    /// Render as the markdown body of the facilitator's system message:
    /// round summary, then disagreements, then the proposed patch, then the
    /// next focus.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("## Round summary\n\n{}\n", self.round_summary);

        if !self.disagreements.is_empty() {
            out.push_str("\n## Disagreements\n\n");
            for item in &self.disagreements {
                out.push_str(&format!("- {}\n", item));
            }
        }

        if !self.proposed_patch.is_empty() {
            out.push_str(&format!("\n## Proposed patch\n\n{}\n", self.proposed_patch));
        }

        if !self.next_focus.is_empty() {
            out.push_str("\n## Next focus\n\n");
            for item in &self.next_focus {
                out.push_str(&format!("- {}\n", item));
            }
        }

        out
    }
}

fn string_list(json: &Value, key: &str, cap: usize) -> Vec<String> {
    json.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .take(cap)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
