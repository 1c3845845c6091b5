//! Feedback report model and the normalization applied to the model's analysis output.
//!
//! The analysis prompt asks for strict JSON, but models regularly wrap it in code
//! fences, drop fields or return scores as strings. Everything here is lenient on
//! input and strict on output: a `FeedbackReport` always has every field populated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary used when the analysis output could not be parsed at all.
pub const FALLBACK_SUMMARY: &str = "Failed to generate structured feedback. Please try again.";

/// Summary used when the interview ended before any answer was given.
pub const NO_ANSWERS_SUMMARY: &str =
    "The interview ended before any question was answered, so there is nothing to assess.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub overall_score: u8,
    pub summary: String,
    pub skills: Vec<SkillScore>,
    pub key_highlights: Vec<String>,
    pub detailed_feedback: Vec<FeedbackSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillScore {
    pub name: String,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSection {
    pub category: String,
    pub points: Vec<String>,
}

impl FeedbackReport {
    /// A zero-valued report carrying only a summary line.
    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    /// The report substituted when the model's output is unusable.
    pub fn fallback() -> Self {
        Self::empty(FALLBACK_SUMMARY)
    }

    /// Parses raw model output into a report, never failing.
    ///
    /// Code fences are stripped first. If the remaining text still isn't JSON, the
    /// outermost `{...}` block is tried before giving up and returning [`Self::fallback`].
    pub fn from_model_output(raw: &str) -> Self {
        let cleaned = strip_code_fences(raw);

        let parsed = serde_json::from_str::<Value>(&cleaned).or_else(|err| {
            match outermost_object(&cleaned) {
                Some(candidate) => serde_json::from_str::<Value>(candidate),
                None => Err(err),
            }
        });

        match parsed {
            Ok(value) if value.is_object() => Self::from_value(&value),
            Ok(other) => {
                tracing::warn!("Analysis output is JSON but not an object: {}", other);
                Self::fallback()
            }
            Err(e) => {
                tracing::warn!("Failed to parse analysis output as JSON: {}", e);
                tracing::debug!("Unparseable analysis output: {}", raw);
                Self::fallback()
            }
        }
    }

    /// Builds a report from an already-parsed JSON object, filling every gap with defaults.
    pub fn from_value(value: &Value) -> Self {
        let skills = entries(value.get("skills"))
            .filter_map(|entry| {
                let name = text(entry.get("name"));
                (!name.is_empty()).then(|| SkillScore {
                    name,
                    score: score(entry.get("score")),
                })
            })
            .collect();

        let detailed_feedback = entries(value.get("detailedFeedback"))
            .filter_map(|entry| {
                let category = text(entry.get("category"));
                (!category.is_empty()).then(|| FeedbackSection {
                    category,
                    points: strings(entry.get("points")),
                })
            })
            .collect();

        Self {
            overall_score: score(value.get("overallScore")),
            summary: text(value.get("summary")),
            skills,
            key_highlights: strings(value.get("keyHighlights")),
            detailed_feedback,
        }
    }
}

/// Removes markdown code-fence markers the model may wrap around its JSON.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

// Iterates the object entries of an array field, skipping anything else.
fn entries(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| entry.is_object())
}

fn score(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

fn text(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"{
        "overallScore": 78,
        "summary": "Solid answers with room to add metrics.",
        "skills": [
            { "name": "Communication", "score": 82 },
            { "name": "Technical Knowledge", "score": 70 },
            { "name": "Problem Solving", "score": 75 },
            { "name": "Professionalism", "score": 90 }
        ],
        "keyHighlights": ["Clear structure", "Good examples", "Calm delivery"],
        "detailedFeedback": [
            { "category": "Strengths", "points": ["Concise", "Confident"] },
            { "category": "Areas for Improvement", "points": ["Quantify impact"] }
        ]
    }"#;

    #[test]
    fn test_parses_fenced_output() {
        let raw = format!("```json\n{WELL_FORMED}\n```");
        let report = FeedbackReport::from_model_output(&raw);

        assert_eq!(report.overall_score, 78);
        assert_eq!(report.skills.len(), 4);
        assert_eq!(report.skills[0].name, "Communication");
        assert_eq!(report.key_highlights.len(), 3);
        assert_eq!(report.detailed_feedback[1].category, "Areas for Improvement");
        assert_eq!(report.detailed_feedback[1].points, vec!["Quantify impact"]);
    }

    #[test]
    fn test_repairs_output_wrapped_in_prose() {
        let raw = format!("Here is the analysis you asked for:\n{WELL_FORMED}\nGood luck!");
        let report = FeedbackReport::from_model_output(&raw);
        assert_eq!(report.overall_score, 78);
        assert_eq!(report.summary, "Solid answers with room to add metrics.");
    }

    #[test]
    fn test_unparseable_output_falls_back() {
        let report = FeedbackReport::from_model_output("I'm sorry, I can't do that.");
        assert_eq!(report, FeedbackReport::fallback());
        assert_eq!(report.summary, FALLBACK_SUMMARY);
        assert_eq!(report.overall_score, 0);
        assert!(report.skills.is_empty());

        let report = FeedbackReport::from_model_output("[1, 2, 3]");
        assert_eq!(report, FeedbackReport::fallback());
    }

    #[test]
    fn test_missing_fields_default_and_scores_clamp() {
        let raw = r#"{
            "overallScore": "104",
            "skills": [
                { "name": "Communication", "score": 87.6 },
                { "name": "Problem Solving", "score": -3 },
                { "name": "Professionalism" },
                { "score": 50 },
                "Technical Knowledge"
            ],
            "keyHighlights": ["Good pacing", 7, "  "],
            "detailedFeedback": [{ "category": "Strengths" }]
        }"#;
        let report = FeedbackReport::from_model_output(raw);

        assert_eq!(report.overall_score, 100);
        assert_eq!(report.summary, "");
        assert_eq!(
            report.skills,
            vec![
                SkillScore { name: "Communication".into(), score: 88 },
                SkillScore { name: "Problem Solving".into(), score: 0 },
                SkillScore { name: "Professionalism".into(), score: 0 },
            ]
        );
        assert_eq!(report.key_highlights, vec!["Good pacing"]);
        assert_eq!(report.detailed_feedback.len(), 1);
        assert!(report.detailed_feedback[0].points.is_empty());
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let report = FeedbackReport::from_model_output(WELL_FORMED);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["overallScore"], 78);
        assert!(value["keyHighlights"].is_array());
        assert!(value["detailedFeedback"][0]["points"].is_array());
    }
}
