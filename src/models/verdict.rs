use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on matched terms kept from a classifier reply.
pub const MAX_MATCHED_TERMS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    OnTopic,
    Borderline,
    OffTopic,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::OnTopic => "on_topic",
            VerdictKind::Borderline => "borderline",
            VerdictKind::OffTopic => "off_topic",
        }
    }
}

/// Structured relevance judgment returned by the classifier.
///
/// The wire field for `score` is `goal_related_score`, matching the JSON
/// contract the classifier is prompted to produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub general_purpose: bool,
    #[serde(rename = "goal_related_score")]
    pub score: u8,
    pub verdict: VerdictKind,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub matched_terms: Vec<String>,
}

impl Verdict {
    /// Enforce the schema bounds the classifier reply must satisfy. Scores
    /// outside 0–100 are a contract violation; excess matched terms are
    /// dropped rather than rejected.
    pub fn validate(mut self) -> Result<Self> {
        if self.score > 100 {
            bail!("goal_related_score {} out of range 0-100", self.score);
        }
        self.matched_terms.truncate(MAX_MATCHED_TERMS);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classifier_reply() {
        let raw = r#"{
            "general_purpose": false,
            "goal_related_score": 92,
            "verdict": "on_topic",
            "rationale": "Discusses attention mechanisms directly.",
            "matched_terms": ["attention", "transformer"]
        }"#;
        let verdict: Verdict = serde_json::from_str(raw).unwrap();
        let verdict = verdict.validate().unwrap();
        assert_eq!(verdict.score, 92);
        assert_eq!(verdict.verdict, VerdictKind::OnTopic);
        assert!(!verdict.general_purpose);
    }

    #[test]
    fn rejects_out_of_range_score() {
        let raw = r#"{"general_purpose": true, "goal_related_score": 150, "verdict": "borderline"}"#;
        let verdict: Verdict = serde_json::from_str(raw).unwrap();
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn rejects_unknown_verdict_string() {
        let raw = r#"{"general_purpose": false, "goal_related_score": 10, "verdict": "unsure"}"#;
        assert!(serde_json::from_str::<Verdict>(raw).is_err());
    }

    #[test]
    fn truncates_excess_matched_terms() {
        let raw = r#"{
            "general_purpose": false,
            "goal_related_score": 40,
            "verdict": "borderline",
            "matched_terms": ["a", "b", "c", "d", "e", "f", "g"]
        }"#;
        let verdict = serde_json::from_str::<Verdict>(raw).unwrap().validate().unwrap();
        assert_eq!(verdict.matched_terms.len(), MAX_MATCHED_TERMS);
    }
}
