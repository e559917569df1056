//! Response objects and terminal rendering for the CLI surfaces.

use crate::complexity::improvement;
use crate::controller::SessionState;
use crate::mirror::{AttemptReport, MirrorRow};
use crate::session::RefactorOutcome;
use crate::util::truncate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub legacy_complexity: u32,
    pub modern_complexity: u32,
    /// `"NN%"`, or `"n/a"` when the legacy score is 0.
    pub improvement: String,
}

impl Metrics {
    pub fn new(legacy_complexity: u32, modern_complexity: u32) -> Self {
        let improvement = match improvement(legacy_complexity, modern_complexity) {
            Some(pct) => format!("{:.0}%", pct),
            None => "n/a".to_string(),
        };
        Self {
            legacy_complexity,
            modern_complexity,
            improvement,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefactorResponse {
    pub status: &'static str,
    pub success: bool,
    pub final_state: SessionState,
    pub legacy_code: String,
    pub modern_code: String,
    pub logs: Vec<String>,
    pub attempts: Vec<AttemptReport>,
    pub metrics: Metrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_to: Option<String>,
    pub duration_ms: i64,
}

impl RefactorResponse {
    pub fn from_outcome(outcome: &RefactorOutcome) -> Self {
        let result = &outcome.result;
        Self {
            status: "Complete",
            success: result.success,
            final_state: result.final_state,
            legacy_code: outcome.reference.source.clone(),
            modern_code: result.final_candidate_source.clone(),
            logs: result.logs.clone(),
            attempts: result.attempts.clone(),
            metrics: Metrics::new(result.reference_complexity, result.candidate_complexity),
            published_to: outcome
                .published_to
                .as_ref()
                .map(|p| p.display().to_string()),
            duration_ms: (result.finished_at - result.started_at).num_milliseconds(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in &self.logs {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');

        let verdict = if self.success {
            "Parity achieved"
        } else {
            "Attempts exhausted without parity"
        };
        out.push_str(&format!(
            "{} after {} attempt(s) in {}ms\n",
            verdict,
            self.attempts.len(),
            self.duration_ms
        ));
        out.push_str(&format!(
            "Complexity: legacy {} -> modern {} (improvement {})\n",
            self.metrics.legacy_complexity, self.metrics.modern_complexity, self.metrics.improvement
        ));
        match &self.published_to {
            Some(path) => out.push_str(&format!("Candidate written to {}\n", path)),
            None => out.push_str("No candidate was generated\n"),
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorResponse {
    pub results: Vec<MirrorRow>,
}

impl MirrorResponse {
    pub fn render_text(&self) -> String {
        let mut out = String::from("INPUT            LEGACY           MODERN           MATCH\n");
        for row in &self.results {
            out.push_str(&format!(
                "{:<16} {:<16} {:<16} {}\n",
                truncate(&row.input_data.to_string(), 16),
                truncate(&row.legacy_output, 16),
                truncate(&row.modern_output, 16),
                if row.matches { "yes" } else { "NO" }
            ));
        }
        let matched = self.results.iter().filter(|r| r.matches).count();
        out.push_str(&format!("\n{}/{} vectors match\n", matched, self.results.len()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::truth_table::InputVector;

    #[test]
    fn improvement_is_rounded_percentage() {
        assert_eq!(Metrics::new(13, 2).improvement, "85%");
        assert_eq!(Metrics::new(10, 15).improvement, "-50%");
        assert_eq!(Metrics::new(0, 4).improvement, "n/a");
    }

    #[test]
    fn mirror_response_uses_match_key() {
        let response = MirrorResponse {
            results: vec![MirrorRow {
                input_data: InputVector::ints(&[40, 20]),
                legacy_output: "800".into(),
                modern_output: "800.0".into(),
                matches: false,
            }],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["results"][0]["match"], false);
        assert_eq!(json["results"][0]["input_data"], serde_json::json!([40, 20]));

        let text = response.render_text();
        assert!(text.contains("800.0"));
        assert!(text.contains("0/1 vectors match"));
    }
}
