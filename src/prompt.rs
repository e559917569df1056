//! Oracle context construction
//!
//! The context handed to the transformation oracle is rebuilt from scratch for
//! every attempt: fixed requirements, the truth table, the feedback from the
//! previous attempt only, and whatever hints the escalation policy unlocks at
//! this attempt number.

use crate::language::Language;
use crate::mirror::AttemptReport;
use crate::truth_table::Fingerprint;
use serde::{Deserialize, Serialize};

const ROLE_LINE: &str = "You are an Autonomous Code Architect.";
const RAW_CODE_ONLY: &str = "OUTPUT RAW CODE ONLY.";
const FEEDBACK_HEADER: &str = "Your previous code failed these tests:";

/// A hint that becomes part of the requirements from `from_attempt` onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintRule {
    pub from_attempt: u32,
    pub text: String,
}

/// Attempt-keyed hint escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HintPolicy {
    rules: Vec<HintRule>,
}

impl HintPolicy {
    pub fn new(rules: Vec<HintRule>) -> Self {
        Self { rules }
    }

    /// Hints active at `attempt_number`, in declaration order.
    pub fn hints_for(&self, attempt_number: u32) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| attempt_number >= r.from_attempt)
            .map(|r| r.text.as_str())
            .collect()
    }
}

/// Diagnostic text derived from the failed verdicts of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackContext {
    text: String,
}

impl FeedbackContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build feedback strictly from `report`'s failures plus the fixed hints.
    pub fn from_report(report: &AttemptReport, fixed_hints: &[String]) -> Self {
        let failures: Vec<String> = report.failures().map(|v| v.failure_line()).collect();
        if failures.is_empty() {
            return Self::empty();
        }

        let mut text = String::from(FEEDBACK_HEADER);
        for line in failures {
            text.push('\n');
            text.push_str(&line);
        }
        for hint in fixed_hints {
            text.push('\n');
            text.push_str(hint);
        }
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Everything needed to render the oracle context for one attempt.
pub struct ContextInput<'a> {
    pub language: Language,
    pub fingerprint: &'a Fingerprint,
    pub feedback: &'a FeedbackContext,
    pub requirements: &'a [String],
    pub hints: &'a HintPolicy,
    pub attempt_number: u32,
}

pub fn build_context(input: &ContextInput<'_>) -> String {
    let mut out = String::new();
    out.push_str(ROLE_LINE);
    out.push('\n');
    out.push_str(&format!("Refactor this legacy {} code.\n\n", input.language));

    out.push_str("CONTEXT - TRUTH TABLE:\n");
    for line in input.fingerprint.truth_table_lines() {
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str("\nPREVIOUS ERRORS (IF ANY):\n");
    out.push_str(input.feedback.as_str());
    out.push('\n');

    out.push_str("\nREQUIREMENTS:\n");
    let numbered = input
        .requirements
        .iter()
        .map(String::as_str)
        .chain(input.hints.hints_for(input.attempt_number));
    for (i, item) in numbered.enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, item));
    }

    out.push('\n');
    out.push_str(RAW_CODE_ONLY);
    out
}

/// Strip markdown fence markers an oracle wraps code in.
///
/// Every ```` ``` ```` is removed wherever it sits, together with a language
/// tag directly after it (```` ```python ````). A tag only counts when
/// whitespace or the end of the text follows it.
pub fn strip_code_fences(text: &str) -> String {
    const FENCE: &str = "```";
    let is_tag_char =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '#' | '.');

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(FENCE) {
        out.push_str(&rest[..pos]);
        rest = rest[pos..].trim_start_matches('`');

        let tag_len = rest.find(|c: char| !is_tag_char(c)).unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        if tag_len > 0 && after_tag.chars().next().map_or(true, char::is_whitespace) {
            rest = after_tag;
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::VerificationVerdict;
    use crate::truth_table::{InputVector, Observation};

    fn fingerprint() -> Fingerprint {
        Fingerprint::from_observations(vec![
            Observation {
                vector: InputVector::ints(&[30, 20]),
                output: "600".to_string(),
            },
            Observation {
                vector: InputVector::ints(&[40, 20]),
                output: "800".to_string(),
            },
        ])
    }

    fn cast_policy() -> HintPolicy {
        HintPolicy::new(vec![HintRule {
            from_attempt: 2,
            text: "CRITICAL: Cast result to int().".to_string(),
        }])
    }

    #[test]
    fn test_hints_escalate_with_attempt_number() {
        let policy = HintPolicy::new(vec![
            HintRule {
                from_attempt: 2,
                text: "second".to_string(),
            },
            HintRule {
                from_attempt: 3,
                text: "third".to_string(),
            },
        ]);
        assert!(policy.hints_for(1).is_empty());
        assert_eq!(policy.hints_for(2), vec!["second"]);
        assert_eq!(policy.hints_for(3), vec!["second", "third"]);
    }

    #[test]
    fn test_first_attempt_context_omits_escalated_hint() {
        let fp = fingerprint();
        let feedback = FeedbackContext::empty();
        let requirements = vec!["Print ONLY the result.".to_string()];
        let policy = cast_policy();
        let ctx = build_context(&ContextInput {
            language: Language::Python,
            fingerprint: &fp,
            feedback: &feedback,
            requirements: &requirements,
            hints: &policy,
            attempt_number: 1,
        });

        assert!(ctx.contains("Refactor this legacy Python code."));
        assert!(ctx.contains("Input: [40, 20] -> Output: 800"));
        assert!(ctx.contains("1. Print ONLY the result."));
        assert!(!ctx.contains("Cast result to int()"));
        assert!(ctx.ends_with("OUTPUT RAW CODE ONLY."));
    }

    #[test]
    fn test_later_attempt_context_numbers_hints_after_requirements() {
        let fp = fingerprint();
        let feedback = FeedbackContext::empty();
        let requirements = vec!["Import 'sys'.".to_string(), "Print ONLY the result.".to_string()];
        let policy = cast_policy();
        let ctx = build_context(&ContextInput {
            language: Language::Python,
            fingerprint: &fp,
            feedback: &feedback,
            requirements: &requirements,
            hints: &policy,
            attempt_number: 2,
        });

        assert!(ctx.contains("3. CRITICAL: Cast result to int()."));
    }

    #[test]
    fn test_feedback_lists_only_failures_then_fixed_hints() {
        let report = AttemptReport::new(
            1,
            vec![
                VerificationVerdict::compare(InputVector::ints(&[30, 20]), "600", "600".into()),
                VerificationVerdict::compare(InputVector::ints(&[40, 20]), "800", "800.0".into()),
            ],
            0,
        );
        let hints = vec!["Hint: Check boundary conditions (e.g., exactly 40 hours).".to_string()];

        let feedback = FeedbackContext::from_report(&report, &hints);

        assert_eq!(
            feedback.as_str(),
            "Your previous code failed these tests:\n\
             Failed on [40, 20]. Expected '800', Got '800.0'\n\
             Hint: Check boundary conditions (e.g., exactly 40 hours)."
        );
    }

    #[test]
    fn test_feedback_for_passing_report_is_empty() {
        let report = AttemptReport::new(
            1,
            vec![VerificationVerdict::compare(InputVector::ints(&[30, 20]), "600", "600".into())],
            0,
        );
        assert!(FeedbackContext::from_report(&report, &["hint".to_string()]).is_empty());
    }

    #[test]
    fn test_strip_code_fences_variants() {
        let wrapped = "```python\nimport sys\nprint(int(1))\n```";
        assert_eq!(strip_code_fences(wrapped), "import sys\nprint(int(1))");

        let bare = "```\nprint(1)\n```\n";
        assert_eq!(strip_code_fences(bare), "print(1)");

        let plain = "  print(1)  \n";
        assert_eq!(strip_code_fences(plain), "print(1)");
    }

    #[test]
    fn test_strip_code_fences_keeps_inner_indentation() {
        let wrapped = "```py\ndef f():\n    return 1\n```";
        assert_eq!(strip_code_fences(wrapped), "def f():\n    return 1");
    }

    #[test]
    fn test_strip_code_fences_on_code_lines() {
        let closing_inline = "```python\nprint(int(800))```";
        assert_eq!(strip_code_fences(closing_inline), "print(int(800))");

        let one_line = "```python print(1)```";
        assert_eq!(strip_code_fences(one_line), "print(1)");

        let untagged = "```print(1)```";
        assert_eq!(strip_code_fences(untagged), "print(1)");
    }
}
