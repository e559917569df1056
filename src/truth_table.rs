//! Equivalence oracle (truth table)
//!
//! Samples the reference program over a fixed, ordered list of input vectors
//! and records what it printed. The resulting [`Fingerprint`] is the ground
//! truth for a whole session.

use crate::runner::Executor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One scalar argument. Integers stay integers in their textual form so a
/// vector like `[40, 20]` reaches the program as `40 20`, never `40.0`, and
/// integral floats keep their `.0` so `[40.0, 20]` reaches it as `40.0 20`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Scalar::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered positional arguments passed to a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputVector(pub Vec<Scalar>);

impl InputVector {
    pub fn ints(values: &[i64]) -> Self {
        Self(values.iter().copied().map(Scalar::Int).collect())
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Arguments in the textual form handed to the process.
    pub fn to_args(&self) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Display for InputVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self.to_args();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// One observed (input, output) pair of the reference program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub vector: InputVector,
    pub output: String,
}

/// Ordered mapping from input vector to the reference program's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    observations: Vec<Observation>,
}

impl Fingerprint {
    pub fn from_observations(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn expected_for(&self, vector: &InputVector) -> Option<&str> {
        self.observations
            .iter()
            .find(|o| &o.vector == vector)
            .map(|o| o.output.as_str())
    }

    /// `Input: [30, 20] -> Output: 600` lines, in configured order.
    pub fn truth_table_lines(&self) -> Vec<String> {
        self.observations
            .iter()
            .map(|o| format!("Input: {} -> Output: {}", o.vector, o.output))
            .collect()
    }
}

/// Run the reference program once per vector and record its outputs.
pub fn build_fingerprint(
    executor: &dyn Executor,
    reference: &Path,
    vectors: &[InputVector],
    timeout: Duration,
) -> Fingerprint {
    let observations = vectors
        .iter()
        .map(|vector| {
            let result = executor.execute(reference, &vector.to_args(), timeout);
            if !result.succeeded {
                tracing::warn!(
                    reference = %reference.display(),
                    %vector,
                    detail = result.error_detail.as_deref().unwrap_or(""),
                    "reference program did not complete cleanly; recording its output as-is"
                );
            }
            Observation {
                vector: vector.clone(),
                output: result.raw_output,
            }
        })
        .collect();

    Fingerprint::from_observations(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ExecutionResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        calls: AtomicUsize,
    }

    impl Executor for Doubler {
        fn execute(&self, _program: &Path, args: &[String], _timeout: Duration) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sum: i64 = args.iter().filter_map(|a| a.parse::<i64>().ok()).sum();
            ExecutionResult::completed((sum * 2).to_string(), 0)
        }
    }

    #[test]
    fn test_vector_textual_form_keeps_integers() {
        let v = InputVector::ints(&[40, 20]);
        assert_eq!(v.to_args(), vec!["40", "20"]);
        assert_eq!(v.to_string(), "[40, 20]");

        let f = InputVector(vec![Scalar::Float(40.5), Scalar::Int(20)]);
        assert_eq!(f.to_args(), vec!["40.5", "20"]);
    }

    #[test]
    fn test_integral_float_keeps_decimal_point() {
        let v = InputVector(vec![Scalar::Float(40.0), Scalar::Int(20)]);
        assert_eq!(v.to_args(), vec!["40.0", "20"]);
        assert_eq!(v.to_string(), "[40.0, 20]");

        let profile: toml::Value = toml::from_str("v = [40.0, 20]").unwrap();
        let parsed: InputVector = profile["v"].clone().try_into().unwrap();
        assert_eq!(parsed.to_args(), vec!["40.0", "20"]);
    }

    #[test]
    fn test_vectors_deserialize_from_plain_numbers() {
        let parsed: Vec<InputVector> = serde_json::from_str("[[30, 20], [40.5, 20]]").unwrap();
        assert_eq!(parsed[0], InputVector::ints(&[30, 20]));
        assert_eq!(parsed[1].0[0], Scalar::Float(40.5));
    }

    #[test]
    fn test_build_fingerprint_preserves_vector_order() {
        let executor = Doubler {
            calls: AtomicUsize::new(0),
        };
        let vectors = vec![
            InputVector::ints(&[60, 100]),
            InputVector::ints(&[30, 20]),
            InputVector::ints(&[40, 20]),
        ];

        let fp = build_fingerprint(&executor, Path::new("ref.py"), &vectors, Duration::from_secs(1));

        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        let outputs: Vec<&str> = fp.observations().iter().map(|o| o.output.as_str()).collect();
        assert_eq!(outputs, vec!["320", "100", "120"]);
        assert_eq!(fp.expected_for(&InputVector::ints(&[30, 20])), Some("100"));
        assert_eq!(fp.truth_table_lines()[0], "Input: [60, 100] -> Output: 320");
    }
}
