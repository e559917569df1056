//! Mirror verifier
//!
//! Replays the fingerprint's input vectors against a candidate and compares
//! each output to the recorded reference output, byte for byte. `"42"` and
//! `"42.0"` are different observations.

use crate::runner::Executor;
use crate::truth_table::{build_fingerprint, Fingerprint, InputVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Verdict for one vector of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub vector: InputVector,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

impl VerificationVerdict {
    pub fn compare(vector: InputVector, expected: &str, actual: String) -> Self {
        let passed = expected == actual;
        Self {
            vector,
            expected: expected.to_string(),
            actual,
            passed,
        }
    }

    /// `Failed on [40, 20]. Expected '800', Got '800.0'`
    pub fn failure_line(&self) -> String {
        format!(
            "Failed on {}. Expected '{}', Got '{}'",
            self.vector, self.expected, self.actual
        )
    }
}

/// All verdicts of one attempt, in configured vector order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt_number: u32,
    pub verdicts: Vec<VerificationVerdict>,
    pub all_passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl AttemptReport {
    pub fn new(attempt_number: u32, verdicts: Vec<VerificationVerdict>, duration_ms: u64) -> Self {
        // An empty verdict set proves nothing.
        let all_passed = !verdicts.is_empty() && verdicts.iter().all(|v| v.passed);
        Self {
            attempt_number,
            verdicts,
            all_passed,
            duration_ms,
        }
    }

    /// Report for an attempt whose candidate never reached execution.
    pub fn unexecuted(attempt_number: u32, fingerprint: &Fingerprint, actual: &str) -> Self {
        let verdicts = fingerprint
            .observations()
            .iter()
            .map(|o| VerificationVerdict {
                vector: o.vector.clone(),
                expected: o.output.clone(),
                actual: actual.to_string(),
                passed: false,
            })
            .collect();
        Self::new(attempt_number, verdicts, 0)
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }
}

/// Runs a candidate against a fingerprint with bounded parallelism.
#[derive(Clone)]
pub struct MirrorVerifier {
    executor: Arc<dyn Executor>,
    timeout: Duration,
    concurrency: usize,
}

impl MirrorVerifier {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            executor,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn verify(
        &self,
        candidate: &Path,
        fingerprint: &Fingerprint,
        attempt_number: u32,
    ) -> AttemptReport {
        let start = Instant::now();
        let run_one = |vector: &InputVector, expected: &str| {
            let result = self
                .executor
                .execute(candidate, &vector.to_args(), self.timeout);
            VerificationVerdict::compare(vector.clone(), expected, result.raw_output)
        };

        let observations = fingerprint.observations();
        let verdicts: Vec<VerificationVerdict> = if self.concurrency == 1 {
            observations
                .iter()
                .map(|o| run_one(&o.vector, &o.output))
                .collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.concurrency)
                .build()
            {
                // Indexed collect keeps configured order regardless of finish order.
                Ok(pool) => pool.install(|| {
                    observations
                        .par_iter()
                        .map(|o| run_one(&o.vector, &o.output))
                        .collect()
                }),
                Err(err) => {
                    tracing::warn!(error = %err, "verification pool unavailable; running sequentially");
                    observations
                        .iter()
                        .map(|o| run_one(&o.vector, &o.output))
                        .collect()
                }
            }
        };

        AttemptReport::new(attempt_number, verdicts, start.elapsed().as_millis() as u64)
    }
}

/// One row of the diagnostic side-by-side comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRow {
    pub input_data: InputVector,
    pub legacy_output: String,
    pub modern_output: String,
    #[serde(rename = "match")]
    pub matches: bool,
}

/// Re-run both programs over `vectors` without touching the generation loop.
pub fn mirror_test(
    verifier: &MirrorVerifier,
    reference: &Path,
    candidate: &Path,
    vectors: &[InputVector],
) -> Vec<MirrorRow> {
    let fingerprint = build_fingerprint(
        verifier.executor.as_ref(),
        reference,
        vectors,
        verifier.timeout,
    );
    verifier
        .verify(candidate, &fingerprint, 0)
        .verdicts
        .into_iter()
        .map(|v| MirrorRow {
            input_data: v.vector,
            legacy_output: v.expected,
            modern_output: v.actual,
            matches: v.passed,
        })
        .collect()
}
