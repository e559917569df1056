//! Self-correction controller
//!
//! Drives the bounded generate → verify loop:
//!
//! ```text
//! PENDING ─▶ GENERATING ─▶ VERIFYING ─┬─▶ SUCCEEDED
//!                 ▲                   ├─▶ EXHAUSTED   (attempt == max)
//!                 └───── feedback ────┘               (attempt <  max)
//! ```
//!
//! The reference fingerprint is taken once, before the first generation, and
//! shared read-only with every verification pass. Each attempt's feedback is
//! rebuilt from that attempt's failures alone.

use crate::complexity;
use crate::language::Language;
use crate::mirror::{AttemptReport, MirrorVerifier};
use crate::oracle::{OracleError, TransformationOracle};
use crate::profile::Profile;
use crate::prompt::{build_context, strip_code_fences, ContextInput, FeedbackContext, HintPolicy};
use crate::runner::{Executor, CRITICAL_ERROR_PREFIX};
use crate::sandbox::{CandidateArtifact, CandidateSlot};
use crate::truth_table::{build_fingerprint, Fingerprint, InputVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const ORACLE_ERROR_PREFIX: &str = "ORACLE ERROR: ";

/// Observable controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Generating,
    Verifying,
    Succeeded,
    Exhausted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Exhausted)
    }
}

/// The reference program a session reproduces.
#[derive(Debug, Clone)]
pub struct ReferenceProgram {
    pub path: PathBuf,
    pub source: String,
    pub language: Language,
}

impl ReferenceProgram {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read reference program '{}': {}", path.display(), e)
        })?;
        let language = Language::from_path(&path);
        Ok(Self {
            path,
            source,
            language,
        })
    }
}

/// Loop budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub verify_concurrency: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            verify_concurrency: 4,
        }
    }
}

/// Everything a finished session hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub success: bool,
    pub final_state: SessionState,
    pub attempts: Vec<AttemptReport>,
    pub final_candidate_source: String,
    pub reference_complexity: u32,
    pub candidate_complexity: u32,
    pub fingerprint: Fingerprint,
    /// Human-readable attempt log, one entry per line.
    pub logs: Vec<String>,
    /// Every state entered, in order, starting with `PENDING`.
    pub transitions: Vec<SessionState>,
    pub generation_calls: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Internal phase, carrying what the next transition needs.
enum Phase {
    Pending,
    Generating {
        attempt: u32,
        feedback: FeedbackContext,
    },
    Verifying {
        attempt: u32,
        generated: Result<CandidateArtifact, OracleError>,
    },
    Succeeded,
    Exhausted,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Pending => SessionState::Pending,
            Phase::Generating { .. } => SessionState::Generating,
            Phase::Verifying { .. } => SessionState::Verifying,
            Phase::Succeeded => SessionState::Succeeded,
            Phase::Exhausted => SessionState::Exhausted,
        }
    }
}

pub struct SelfCorrectionController {
    executor: Arc<dyn Executor>,
    settings: LoopSettings,
    vectors: Vec<InputVector>,
    requirements: Vec<String>,
    feedback_hints: Vec<String>,
    hints: HintPolicy,
    run_id: String,
    sandbox_base: PathBuf,
}

impl SelfCorrectionController {
    pub fn new(executor: Arc<dyn Executor>, settings: LoopSettings, profile: &Profile) -> Self {
        Self {
            executor,
            settings: LoopSettings {
                max_attempts: settings.max_attempts.max(1),
                ..settings
            },
            vectors: profile.vectors.clone(),
            requirements: profile.requirements.clone(),
            feedback_hints: profile.feedback_hints.clone(),
            hints: profile.hint_policy(),
            run_id: uuid::Uuid::new_v4().to_string(),
            sandbox_base: std::env::temp_dir(),
        }
    }

    /// Materialize candidates under `base` instead of the system temp dir.
    pub fn with_sandbox_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.sandbox_base = base.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn run(
        &self,
        oracle: &dyn TransformationOracle,
        reference: &ReferenceProgram,
    ) -> SessionResult {
        let started_at = Utc::now();
        let max = self.settings.max_attempts;
        tracing::info!(
            run_id = %self.run_id,
            reference = %reference.path.display(),
            vectors = self.vectors.len(),
            max_attempts = max,
            "session started"
        );

        let fingerprint = Arc::new(self.fingerprint(reference).await);

        let mut logs = Vec::new();
        let mut attempts: Vec<AttemptReport> = Vec::new();
        let mut latest_candidate: Option<CandidateArtifact> = None;
        let mut generation_calls = 0u32;
        let mut phase = Phase::Pending;
        let mut transitions = vec![phase.state()];

        while !phase.state().is_terminal() {
            phase = match phase {
                Phase::Pending => Phase::Generating {
                    attempt: 1,
                    feedback: FeedbackContext::empty(),
                },

                Phase::Generating { attempt, feedback } => {
                    logs.push(format!("--- Attempt {}/{} ---", attempt, max));
                    let context = build_context(&ContextInput {
                        language: reference.language,
                        fingerprint: &fingerprint,
                        feedback: &feedback,
                        requirements: &self.requirements,
                        hints: &self.hints,
                        attempt_number: attempt,
                    });
                    generation_calls += 1;
                    let generated = oracle
                        .generate(&context)
                        .await
                        .and_then(|raw| candidate_from_raw(&raw, reference.language));
                    Phase::Verifying { attempt, generated }
                }

                Phase::Verifying { attempt, generated } => {
                    let report = match generated {
                        Ok(artifact) => {
                            let report = self.verify(&artifact, &fingerprint, attempt).await;
                            latest_candidate = Some(artifact);
                            report
                        }
                        Err(err) => {
                            tracing::warn!(attempt, error = %err, "oracle fault; attempt counts as failed");
                            let observed = format!("{}{}", ORACLE_ERROR_PREFIX, err);
                            logs.push(observed.clone());
                            AttemptReport::unexecuted(attempt, &fingerprint, &observed)
                        }
                    };

                    log_report(&mut logs, &report);
                    tracing::info!(
                        attempt,
                        failed = report.failed_count(),
                        total = report.verdicts.len(),
                        duration_ms = report.duration_ms,
                        "attempt verified"
                    );

                    let next = if report.all_passed {
                        Phase::Succeeded
                    } else if attempt < max {
                        Phase::Generating {
                            attempt: attempt + 1,
                            feedback: FeedbackContext::from_report(&report, &self.feedback_hints),
                        }
                    } else {
                        Phase::Exhausted
                    };
                    attempts.push(report);
                    next
                }

                terminal @ (Phase::Succeeded | Phase::Exhausted) => terminal,
            };
            tracing::debug!(state = ?phase.state(), "controller transition");
            transitions.push(phase.state());
        }

        let final_state = phase.state();
        let final_candidate_source = latest_candidate
            .map(CandidateArtifact::into_source)
            .unwrap_or_default();
        let reference_complexity = complexity::score(&reference.source, reference.language);
        let candidate_complexity = complexity::score(&final_candidate_source, reference.language);

        tracing::info!(
            run_id = %self.run_id,
            state = ?final_state,
            attempts = attempts.len(),
            "session finished"
        );

        SessionResult {
            success: final_state == SessionState::Succeeded,
            final_state,
            attempts,
            final_candidate_source,
            reference_complexity,
            candidate_complexity,
            fingerprint: Fingerprint::clone(&fingerprint),
            logs,
            transitions,
            generation_calls,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn fingerprint(&self, reference: &ReferenceProgram) -> Fingerprint {
        let executor = Arc::clone(&self.executor);
        let path = reference.path.clone();
        let vectors = self.vectors.clone();
        let timeout = self.settings.timeout;
        let task = tokio::task::spawn_blocking(move || {
            build_fingerprint(executor.as_ref(), &path, &vectors, timeout)
        });
        match task.await {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                // Record the fault as the reference's observation on every vector.
                tracing::error!(error = %err, "fingerprint task failed");
                let observed = format!("{}fingerprint task failed: {}", CRITICAL_ERROR_PREFIX, err);
                Fingerprint::from_observations(
                    self.vectors
                        .iter()
                        .map(|v| crate::truth_table::Observation {
                            vector: v.clone(),
                            output: observed.clone(),
                        })
                        .collect(),
                )
            }
        }
    }

    /// Write the candidate, run it, and release the slot before returning.
    async fn verify(
        &self,
        artifact: &CandidateArtifact,
        fingerprint: &Arc<Fingerprint>,
        attempt: u32,
    ) -> AttemptReport {
        let label = format!("attempt-{}", attempt);
        let slot = match CandidateSlot::materialize_in(&self.sandbox_base, artifact, &self.run_id, &label)
        {
            Ok(slot) => slot,
            Err(err) => {
                tracing::warn!(attempt, error = %err, "candidate could not be materialized");
                let observed = format!("{}{:#}", CRITICAL_ERROR_PREFIX, err);
                return AttemptReport::unexecuted(attempt, fingerprint, &observed);
            }
        };

        tracing::debug!(
            attempt,
            path = %slot.path().display(),
            hash = %artifact.content_hash(),
            "candidate materialized"
        );

        let verifier = MirrorVerifier::new(
            Arc::clone(&self.executor),
            self.settings.timeout,
            self.settings.verify_concurrency,
        );
        let shared = Arc::clone(fingerprint);
        let task = tokio::task::spawn_blocking(move || {
            let report = verifier.verify(slot.path(), &shared, attempt);
            drop(slot);
            report
        });

        match task.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(attempt, error = %err, "verification task failed");
                let observed = format!("{}verification task failed: {}", CRITICAL_ERROR_PREFIX, err);
                AttemptReport::unexecuted(attempt, fingerprint, &observed)
            }
        }
    }
}

fn candidate_from_raw(raw: &str, language: Language) -> Result<CandidateArtifact, OracleError> {
    let source = strip_code_fences(raw);
    if source.is_empty() {
        return Err(OracleError::EmptyCandidate);
    }
    Ok(CandidateArtifact::new(source, language))
}

fn log_report(logs: &mut Vec<String>, report: &AttemptReport) {
    if report.all_passed {
        logs.push("SUCCESS: Parity Achieved.".to_string());
        return;
    }
    logs.push(format!("FAILURE: {} tests failed.", report.failed_count()));
    for verdict in report.failures() {
        logs.push(format!("  [x] {}", verdict.failure_line()));
    }
}
