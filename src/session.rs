//! Session trigger surface
//!
//! Resolves a legacy program by name inside `legacy_dir`, runs the
//! self-correction loop on it, and publishes the latest candidate to
//! `modern_dir/<output_file>` with the reference's extension. A small JSON
//! record next to it names the reference the candidate was generated from,
//! so the diagnostic mirror re-run can pair them again. Also hosts the
//! legacy program listing.

use crate::config::Config;
use crate::controller::{LoopSettings, ReferenceProgram, SelfCorrectionController, SessionResult};
use crate::language::Language;
use crate::mirror::{mirror_test, MirrorRow, MirrorVerifier};
use crate::oracle::TransformationOracle;
use crate::profile::Profile;
use crate::runner::Executor;
use crate::util::resolve_inside;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

const LOCK_FILE: &str = ".lazarus.lock";
const RECORD_FILE: &str = ".lazarus-last.json";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// A finished session plus where its candidate went.
#[derive(Debug)]
pub struct RefactorOutcome {
    pub reference: ReferenceProgram,
    pub result: SessionResult,
    /// `None` when the oracle never produced a candidate.
    pub published_to: Option<PathBuf>,
}

/// The last published reference/candidate pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Program name relative to `legacy_dir`.
    pub reference: PathBuf,
    /// File name inside `modern_dir`.
    pub candidate: PathBuf,
    pub verified: bool,
    pub published_at: DateTime<Utc>,
}

/// A runnable program found in `legacy_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramEntry {
    pub name: PathBuf,
    pub language: Language,
}

pub struct Session<'a> {
    config: &'a Config,
    profile: &'a Profile,
    executor: Arc<dyn Executor>,
}

impl<'a> Session<'a> {
    pub fn new(config: &'a Config, profile: &'a Profile, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            profile,
            executor,
        }
    }

    fn settings(&self) -> LoopSettings {
        LoopSettings {
            max_attempts: self.config.max_attempts,
            timeout: self.config.timeout(),
            verify_concurrency: self.config.verify_concurrency,
        }
    }

    pub fn resolve_legacy(&self, name: &Path) -> Result<PathBuf> {
        resolve_inside(&self.config.legacy_dir, name).map_err(|e| anyhow!(e))
    }

    /// Where the candidate for `reference` is published: the profile's
    /// output file name carrying the reference's extension.
    pub fn output_path(&self, reference: &Path) -> PathBuf {
        let file_name = Path::new(&self.profile.output_file)
            .with_extension(reference.extension().unwrap_or_default());
        self.config.modern_dir.join(file_name)
    }

    /// Run the full loop for `name` and publish whatever it ends with.
    pub async fn refactor(
        &self,
        oracle: &dyn TransformationOracle,
        name: &Path,
    ) -> Result<RefactorOutcome> {
        let path = self.resolve_legacy(name)?;
        let reference = ReferenceProgram::load(path)?;

        let controller =
            SelfCorrectionController::new(Arc::clone(&self.executor), self.settings(), self.profile);
        let result = controller.run(oracle, &reference).await;

        let published_to = if result.final_candidate_source.is_empty() {
            tracing::warn!("no candidate was generated; nothing to publish");
            None
        } else {
            let target = self.output_path(name);
            let record = PublishRecord {
                reference: name.to_path_buf(),
                candidate: target.file_name().map(PathBuf::from).unwrap_or_default(),
                verified: result.success,
                published_at: Utc::now(),
            };
            publish_candidate(&target, &result.final_candidate_source, &record)?;
            tracing::info!(
                path = %target.display(),
                verified = result.success,
                "candidate published"
            );
            Some(target)
        };

        Ok(RefactorOutcome {
            reference,
            result,
            published_to,
        })
    }

    /// Re-run the profile vectors against a reference and its published
    /// candidate. Without `name` the last published pair is used.
    pub fn mirror(&self, name: Option<&Path>) -> Result<Vec<MirrorRow>> {
        if !self.config.modern_dir.is_dir() {
            return Err(anyhow!(
                "Nothing published in {}; run `lazarus refactor` first",
                self.config.modern_dir.display()
            ));
        }
        let _lock = ArtifactLock::acquire(&self.config.modern_dir, false)?;

        let (legacy, candidate) = match name {
            Some(name) => (self.resolve_legacy(name)?, self.output_path(name)),
            None => {
                let record = read_record(&self.config.modern_dir)?;
                (
                    self.resolve_legacy(&record.reference)?,
                    self.config.modern_dir.join(&record.candidate),
                )
            }
        };
        if !candidate.is_file() {
            return Err(anyhow!(
                "No published candidate at {}; run `lazarus refactor` first",
                candidate.display()
            ));
        }

        let verifier = MirrorVerifier::new(
            Arc::clone(&self.executor),
            self.config.timeout(),
            self.config.verify_concurrency,
        );
        Ok(mirror_test(&verifier, &legacy, &candidate, &self.profile.vectors))
    }

    pub fn list_programs(&self) -> Result<Vec<ProgramEntry>> {
        list_programs(&self.config.legacy_dir)
    }
}

/// Every non-hidden file under `root`, sorted by relative path.
pub fn list_programs(root: &Path) -> Result<Vec<ProgramEntry>> {
    if !root.is_dir() {
        return Err(anyhow!("Legacy directory not found: {}", root.display()));
    }

    let mut programs: Vec<ProgramEntry> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let path = e.path();
            ProgramEntry {
                name: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
                language: Language::from_path(path),
            }
        })
        .collect();
    programs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(programs)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n == "__pycache__")
}

/// Replace `target` with `source` and rewrite the publish record, both
/// under the exclusive artifact lock.
pub fn publish_candidate(target: &Path, source: &str, record: &PublishRecord) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| anyhow!("Output path has no parent: {}", target.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let _lock = ArtifactLock::acquire(dir, true)?;

    let mut content = source.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    write_atomic(target, content.as_bytes())
        .with_context(|| format!("Failed to publish {}", target.display()))?;

    let record_path = dir.join(RECORD_FILE);
    let json = serde_json::to_vec_pretty(record).context("Failed to serialize publish record")?;
    write_atomic(&record_path, &json)
        .with_context(|| format!("Failed to write {}", record_path.display()))
}

/// The last published pair in `dir`.
pub fn read_record(dir: &Path) -> Result<PublishRecord> {
    let path = dir.join(RECORD_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(anyhow!(
                "No published candidate in {}; run `lazarus refactor` first",
                dir.display()
            ))
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()))
        }
    };
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = target.with_file_name(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp_path, target)
    };
    let result = write();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

struct ArtifactLock {
    file: File,
}

impl ArtifactLock {
    fn acquire(dir: &Path, exclusive: bool) -> Result<Self> {
        let lock_path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() != ErrorKind::WouldBlock => return Err(err.into()),
                Err(_) => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(anyhow!(
                            "Timed out waiting for artifact lock ({}s)",
                            LOCK_TIMEOUT.as_secs()
                        ));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
            }
        }
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
