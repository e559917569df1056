use crate::language::Language;
use crate::util::hash_str;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const SANDBOX_ROOT_DIR: &str = "lazarus-sandbox";
const CANDIDATE_STEM: &str = "candidate";

/// Candidate source held in memory between the controller and the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArtifact {
    source: String,
    language: Language,
}

impl CandidateArtifact {
    pub fn new(source: impl Into<String>, language: Language) -> Self {
        Self {
            source: source.into(),
            language,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn content_hash(&self) -> String {
        hash_str(&self.source)
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

/// A candidate written to `<base>/lazarus-sandbox/<run_id>/<label>/`.
///
/// The file is fully written and synced before `path()` is handed out, and the
/// directory is removed when the slot is dropped.
#[derive(Debug)]
pub struct CandidateSlot {
    slot_dir: PathBuf,
    program_path: PathBuf,
}

impl CandidateSlot {
    pub fn materialize_in(
        base: &Path,
        artifact: &CandidateArtifact,
        run_id: &str,
        label: &str,
    ) -> Result<Self> {
        let slot_dir = base
            .join(SANDBOX_ROOT_DIR)
            .join(sanitize_component(run_id))
            .join(sanitize_component(label));

        if slot_dir.exists() {
            std::fs::remove_dir_all(&slot_dir).with_context(|| {
                format!("Failed to clear existing candidate slot '{}'", slot_dir.display())
            })?;
        }
        std::fs::create_dir_all(&slot_dir).with_context(|| {
            format!("Failed to create candidate slot '{}'", slot_dir.display())
        })?;

        let file_name = match artifact.language().extension() {
            Some(ext) => format!("{}.{}", CANDIDATE_STEM, ext),
            None => CANDIDATE_STEM.to_string(),
        };
        let program_path = slot_dir.join(file_name);

        // Construct the slot before writing so a failed write still cleans up.
        let slot = Self {
            slot_dir,
            program_path,
        };
        slot.write_synced(artifact.source())?;
        Ok(slot)
    }

    pub fn path(&self) -> &Path {
        &self.program_path
    }

    pub fn cleanup(&self) -> Result<()> {
        if self.slot_dir.exists() {
            std::fs::remove_dir_all(&self.slot_dir).with_context(|| {
                format!("Failed to remove candidate slot '{}'", self.slot_dir.display())
            })?;
        }
        if let Some(run_root) = self.slot_dir.parent() {
            let _ = std::fs::remove_dir(run_root);
        }
        Ok(())
    }

    fn write_synced(&self, source: &str) -> Result<()> {
        let mut file = File::create(&self.program_path).with_context(|| {
            format!("Failed to create candidate file '{}'", self.program_path.display())
        })?;
        file.write_all(source.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all())
            .with_context(|| {
                format!("Failed to write candidate file '{}'", self.program_path.display())
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if artifact_is_script_without_interpreter(&self.program_path) {
                if let Err(e) = std::fs::set_permissions(
                    &self.program_path,
                    std::fs::Permissions::from_mode(0o700),
                ) {
                    tracing::warn!(
                        path = %self.program_path.display(),
                        error = %e,
                        "failed to mark candidate executable; running it will fail"
                    );
                }
            }
        }
        Ok(())
    }
}

impl Drop for CandidateSlot {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            tracing::warn!(error = %err, "candidate slot cleanup failed");
        }
    }
}

#[cfg(unix)]
fn artifact_is_script_without_interpreter(path: &Path) -> bool {
    Language::from_path(path) == Language::Unknown
}

fn sanitize_component(input: &str) -> String {
    let cleaned = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect::<String>();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}
