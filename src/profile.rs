//! Session profiles
//!
//! A profile pins down what a session samples and asks for: the input
//! vectors, the fixed behavioral requirements, the hint escalation policy and
//! the hints appended to failure feedback. Profiles are TOML:
//!
//! ```toml
//! schema_version = 1
//! output_file = "modern_payroll.py"
//! vectors = [[30, 20], [40, 20], [50, 20], [60, 100]]
//! requirements = ["Import 'sys'. Use sys.argv for inputs."]
//! feedback_hints = ["FIX: Ensure output types match exactly (int vs float)."]
//!
//! [[hint]]
//! from_attempt = 2
//! text = "CRITICAL: Cast result to int()."
//! ```

use crate::prompt::{HintPolicy, HintRule};
use crate::truth_table::InputVector;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub schema_version: u32,
    /// File name the accepted candidate is published under.
    pub output_file: String,
    pub vectors: Vec<InputVector>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub feedback_hints: Vec<String>,
    #[serde(default, rename = "hint")]
    pub hints: Vec<HintRule>,
}

impl Default for Profile {
    /// The payroll migration: overtime boundary at exactly 40 hours and a
    /// pay total past the 1000 bonus threshold are both sampled.
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            output_file: "modern_payroll.py".to_string(),
            vectors: vec![
                InputVector::ints(&[30, 20]),
                InputVector::ints(&[40, 20]),
                InputVector::ints(&[50, 20]),
                InputVector::ints(&[60, 100]),
            ],
            requirements: vec![
                "Import 'sys'. Use sys.argv for inputs.".to_string(),
                "Logic: Overtime (1.5x >40h) AND Hidden Bonus (+50 if total > 1000).".to_string(),
                "Print ONLY the result.".to_string(),
            ],
            feedback_hints: vec![
                "Hint: Check boundary conditions (e.g., exactly 40 hours).".to_string(),
                "FIX: Ensure output types match exactly (int vs float).".to_string(),
            ],
            hints: vec![HintRule {
                from_attempt: 2,
                text: "CRITICAL: Cast result to int().".to_string(),
            }],
        }
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile '{}'", path.display()))?;
        let profile: Profile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse profile TOML '{}'", path.display()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn hint_policy(&self) -> HintPolicy {
        HintPolicy::new(self.hints.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(anyhow!(
                "Unsupported profile schema_version={} (expected {})",
                self.schema_version,
                SCHEMA_VERSION
            ));
        }

        let Some(first) = self.vectors.first() else {
            return Err(anyhow!("Profile must define at least one input vector"));
        };
        let arity = first.arity();
        if let Some(bad) = self.vectors.iter().find(|v| v.arity() != arity) {
            return Err(anyhow!(
                "Input vector {} has {} arguments; expected {} like {}",
                bad,
                bad.arity(),
                arity,
                first
            ));
        }

        if let Some(rule) = self.hints.iter().find(|h| h.from_attempt == 0) {
            return Err(anyhow!(
                "Hint '{}' has from_attempt=0; attempts are numbered from 1",
                rule.text
            ));
        }

        let name_ok = !self.output_file.is_empty()
            && self
                .output_file
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !self.output_file.starts_with('.');
        if !name_ok {
            return Err(anyhow!(
                "Profile output_file '{}' must be a plain file name (allowed: a-zA-Z0-9_-.)",
                self.output_file
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid_and_samples_boundaries() {
        let profile = Profile::default();
        profile.validate().unwrap();
        assert!(profile.vectors.contains(&InputVector::ints(&[40, 20])));
        assert!(profile.vectors.contains(&InputVector::ints(&[60, 100])));
        assert!(profile.hint_policy().hints_for(1).is_empty());
        assert_eq!(profile.hint_policy().hints_for(2).len(), 1);
    }

    #[test]
    fn loads_toml_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        std::fs::write(
            &path,
            r#"
schema_version = 1
output_file = "modern_tax.py"
vectors = [[1000], [2500.5]]
requirements = ["Print ONLY the tax."]

[[hint]]
from_attempt = 3
text = "Round half up."
"#,
        )
        .unwrap();

        let profile = Profile::load(&path).unwrap();
        assert_eq!(profile.output_file, "modern_tax.py");
        assert_eq!(profile.vectors.len(), 2);
        assert_eq!(profile.vectors[1].to_args(), vec!["2500.5"]);
        assert!(profile.feedback_hints.is_empty());
        assert_eq!(profile.hint_policy().hints_for(3), vec!["Round half up."]);
    }

    #[test]
    fn rejects_mixed_arity_and_empty_vectors() {
        let mut profile = Profile::default();
        profile.vectors.push(InputVector::ints(&[1]));
        assert!(profile.validate().is_err());

        profile.vectors.clear();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn rejects_zero_hint_attempt_and_path_like_output() {
        let mut profile = Profile::default();
        profile.hints[0].from_attempt = 0;
        assert!(profile.validate().is_err());

        let mut profile = Profile::default();
        profile.output_file = "../escape.py".to_string();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let profile = Profile {
            schema_version: 2,
            ..Profile::default()
        };
        assert!(profile.validate().is_err());
    }
}
