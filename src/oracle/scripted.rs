use super::{OracleError, TransformationOracle};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

/// Replays a fixed list of answers, one per call.
///
/// Used for offline replays (`lazarus refactor --scripted`) and to drive the
/// controller deterministically in tests. Once the script runs out, the last
/// answer repeats.
#[derive(Debug)]
pub struct ScriptedOracle {
    answers: Vec<Result<String, String>>,
    state: Mutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    calls: usize,
    contexts: Vec<String>,
}

impl ScriptedOracle {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_faults(answers.into_iter().map(|s| Ok(s.into())))
    }

    /// `Err(message)` entries surface as transport faults.
    pub fn with_faults<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            answers: answers.into_iter().collect(),
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub fn from_files(paths: &[impl AsRef<Path>]) -> anyhow::Result<Self> {
        let mut answers = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read scripted candidate '{}': {}", path.display(), e)
            })?;
            answers.push(text);
        }
        Ok(Self::new(answers))
    }

    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }

    /// Every context received so far, in call order.
    pub fn contexts(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.contexts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransformationOracle for ScriptedOracle {
    async fn generate(&self, context: &str) -> Result<String, OracleError> {
        let index = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| OracleError::Transport("scripted oracle state poisoned".into()))?;
            state.calls += 1;
            state.contexts.push(context.to_string());
            state.calls - 1
        };

        let answer = self
            .answers
            .get(index)
            .or_else(|| self.answers.last())
            .ok_or(OracleError::EmptyCandidate)?;

        match answer {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(OracleError::Transport(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_answers_in_order_then_repeats_last() {
        let oracle = ScriptedOracle::new(["a", "b"]);
        assert_eq!(oracle.generate("1").await.unwrap(), "a");
        assert_eq!(oracle.generate("2").await.unwrap(), "b");
        assert_eq!(oracle.generate("3").await.unwrap(), "b");
        assert_eq!(oracle.calls(), 3);
        assert_eq!(oracle.contexts(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn scripted_faults_surface_as_transport_errors() {
        let oracle = ScriptedOracle::with_faults([Err("network down".to_string())]);
        assert!(matches!(
            oracle.generate("ctx").await,
            Err(OracleError::Transport(m)) if m == "network down"
        ));
    }

    #[tokio::test]
    async fn empty_script_yields_empty_candidate() {
        let oracle = ScriptedOracle::new(Vec::<String>::new());
        assert!(matches!(
            oracle.generate("ctx").await,
            Err(OracleError::EmptyCandidate)
        ));
    }
}
