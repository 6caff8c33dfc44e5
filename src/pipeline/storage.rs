//! Persistence of analysis results, guarded by the store breaker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::breaker::StoreBreaker;
use super::output::AnalysisOutput;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store paused: {0}")]
    Paused(String),

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait AnalysisStore {
    fn save(&self, output: &AnalysisOutput) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per run: `{dir}/{run_id}.json`.
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    pub fn load(&self, run_id: &str) -> Result<serde_json::Value, StoreError> {
        let bytes = std::fs::read(self.path_for(run_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl AnalysisStore for JsonDirStore {
    fn save(&self, output: &AnalysisOutput) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(output)?;
        let path = self.path_for(output.run_id());
        std::fs::write(&path, json.as_bytes())?;
        tracing::debug!(path = %path.display(), size = json.len(), "Analysis saved");
        Ok(())
    }
}

/// Any store behind the [`StoreBreaker`]: check, run, then report the outcome.
pub struct GuardedStore<S> {
    inner: S,
    breaker: Arc<StoreBreaker>,
}

impl<S: AnalysisStore> GuardedStore<S> {
    pub fn new(inner: S, breaker: Arc<StoreBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: AnalysisStore> AnalysisStore for GuardedStore<S> {
    fn save(&self, output: &AnalysisOutput) -> Result<(), StoreError> {
        let decision = self.breaker.check();
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            tracing::warn!(run_id = output.run_id(), %reason, "Save skipped: store paused");
            return Err(StoreError::Paused(reason));
        }

        match self.inner.save(output) {
            Ok(()) => {
                self.breaker.report_success();
                Ok(())
            }
            Err(e) => {
                let tripped = self.breaker.report(&e);
                tracing::warn!(run_id = output.run_id(), error = %e, tripped, "Save failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FlakyStore {
        message: &'static str,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(message: &'static str) -> Self {
            Self {
                message,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AnalysisStore for FlakyStore {
        fn save(&self, _output: &AnalysisOutput) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend(self.message.to_string()))
        }
    }

    fn output() -> AnalysisOutput {
        AnalysisOutput::failure("run-42", "no result")
    }

    #[test]
    fn json_dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(&dir.path().join("results")).unwrap();
        store.save(&output()).unwrap();

        let loaded = store.load("run-42").unwrap();
        assert_eq!(loaded["success"], false);
        assert_eq!(loaded["error"], "no result");
    }

    #[test]
    fn three_timeouts_pause_the_store() {
        let breaker = Arc::new(StoreBreaker::new(Duration::from_millis(40)));
        let store = GuardedStore::new(FlakyStore::new("connection timed out"), breaker.clone());

        for _ in 0..3 {
            assert!(matches!(store.save(&output()), Err(StoreError::Backend(_))));
        }
        assert!(matches!(store.save(&output()), Err(StoreError::Paused(_))));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.snapshot().skipped_queries, 1);

        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(store.save(&output()), Err(StoreError::Backend(_))));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn other_faults_never_pause() {
        let breaker = Arc::new(StoreBreaker::new(Duration::from_secs(30)));
        let store = GuardedStore::new(FlakyStore::new("disk full"), breaker.clone());

        for _ in 0..5 {
            assert!(matches!(store.save(&output()), Err(StoreError::Backend(_))));
        }
        assert_eq!(breaker.snapshot().total_pauses, 0);
    }

    #[test]
    fn success_resets_the_streak() {
        let dir = tempfile::tempdir().unwrap();
        let breaker = Arc::new(StoreBreaker::new(Duration::from_secs(30)));
        breaker.report(&"timeout");
        breaker.report(&"timeout");

        let store = GuardedStore::new(JsonDirStore::new(dir.path()).unwrap(), breaker.clone());
        store.save(&output()).unwrap();
        assert_eq!(breaker.snapshot().consecutive_timeouts, 0);
    }
}
