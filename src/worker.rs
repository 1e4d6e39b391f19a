//! Background jobs. One named thread per request; one active job per output path.

use crate::model::{BookRequest, CompiledBook};
use crate::orchestrator::{BookError, Observer, Orchestrator};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

/// Submits requests to background threads.
#[derive(Clone)]
pub struct JobRunner {
    orchestrator: Arc<Orchestrator>,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

/// A running job.
pub struct JobHandle {
    output_path: PathBuf,
    thread: JoinHandle<Result<CompiledBook, BookError>>,
}

/// Releases the output path when the job ends, however it ends.
struct PathClaim {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.path);
        }
    }
}

impl JobRunner {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::shared(Arc::new(orchestrator))
    }

    pub fn shared(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Output paths with a job in flight.
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.active
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Start `request` on its own thread. Fails with `OutputBusy` if another job already
    /// writes the same output path.
    pub fn submit(
        &self,
        request: BookRequest,
        observer: Box<dyn Observer>,
    ) -> Result<JobHandle, BookError> {
        let path = request.output_path.clone();
        let claim = self.claim(&path)?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let name = format!("bookgen-{}", path.display());
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _claim = claim;
                orchestrator.run(&request, observer.as_ref())
            })
            .map_err(|e| BookError::Worker(format!("could not start job: {}", e)))?;
        debug!(path = %path.display(), "job started");
        Ok(JobHandle {
            output_path: path,
            thread,
        })
    }

    fn claim(&self, path: &Path) -> Result<PathClaim, BookError> {
        let mut set = self
            .active
            .lock()
            .map_err(|_| BookError::Worker("job registry poisoned".to_string()))?;
        if !set.insert(path.to_path_buf()) {
            return Err(BookError::OutputBusy(path.to_path_buf()));
        }
        Ok(PathClaim {
            active: Arc::clone(&self.active),
            path: path.to_path_buf(),
        })
    }
}

impl JobHandle {
    /// Wait for the job to reach Done or Failed.
    pub fn join(self) -> Result<CompiledBook, BookError> {
        self.thread
            .join()
            .map_err(|_| BookError::Worker(format!("job for {} panicked", self.output_path.display())))?
    }
}
