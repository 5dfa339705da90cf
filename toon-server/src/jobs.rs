use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Collections with an image batch running in the background.
///
/// At most one batch runs per collection. The slot is held by a [`JobGuard`]
/// and released when the guard drops, whether the batch finished or panicked.
#[derive(Clone, Default)]
pub struct BatchJobs {
    running: Arc<Mutex<HashSet<String>>>,
}

impl BatchJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for `id`, or `None` when a batch for it is already running.
    pub fn try_start(&self, id: &str) -> Option<JobGuard> {
        if !self.lock().insert(id.to_string()) {
            return None;
        }
        Some(JobGuard {
            jobs: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn any_running(&self) -> bool {
        !self.lock().is_empty()
    }
}

pub struct JobGuard {
    jobs: BatchJobs,
    id: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.id);
    }
}
