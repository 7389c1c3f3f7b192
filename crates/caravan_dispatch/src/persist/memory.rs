use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::persister::SolutionStore;
use super::solution::SolutionPayload;

/// In-memory `SolutionStore` for tests and the CLI. Solution ids are
/// `sol-<n>`; lineage copies are recorded so callers can inspect them.
#[derive(Default)]
pub struct InMemorySolutionStore {
    counter: AtomicU64,
    solutions: Mutex<HashMap<String, SolutionPayload>>,
    assignment_copies: Mutex<Vec<(String, String)>>,
    fail_assignment_copy: bool,
}

impl InMemorySolutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose driver-assignment copies always fail, for exercising the
    /// non-fatal carry-forward path.
    pub fn failing_assignment_copy() -> Self {
        InMemorySolutionStore {
            fail_assignment_copy: true,
            ..Self::default()
        }
    }

    pub fn get(&self, solution_id: &str) -> Option<SolutionPayload> {
        self.solutions.lock().get(solution_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.solutions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.lock().is_empty()
    }

    pub fn assignment_copies(&self) -> Vec<(String, String)> {
        self.assignment_copies.lock().clone()
    }
}

#[async_trait]
impl SolutionStore for InMemorySolutionStore {
    async fn store(&self, payload: &SolutionPayload) -> Result<String, anyhow::Error> {
        let id = format!("sol-{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        self.solutions.lock().insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn copy_driver_assignments(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), anyhow::Error> {
        if self.fail_assignment_copy {
            anyhow::bail!("assignment copy rejected");
        }
        if !self.solutions.lock().contains_key(parent_id) {
            anyhow::bail!("parent solution {parent_id} not found");
        }
        self.assignment_copies
            .lock()
            .push((parent_id.to_owned(), child_id.to_owned()));
        Ok(())
    }
}
