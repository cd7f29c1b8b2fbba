//! Process-shared key/value storage and periodic scheduling.
//!
//! Single-process hosts use [`InMemoryStorage`]; multi-worker deployments
//! implement [`SharedStorage`] over whatever they share between workers.
//! `schedule` reports whether this worker became the one running the task,
//! so periodic maintenance runs once per deployment rather than once per
//! worker.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Key/value storage shared by all workers of a deployment.
pub trait SharedStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);

    /// Runs `task` every `every`, if this worker is the scheduling one.
    ///
    /// Returns whether the task was accepted here.
    fn schedule(&self, every: Duration, task: Box<dyn Fn() + Send + Sync>) -> bool;
}

/// Storage for single-process deployments.
///
/// There is only one worker, so it always takes the scheduled tasks. Task
/// threads run for the rest of the process lifetime.
#[derive(Default)]
pub struct InMemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn schedule(&self, every: Duration, task: Box<dyn Fn() + Send + Sync>) -> bool {
        thread::Builder::new()
            .name("metanet-schedule".to_string())
            .spawn(move || loop {
                thread::sleep(every);
                task();
            })
            .is_ok()
    }
}
