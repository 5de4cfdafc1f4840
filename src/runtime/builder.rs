//! Runtime construction.

use super::scheduler::Shared;
use super::{Handle, Runtime};
use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::tracing_compat::debug;
use std::sync::Arc;

/// Builder for a [`Runtime`].
///
/// # Example
///
/// ```ignore
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .thread_name_prefix("ingest")
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    worker_threads: usize,
    thread_name_prefix: String,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Creates a builder with one worker per available CPU.
    #[must_use]
    pub fn new() -> Self {
        let config = RuntimeConfig::default();
        Self {
            worker_threads: config.effective_worker_threads(),
            thread_name_prefix: config.thread_name_prefix,
        }
    }

    /// Creates a builder from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            worker_threads: config.effective_worker_threads(),
            thread_name_prefix: config.thread_name_prefix.clone(),
        }
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Sets the prefix used to name worker threads.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Starts the worker threads.
    pub fn build(self) -> Result<Runtime, Error> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".into()));
        }
        let shared = Arc::new(Shared::new());
        let mut workers = Vec::with_capacity(self.worker_threads);
        for index in 0..self.worker_threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{index}", self.thread_name_prefix))
                .spawn(move || worker_shared.run_worker(index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.begin_shutdown();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn(err.to_string()));
                }
            }
        }
        debug!(
            workers = self.worker_threads,
            prefix = %self.thread_name_prefix,
            "runtime started"
        );
        Ok(Runtime {
            handle: Handle { shared },
            workers,
        })
    }
}
