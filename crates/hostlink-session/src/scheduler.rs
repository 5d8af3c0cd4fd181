//! The logical thread.
//!
//! A current-thread runtime drives a [`LocalSet`]: every continuation of the
//! session runs on the thread that called [`Scheduler::block_on`], one at a
//! time, and only yields at `.await` points. Session state can therefore live
//! in `Rc`/`RefCell`/`Cell` without locks.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinHandle, LocalSet};

use crate::error::{Result, SessionError};

pub struct Scheduler {
    runtime: Runtime,
    local: LocalSet,
}

impl Scheduler {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(SessionError::Scheduler)?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
        })
    }

    /// Drive `future` and every spawned continuation until `future` completes.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.local.block_on(&self.runtime, future)
    }

    /// Queue a continuation on the logical thread.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
