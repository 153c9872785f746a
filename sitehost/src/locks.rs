//! Per-project operation locks
//!
//! Deploy, removal and file saves are writers: only one may claim a project
//! at a time, and a second claim is refused with `ProjectBusy` instead of
//! queueing.
//! A claimed writer then waits for in-flight readers (a listing or a console
//! command, itself bounded by the console timeout) before it proceeds.
//! Readers never wait: they are turned away while a writer holds or waits
//! for the project.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as ClaimLock, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::errors::HostError;

pub type SharedGuard = OwnedRwLockReadGuard<()>;

/// Held for the whole of a deploy, removal or file save
#[derive(Debug)]
pub struct ExclusiveGuard {
    _access: OwnedRwLockWriteGuard<()>,
    _claim: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
struct ProjectLock {
    /// Single-flight between writers
    claim: Arc<ClaimLock<()>>,

    /// Writers against readers
    access: Arc<RwLock<()>>,
}

#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<ProjectLock>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, project: &str) -> Result<Arc<ProjectLock>, HostError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| HostError::Internal("project lock table poisoned".into()))?;
        Ok(locks.entry(project.to_string()).or_default().clone())
    }

    /// Claim a project for writing.
    ///
    /// Fails at once if another writer has it; otherwise waits for current
    /// readers to finish.
    pub async fn exclusive(&self, project: &str) -> Result<ExclusiveGuard, HostError> {
        let lock = self.lock_for(project)?;
        let claim = lock
            .claim
            .clone()
            .try_lock_owned()
            .map_err(|_| HostError::ProjectBusy(project.to_string()))?;
        // A queued writer takes the free permits, so new readers are refused from here on
        let access = lock.access.clone().write_owned().await;
        Ok(ExclusiveGuard {
            _access: access,
            _claim: claim,
        })
    }

    /// Claim a project for reading; fails while a deploy or removal holds it
    pub fn try_shared(&self, project: &str) -> Result<SharedGuard, HostError> {
        self.lock_for(project)?
            .access
            .clone()
            .try_read_owned()
            .map_err(|_| HostError::ProjectBusy(project.to_string()))
    }
}
