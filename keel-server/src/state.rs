//! Shared handler state

use keel_engine::{CancelHandle, Engine};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub pool: SqlitePool,
    /// Directory of `<name>.lua` definitions
    pub pipelines_dir: PathBuf,
    /// Cancel handles of runs still executing on this server
    active: Arc<Mutex<HashMap<Uuid, CancelHandle>>>,
    /// Background executions, awaited on shutdown
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl AppState {
    pub fn new(engine: Engine, pool: SqlitePool, pipelines_dir: PathBuf) -> Self {
        Self {
            engine,
            pool,
            pipelines_dir,
            active: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Runs an execution in the background, tracked until it completes
    pub fn spawn_run<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Waits up to `grace` for tracked executions to finish
    ///
    /// Returns how many were still running when the bound expired; those are
    /// dropped.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        let all = async {
            while tasks.join_next().await.is_some() {}
        };
        match tokio::time::timeout(grace, all).await {
            Ok(()) => 0,
            Err(_) => tasks.len(),
        }
    }

    pub fn register(&self, run_id: Uuid, handle: CancelHandle) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, handle);
    }

    pub fn finish(&self, run_id: Uuid) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_id);
    }

    /// Requests cancellation; false when the run is not active here
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for handle in active.values() {
            handle.cancel();
        }
        active.len()
    }

    pub fn active_runs(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
