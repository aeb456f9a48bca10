//! Shared application state for the control server.

use std::path::PathBuf;
use std::sync::Arc;

use sandbox::engine::Engine;
use sandbox::io::init::SandboxPaths;
use sandbox::io::pending::PendingQueue;
use sandbox::scheduler::SchedulerContext;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients when sandbox files change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new execution record appeared in `logs/`.
    LogAdded { file: String },
    ProjectsChanged,
    PendingChanged,
    ConfigChanged,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<SandboxPaths>,
    pub engine: Arc<Engine>,
    pub queue: PendingQueue,
    /// Idle clock and stop flag of the background scheduler.
    pub scheduler: Arc<SchedulerContext>,
    /// Broadcast sender for file change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(
        paths: SandboxPaths,
        engine: Arc<Engine>,
        queue: PendingQueue,
        scheduler: Arc<SchedulerContext>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            paths: Arc::new(paths),
            engine,
            queue,
            scheduler,
            event_tx: Arc::new(event_tx),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.paths.logs_dir.clone()
    }

    pub fn files_dir(&self) -> PathBuf {
        self.paths.files_dir.clone()
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.paths.pending_dir.clone()
    }

    pub fn config_path(&self) -> PathBuf {
        self.paths.config_path.clone()
    }
}
