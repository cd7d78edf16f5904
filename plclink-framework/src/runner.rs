//! Runner for link lifecycle management.

use std::future::Future;

use tokio::signal;
use tokio::task::JoinHandle;

use crate::engine::EngineHandle;
use crate::status::LinkStatus;

/// Runner that manages the lifecycle of several links.
///
/// Handles:
/// - Tracking one polling engine per link
/// - Spawning and tracking consumer tasks
/// - Graceful shutdown on Ctrl+C: every engine finishes its in-flight cycle
///   and closes its connection before consumer tasks are aborted
///
/// # Example
///
/// ```ignore
/// let mut runner = LinkRunner::new("plclink-modbus");
///
/// for link in &config.links {
///     let registry = LinkRegistry::new(DeviceFamily::ALL);
///     let engine = PollingEngine::new(&link.name, adapter, registry.clone(), period);
///     runner.add_engine(engine.spawn());
/// }
///
/// runner.run().await;
/// ```
pub struct LinkRunner {
    /// Application name for logging.
    name: String,
    /// Application version.
    version: String,
    /// Running engines, one per link.
    engines: Vec<EngineHandle>,
    /// Spawned consumer tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl LinkRunner {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        tracing::info!(app = %name, version = %version, "Starting");

        Self {
            name,
            version,
            engines: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Get the application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Track a started engine.
    pub fn add_engine(&mut self, engine: EngineHandle) {
        self.engines.push(engine);
    }

    /// Number of tracked engines.
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Current status of every tracked link.
    pub fn statuses(&self) -> Vec<LinkStatus> {
        self.engines
            .iter()
            .map(EngineHandle::current_status)
            .collect()
    }

    /// Spawn a consumer task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run until Ctrl+C is received, then shut down.
    pub async fn run(self) {
        tracing::info!(
            app = %self.name,
            links = self.engines.len(),
            tasks = self.tasks.len(),
            "Running. Press Ctrl+C to stop."
        );

        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }

        tracing::info!(app = %self.name, "Received shutdown signal");

        self.shutdown().await;
    }

    /// Stop all engines, then abort consumer tasks.
    pub async fn shutdown(self) {
        for engine in self.engines {
            let link = engine.link().to_string();
            let status = engine.status();
            engine.stop().await;

            let status = status.borrow();
            tracing::info!(
                link = %link,
                cycles = status.cycles,
                failed_cycles = status.failed_cycles,
                "Link stopped"
            );
        }

        for task in &self.tasks {
            task.abort();
        }

        tracing::info!(app = %self.name, "Goodbye!");
    }
}
