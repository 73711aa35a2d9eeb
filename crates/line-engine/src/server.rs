//! # Line Engine Server
//!
//! Owns the periodic work of a [`LineEngine`]: the queue drain, both health
//! sweeps, idle reclamation and the load-balancing sweep. Each loop runs on
//! its own tokio task and each sweep sits behind a single-flight guard, so a
//! slow sweep never overlaps with itself.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  LineEngineServer                    │
//! ├──────────┬──────────┬───────────┬─────────┬──────────┤
//! │  queue   │  health  │  health   │  idle   │ balance  │
//! │  drain   │  full    │  targeted │ reclaim │  sweep   │
//! │   5s     │  30min   │   15s     │   1h    │   5min   │
//! ├──────────┴──────────┴───────────┴─────────┴──────────┤
//! │                     LineEngine                       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use linepool_line_engine::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut server = LineEngineServerBuilder::new()
//!     .with_config(LineEngineConfig::default())
//!     .offline()
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! // ... serve traffic through server.engine() ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::LineEngineConfig;
use crate::error::{LineEngineError, Result};
use crate::integration::Collaborators;
use crate::orchestrator::LineEngine;
use crate::scheduler::spawn_periodic;

/// Runs a [`LineEngine`] and its periodic tasks
pub struct LineEngineServer {
    /// The core line engine
    engine: Arc<LineEngine>,

    /// Server configuration
    config: LineEngineConfig,

    /// Handles to the periodic loops, in start order
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl LineEngineServer {
    /// Create a server with the given configuration and collaborators
    pub async fn new(config: LineEngineConfig, collaborators: Collaborators) -> Result<Self> {
        let engine = LineEngine::new(config.clone(), collaborators).await?;
        info!("✅ Line engine initialized");
        Ok(Self::from_engine(engine))
    }

    /// Wrap an already built engine
    pub fn from_engine(engine: Arc<LineEngine>) -> Self {
        Self {
            config: engine.config().clone(),
            engine,
            handles: Vec::new(),
        }
    }

    /// Start every periodic loop
    pub async fn start(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(LineEngineError::internal("server already started"));
        }
        if !self.engine.database().health_check().await? {
            return Err(LineEngineError::internal("database health check failed"));
        }

        let engine = Arc::clone(&self.engine);
        self.spawn("queue-drain", self.config.queue.process_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                match engine.drain_queue().await {
                    Ok(report) if !report.assigned.is_empty() || report.expired > 0 => {
                        debug!(
                            "📋 Queue drain: {} assigned, {} expired, {} failed",
                            report.assigned.len(),
                            report.expired,
                            report.failed
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("❌ Queue drain failed: {}", e),
                }
            }
        });

        let engine = Arc::clone(&self.engine);
        self.spawn("health-full-sweep", self.config.health.full_sweep_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                if let Err(e) = engine.run_full_sweep().await {
                    error!("❌ Full health sweep failed: {}", e);
                }
            }
        });

        let engine = Arc::clone(&self.engine);
        self.spawn("health-targeted-sweep", self.config.health.targeted_sweep_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                if let Err(e) = engine.run_targeted_sweep().await {
                    error!("❌ Targeted health sweep failed: {}", e);
                }
            }
        });

        let engine = Arc::clone(&self.engine);
        self.spawn("idle-reclamation", self.config.health.idle_sweep_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                match engine.run_idle_reclamation().await {
                    Ok(report) if !report.released.is_empty() => {
                        info!("💤 Idle reclamation released {} bindings", report.released.len());
                    }
                    Ok(_) => {}
                    Err(e) => error!("❌ Idle reclamation failed: {}", e),
                }
            }
        });

        if self.config.balancer.enabled {
            let engine = Arc::clone(&self.engine);
            self.spawn("load-balance", self.config.balancer.interval(), move || {
                let engine = Arc::clone(&engine);
                async move {
                    if let Err(e) = engine.run_balance_sweep().await {
                        error!("❌ Load balance sweep failed: {}", e);
                    }
                }
            });
        } else {
            info!("⚖️ Load balancer disabled");
        }

        info!("✅ Line engine server started with {} periodic tasks", self.handles.len());
        Ok(())
    }

    fn spawn<F, Fut>(&mut self, name: &'static str, period: std::time::Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name, spawn_periodic(name, period, tick)));
    }

    /// Stop every periodic loop; a sweep in flight is aborted at its next await
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping line engine server...");

        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
            debug!("🛑 Stopped {} loop", name);
        }

        info!("✅ Line engine server stopped");
        Ok(())
    }

    /// Whether the periodic loops are running
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Get a reference to the engine
    pub fn engine(&self) -> &Arc<LineEngine> {
        &self.engine
    }

    pub fn config(&self) -> &LineEngineConfig {
        &self.config
    }
}

/// Builder for LineEngineServer with fluent API
pub struct LineEngineServerBuilder {
    config: Option<LineEngineConfig>,
    collaborators: Option<Collaborators>,
    offline: bool,
}

impl LineEngineServerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: None,
            collaborators: None,
            offline: false,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: LineEngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use explicit collaborators
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Use the in-process collaborators: static probe, no notifications
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Use an in-memory database
    pub fn with_in_memory_database(mut self) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.database.database_url = "sqlite::memory:".to_string();
        self.config = Some(config);
        self
    }

    /// Build the server
    pub async fn build(self) -> Result<LineEngineServer> {
        let config = self
            .config
            .ok_or_else(|| LineEngineError::config("Configuration not provided"))?;

        let collaborators = match self.collaborators {
            Some(collaborators) => collaborators,
            None if self.offline => Collaborators::offline(&config),
            None => Collaborators::from_config(&config)?,
        };

        LineEngineServer::new(config, collaborators).await
    }
}

impl Default for LineEngineServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
