// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gateway lifecycle: startup, shutdown.
//!
//! ```text
//! Created → [Converting] → Opening → Running → ShuttingDown → Stopped
//! ```
//!
//! Startup opens one backend handle per registered namespace, in the mode
//! implied by the process [`Mode`]. A read-mode start with `conversion` set
//! first opens each namespace for write, finalizes it and closes it, so a
//! directory left unsealed by a dead writer can be read.
//!
//! Shutdown stops the flush task, drains the cache one last time (write
//! mode), and only then finalizes and closes every handle. Finalizing
//! before the drain would drop every value still buffered in memory.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache::{FlushReport, WriteBackCache};
use crate::config::GatewayConfig;
use crate::flusher::FlushScheduler;
use crate::registry::HandleRegistry;
use crate::service::{CacheService, Mode};
use crate::storage::traits::{Backend, BackendError, BackendHandle, OpenMode};

/// Gateway lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Nothing opened yet
    Created,
    /// Finalizing namespaces through write handles before a read-mode open
    Converting,
    /// Opening namespace handles
    Opening,
    /// Serving requests
    Running,
    /// Draining and closing handles
    ShuttingDown,
    /// All handles closed
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Converting => write!(f, "Converting"),
            Self::Opening => write!(f, "Opening"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Startup failure. The process must not serve traffic after one.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to open namespace '{namespace}' for {mode}: {source}")]
    Open {
        namespace: String,
        mode: OpenMode,
        source: BackendError,
    },
    #[error("Failed to convert namespace '{namespace}' for reading: {source}")]
    Conversion { namespace: String, source: BackendError },
}

/// What shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Final drain (write mode only)
    pub final_flush: Option<FlushReport>,
    /// Values still pending after the final drain
    pub unflushed: usize,
    /// Handles closed successfully
    pub closed: usize,
    /// Finish/close calls that failed
    pub errors: usize,
}

/// A started gateway: open handles, cache, service and flush task.
pub struct Gateway {
    mode: Mode,
    handles: Arc<HandleRegistry>,
    cache: Arc<WriteBackCache>,
    service: Arc<CacheService>,
    flusher: Option<FlushScheduler>,
    state: watch::Sender<GatewayState>,
}

impl Gateway {
    /// Open every namespace and start serving.
    ///
    /// Any open or conversion failure aborts startup; handles opened so far
    /// are closed before the error is returned.
    #[tracing::instrument(skip_all, fields(mode = %config.mode(), conversion = config.conversion))]
    pub async fn start(config: &GatewayConfig, backend: Arc<dyn Backend>) -> Result<Self, LifecycleError> {
        let startup_start = Instant::now();
        let (state, _) = watch::channel(GatewayState::Created);
        let mode = config.mode();
        let policy = config.policy();
        info!(namespaces = policy.len(), "Starting gateway");

        // ========== PHASE 1: One-time conversion ==========
        if config.conversion {
            if mode == Mode::ReadOnly {
                let phase_start = Instant::now();
                set_state(&state, GatewayState::Converting);
                for namespace in policy.namespaces() {
                    convert(backend.as_ref(), namespace).await?;
                }
                crate::metrics::record_startup_phase("conversion", phase_start.elapsed());
            } else {
                warn!("Conversion requested in write mode, ignoring");
            }
        }

        // ========== PHASE 2: Open handles ==========
        let phase_start = Instant::now();
        set_state(&state, GatewayState::Opening);
        let open_mode = mode.open_mode();
        let mut opened: Vec<Arc<dyn BackendHandle>> = Vec::with_capacity(policy.len());
        for namespace in policy.namespaces() {
            match backend.open(namespace, open_mode).await {
                Ok(handle) => {
                    info!(namespace, mode = %open_mode, "Namespace opened");
                    opened.push(handle);
                }
                Err(source) => {
                    error!(namespace, mode = %open_mode, error = %source, "Failed to open namespace");
                    crate::metrics::record_backend_error(namespace, "open");
                    close_all(&opened).await;
                    return Err(LifecycleError::Open {
                        namespace: namespace.to_string(),
                        mode: open_mode,
                        source,
                    });
                }
            }
        }
        crate::metrics::record_startup_phase("open", phase_start.elapsed());

        // ========== PHASE 3: Wire up cache, service and flusher ==========
        let handles = Arc::new(HandleRegistry::new(opened));
        let cache = Arc::new(WriteBackCache::new());
        let service = Arc::new(CacheService::new(mode, policy, Arc::clone(&handles), Arc::clone(&cache)));

        // A read-only process never buffers writes
        let flusher = (mode == Mode::WriteOnly).then(|| {
            FlushScheduler::start(Arc::clone(&cache), Arc::clone(&handles), config.flush_interval())
        });

        set_state(&state, GatewayState::Running);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(handles = handles.len(), "Gateway running");

        Ok(Self {
            mode,
            handles,
            cache,
            service,
            flusher,
            state,
        })
    }

    #[must_use]
    pub fn service(&self) -> Arc<CacheService> {
        Arc::clone(&self.service)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<WriteBackCache> {
        &self.cache
    }

    #[must_use]
    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<GatewayState> {
        self.state.subscribe()
    }

    /// Serve RPC on `listener` until `signal` resolves, then stop accepting
    /// requests and shut down.
    ///
    /// Shutdown runs whether `signal` succeeded or not; its result is handed
    /// back next to the report.
    pub async fn serve_until<S>(self, listener: TcpListener, signal: S) -> (ShutdownReport, std::io::Result<()>)
    where
        S: Future<Output = std::io::Result<()>>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(crate::rpc::serve(listener, self.service(), stop_rx));

        let signal = signal.await;
        match &signal {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed waiting for shutdown signal, shutting down"),
        }

        let _ = stop_tx.send(true);
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "RPC server failed"),
            Err(e) => error!(error = %e, "RPC server task panicked"),
        }

        (self.shutdown().await, signal)
    }

    /// Drain now instead of waiting for the next scheduled cycle.
    pub async fn flush_now(&self) -> FlushReport {
        self.cache.drain_pending(&self.handles).await
    }

    /// Drain, finalize and close everything.
    ///
    /// Failures are logged and counted, never returned: shutdown always
    /// walks every handle.
    #[tracing::instrument(skip(self), fields(mode = %self.mode))]
    pub async fn shutdown(mut self) -> ShutdownReport {
        let shutdown_start = Instant::now();
        info!("Initiating gateway shutdown...");
        set_state(&self.state, GatewayState::ShuttingDown);
        // No request may buffer a value the final drain would miss
        self.cache.seal();

        if let Some(flusher) = self.flusher.take() {
            flusher.stop().await;
        }

        let mut report = ShutdownReport::default();

        if self.mode == Mode::WriteOnly {
            let pending = self.cache.pending_count();
            info!(pending, "Final drain before closing handles");
            let flush = self.cache.drain_pending(&self.handles).await;
            report.unflushed = self.cache.pending_count();
            if report.unflushed > 0 {
                error!(unflushed = report.unflushed, "Values could not be flushed before shutdown");
            }
            report.final_flush = Some(flush);
        }

        for (namespace, handle) in self.handles.iter() {
            if handle.mode() == OpenMode::Write {
                if let Err(e) = handle.finish().await {
                    warn!(namespace, error = %e, "Failed to finalize namespace");
                    crate::metrics::record_backend_error(namespace, "finish");
                    report.errors += 1;
                }
            }
            match handle.close().await {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(namespace, error = %e, "Failed to close namespace");
                    crate::metrics::record_backend_error(namespace, "close");
                    report.errors += 1;
                }
            }
        }

        set_state(&self.state, GatewayState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!(closed = report.closed, errors = report.errors, "Gateway shutdown complete");
        report
    }
}

fn set_state(state: &watch::Sender<GatewayState>, next: GatewayState) {
    state.send_replace(next);
    crate::metrics::set_gateway_state(&next.to_string());
}

/// Open for write, finalize, close.
async fn convert(backend: &dyn Backend, namespace: &str) -> Result<(), LifecycleError> {
    let fail = |source| LifecycleError::Conversion {
        namespace: namespace.to_string(),
        source,
    };

    let handle = backend.open(namespace, OpenMode::Write).await.map_err(fail)?;
    let finished = handle.finish().await;
    let closed = handle.close().await;
    finished.map_err(fail)?;
    closed.map_err(fail)?;

    info!(namespace, "Namespace converted for reading");
    Ok(())
}

async fn close_all(handles: &[Arc<dyn BackendHandle>]) {
    for handle in handles {
        if let Err(e) = handle.close().await {
            warn!(namespace = handle.namespace(), error = %e, "Failed to close handle during aborted startup");
        }
    }
}
