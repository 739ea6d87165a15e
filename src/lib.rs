// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # PLFS Gateway
//!
//! A write-back caching RPC gateway in front of an append-only,
//! directory-per-namespace key/value store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RPC (line JSON)                        │
//! │  • append / append_batch / get / ping                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service facade                          │
//! │  • Mode check (ReadOnly / WriteOnly, fixed at startup)     │
//! │  • Namespace validation against the policy table           │
//! └─────────────────────────────────────────────────────────────┘
//!                │ cached ns                 │ uncached ns
//!                ▼                           │
//! ┌───────────────────────────────┐          │
//! │       Write-back cache        │          │
//! │  • one coarse lock            │          │
//! │  • drained every 5s           │          │
//! └───────────────────────────────┘          │
//!                │ drain                     │ direct
//!                ▼                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Backend handles (one per namespace)                │
//! │  • opened at startup, finalized + closed at shutdown       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plfs_gateway::{Gateway, GatewayConfig, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatewayConfig::default();
//!     let gateway = Gateway::start(&config, Arc::new(MemoryBackend::new()))
//!         .await
//!         .expect("Failed to start");
//!
//!     let service = gateway.service();
//!     service.append("services", "user1", "login").await.unwrap();
//!
//!     // Drains pending values, then finalizes and closes every namespace
//!     gateway.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`lifecycle`]: [`Gateway`] startup (with conversion) and shutdown
//! - [`service`]: mode-gated [`CacheService`] facade
//! - [`cache`]: [`WriteBackCache`]
//! - [`flusher`]: periodic drain task
//! - [`storage`]: backend traits and implementations
//! - [`rpc`]: line-delimited JSON transport

pub mod config;
pub mod policy;
pub mod storage;
pub mod registry;
pub mod cache;
pub mod flusher;
pub mod service;
pub mod lifecycle;
pub mod rpc;
pub mod metrics;

pub use config::{ConfigError, GatewayConfig};
pub use policy::NamespacePolicy;
pub use registry::HandleRegistry;
pub use cache::{CacheEntry, CacheKey, CacheSealed, FlushReport, KeyFlushStats, WriteBackCache};
pub use flusher::FlushScheduler;
pub use service::{BatchResult, CacheService, FailureKind, Mode, ServiceError};
pub use lifecycle::{Gateway, GatewayState, LifecycleError, ShutdownReport};
pub use storage::traits::{Backend, BackendError, BackendHandle, OpenMode};
pub use storage::memory::MemoryBackend;
pub use storage::log_dir::LogDirBackend;
