// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backends for the append-only directory store.
//!
//! - [`memory::MemoryBackend`]: process-local store, used by tests and the
//!   `memory` backend of the binary
//! - [`log_dir::LogDirBackend`]: one directory per namespace on local disk

pub mod traits;
pub mod memory;
pub mod log_dir;
