//! retstor - Write-Back Record Cache for Retained Memory
//!
//! A write-back cache for a fixed catalog of small persistent key/value
//! records, backed by retained memory (survives warm resets, cleared on
//! cold boot) and synchronized on demand with a slower non-volatile
//! key/value store. It sits between a storage-driver client and the slow
//! store so that reads after the first access never leave retained memory,
//! writes are buffered and coalesced, and flushes are batched per
//! namespace.
//!
//! # Data Flow
//!
//! ```text
//! driver → Intercept Surface → Cache Engine → Retained Store
//!                                   │
//!                 (cache miss / flush)
//!                                   ▼
//!                    Namespace Handles → Backing Store
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use retstor::{InMemoryNvStore, Intercept, Schema, SyncMode, WriteBackCache};
//!
//! let schema = Schema::builder()
//!     .record("sta.ssid", "nvs.net80211", 36)
//!     .record("sta.pmk", "nvs.net80211", 32)
//!     .record("log", "misc", 4)
//!     .build()
//!     .unwrap();
//!
//! let cache = Arc::new(WriteBackCache::new(schema, Arc::new(InMemoryNvStore::new())));
//!
//! cache.set("sta.ssid", b"home-ap").unwrap();
//! cache.save().unwrap(); // manual mode: flush on request
//!
//! // Hand the driver-facing surface to the host driver.
//! let surface = Intercept::new(cache.clone());
//! let ns = surface.open("nvs.net80211").unwrap();
//! let mut ssid = [0u8; 36];
//! let len = surface.get_blob(ns, "sta.ssid", &mut ssid).unwrap();
//! assert_eq!(&ssid[..len], b"home-ap");
//!
//! // Once startup settles, let driver-triggered commits keep the store
//! // current.
//! cache.set_mode(SyncMode::Auto).unwrap();
//! ```
//!
//! # Modules
//!
//! - [`schema`] - immutable record catalog and layout
//! - [`retained`] - retained value buffer and per-record metadata
//! - [`backend`] - backing non-volatile store contract
//! - [`cache`] - engine, mode controller, and driver intercept surface
//! - [`error`] - error types

pub mod backend;
pub mod cache;
pub mod error;
pub mod retained;
pub mod schema;

// Re-export commonly used types
pub use backend::{InMemoryNvStore, NvHandle, NvStore, NvStoreStats};
pub use cache::{CacheStats, Intercept, NsToken, SyncMode, WriteBackCache};
pub use error::{Error, Result};
pub use retained::{RecordState, RetainedImage, RetainedStore};
pub use schema::{NamespaceId, RecordDesc, Schema, SchemaBuilder, MAX_RECORD_SIZE};
