//! Write-Back Cache
//!
//! The engine, mode controller, and driver intercept surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Intercept Surface                          │
//! │   open/close · typed get/set · blob get/set · erase · commit     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                        Cache Engine                              │
//! │  ┌────────────────┐  ┌──────────────┐  ┌─────────────────────┐   │
//! │  │ Retained Store │  │ Mode (manual │  │ Namespace Handles   │   │
//! │  │ bytes + states │  │ / auto)      │  │ (lazily opened)     │   │
//! │  └────────────────┘  └──────────────┘  └─────────────────────┘   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                 Backing Non-Volatile Store                       │
//! │        get / set / erase / commit, one handle per namespace      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads after the first access never touch the backing store; writes are
//! coalesced in retained memory and flushed per namespace on save (manual
//! mode) or on driver-triggered commits (auto mode).

mod engine;
mod intercept;
mod mode;

mod proptest;

pub use engine::{CacheStats, WriteBackCache};
pub use intercept::{Intercept, NsToken};
pub use mode::SyncMode;
