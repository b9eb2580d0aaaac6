//! Backing Store Contract
//!
//! The slow non-volatile store the cache synchronizes with. The store is an
//! opaque collaborator: it offers get/set/erase/commit over named
//! namespaces, distinguishes "not found" from failure, and promises nothing
//! about its internal format or durability mechanics.
//!
//! [`InMemoryNvStore`] is the reference implementation, used by the test
//! suites and by deployments that want cache semantics without a real
//! non-volatile medium underneath.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Handle to an open backing-store namespace (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NvHandle(pub u64);

impl NvHandle {
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Backing non-volatile store.
///
/// All operations are synchronous and complete before returning; there is
/// no cancellation path. `open` is idempotent for the process lifetime and
/// handles are never closed individually.
pub trait NvStore: Send + Sync {
    /// Open a namespace, returning a stable handle.
    fn open(&self, namespace: &str) -> Result<NvHandle>;

    /// Read a key's value into `out`, returning the stored length, or
    /// `Ok(None)` when the key is absent.
    fn get(&self, handle: NvHandle, key: &str, out: &mut [u8]) -> Result<Option<usize>>;

    /// Write a key's value.
    fn set(&self, handle: NvHandle, key: &str, data: &[u8]) -> Result<()>;

    /// Erase a key, returning `Ok(false)` when it was already absent.
    fn erase(&self, handle: NvHandle, key: &str) -> Result<bool>;

    /// Make previous writes in this namespace durable.
    fn commit(&self, handle: NvHandle) -> Result<()>;
}

/// Operation counters for an [`InMemoryNvStore`].
#[derive(Debug, Clone, Default)]
pub struct NvStoreStats {
    /// Read operations (including misses)
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Erase operations (including already-absent)
    pub erases: u64,
    /// Commit operations across all namespaces
    pub commits: u64,
}

struct NamespaceEntry {
    name: String,
    map: DashMap<String, Bytes>,
    commits: AtomicU64,
}

/// In-memory backing store.
///
/// Namespace handles index an append-only table, so `open` returns the
/// same handle for the same name for the process lifetime.
pub struct InMemoryNvStore {
    namespaces: RwLock<Vec<Arc<NamespaceEntry>>>,
    reads: AtomicU64,
    writes: AtomicU64,
    erases: AtomicU64,
    commits: AtomicU64,
}

impl Default for InMemoryNvStore {
    fn default() -> Self {
        Self {
            namespaces: RwLock::new(Vec::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            erases: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }
}

impl InMemoryNvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, handle: NvHandle) -> Result<Arc<NamespaceEntry>> {
        self.namespaces
            .read()
            .get(handle.index())
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown namespace handle {}", handle.0)))
    }

    fn entry_by_name(&self, namespace: &str) -> Option<Arc<NamespaceEntry>> {
        self.namespaces
            .read()
            .iter()
            .find(|e| e.name == namespace)
            .cloned()
    }

    /// Seed a value directly, bypassing the cache (test setup helper).
    pub fn seed(&self, namespace: &str, key: &str, data: &[u8]) {
        let mut guard = self.namespaces.write();
        let entry = match guard.iter().find(|e| e.name == namespace) {
            Some(entry) => entry.clone(),
            None => {
                let entry = Arc::new(NamespaceEntry {
                    name: namespace.to_string(),
                    map: DashMap::new(),
                    commits: AtomicU64::new(0),
                });
                guard.push(entry.clone());
                entry
            }
        };
        entry.map.insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    /// Current stored value for a key, if any.
    pub fn value(&self, namespace: &str, key: &str) -> Option<Bytes> {
        self.entry_by_name(namespace)
            .and_then(|e| e.map.get(key).map(|v| v.value().clone()))
    }

    /// Whether a key currently exists in a namespace.
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.entry_by_name(namespace)
            .map(|e| e.map.contains_key(key))
            .unwrap_or(false)
    }

    /// Number of commits issued against a namespace.
    pub fn commit_count(&self, namespace: &str) -> u64 {
        self.entry_by_name(namespace)
            .map(|e| e.commits.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of the global operation counters.
    pub fn stats(&self) -> NvStoreStats {
        NvStoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            erases: self.erases.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

impl NvStore for InMemoryNvStore {
    fn open(&self, namespace: &str) -> Result<NvHandle> {
        let mut guard = self.namespaces.write();
        if let Some(i) = guard.iter().position(|e| e.name == namespace) {
            return Ok(NvHandle(i as u64));
        }
        guard.push(Arc::new(NamespaceEntry {
            name: namespace.to_string(),
            map: DashMap::new(),
            commits: AtomicU64::new(0),
        }));
        Ok(NvHandle((guard.len() - 1) as u64))
    }

    fn get(&self, handle: NvHandle, key: &str, out: &mut [u8]) -> Result<Option<usize>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry(handle)?;

        let result = match entry.map.get(key) {
            Some(value) => {
                if value.len() > out.len() {
                    return Err(Error::Backend(format!(
                        "stored value for '{}' is {} bytes, buffer holds {}",
                        key,
                        value.len(),
                        out.len()
                    )));
                }
                out[..value.len()].copy_from_slice(value.value());
                Ok(Some(value.len()))
            }
            None => Ok(None),
        };
        result
    }

    fn set(&self, handle: NvHandle, key: &str, data: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry(handle)?;
        entry.map.insert(key.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn erase(&self, handle: NvHandle, key: &str) -> Result<bool> {
        self.erases.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry(handle)?;
        Ok(entry.map.remove(key).is_some())
    }

    fn commit(&self, handle: NvHandle) -> Result<()> {
        self.commits.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry(handle)?;
        entry.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
