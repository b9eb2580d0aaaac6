//! Cache Engine
//!
//! Serves get/set/erase against the retained store, lazily pulling each
//! record from the backing store on first read, and batches dirty records
//! per namespace when flushing. One mutex covers every public operation
//! end to end: a commit blocks concurrent gets and sets on unrelated keys,
//! which is the intended granularity for a catalog of tens of records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::mode::SyncMode;
use crate::backend::{InMemoryNvStore, NvHandle, NvStore};
use crate::error::{Error, Result};
use crate::retained::{RecordState, RetainedImage, RetainedStore};
use crate::schema::{NamespaceId, Schema};

/// Snapshot of the engine's operation counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Gets served from already-valid retained state
    pub hits: u64,
    /// Gets that found no value
    pub misses: u64,
    /// Lazy loads issued to the backing store
    pub loads: u64,
    /// Records written or erased in the backing store by commits
    pub flushed_records: u64,
    /// Per-namespace commits issued to the backing store
    pub namespace_commits: u64,
}

/// Mutable state under the single exclusion scope.
struct Inner {
    store: RetainedStore,
    handles: Vec<Option<NvHandle>>,
    mode: SyncMode,
}

/// Write-back cache over a fixed record catalog.
pub struct WriteBackCache {
    schema: Schema,
    backend: Option<Arc<dyn NvStore>>,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    flushed: AtomicU64,
    commits: AtomicU64,
}

impl WriteBackCache {
    /// Create a cold-started cache over a backing store.
    pub fn new(schema: Schema, backend: Arc<dyn NvStore>) -> Self {
        Self::build(schema, None, Some(backend))
    }

    /// Create a cache adopting retained state preserved across a warm
    /// reset. An image that no longer matches the schema starts cold.
    pub fn with_retained(
        schema: Schema,
        image: RetainedImage,
        backend: Arc<dyn NvStore>,
    ) -> Self {
        Self::build(schema, Some(image), Some(backend))
    }

    /// Create a cache with the backing-store path configured off. The
    /// engine logic is unchanged; records live purely in retained memory,
    /// dirty tracking stays off, and commits have nothing to do.
    pub fn without_backend(schema: Schema) -> Self {
        Self::build(schema, None, None)
    }

    /// Create a cache over a fresh [`InMemoryNvStore`] (for testing).
    pub fn in_memory(schema: Schema) -> Self {
        Self::new(schema, Arc::new(InMemoryNvStore::new()))
    }

    fn build(
        schema: Schema,
        image: Option<RetainedImage>,
        backend: Option<Arc<dyn NvStore>>,
    ) -> Self {
        let store = match image {
            Some(image) => RetainedStore::warm(&schema, image),
            None => RetainedStore::cold(&schema),
        };
        let handles = vec![None; schema.namespace_count()];
        Self {
            schema,
            backend,
            inner: Mutex::new(Inner {
                store,
                handles,
                mode: SyncMode::default(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    /// The record catalog this cache serves.
    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Current synchronization mode.
    pub fn mode(&self) -> SyncMode {
        self.inner.lock().mode
    }

    /// Snapshot the retained state for carrying across a warm reset.
    pub fn retained_image(&self) -> RetainedImage {
        self.inner.lock().store.image()
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            flushed_records: self.flushed.load(Ordering::Relaxed),
            namespace_commits: self.commits.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &str) -> Result<usize> {
        self.schema.find(key).ok_or_else(|| {
            error!(key, "unknown record key");
            Error::InvalidArgument(format!("unknown record key '{}'", key))
        })
    }

    fn ensure_open(
        backend: &Arc<dyn NvStore>,
        schema: &Schema,
        handles: &mut [Option<NvHandle>],
        ns: NamespaceId,
    ) -> Result<NvHandle> {
        if let Some(handle) = handles[ns.index()] {
            return Ok(handle);
        }
        let name = schema.namespace_name(ns);
        debug!(namespace = name, "opening backing namespace");
        match backend.open(name) {
            Ok(handle) => {
                handles[ns.index()] = Some(handle);
                Ok(handle)
            }
            Err(e) => {
                error!(namespace = name, error = %e, "namespace open failed");
                Err(e)
            }
        }
    }

    /// Read a record's current value into `out`, returning the actual size.
    ///
    /// The first read of a record consults the backing store; afterwards
    /// reads are served from retained memory. Backing "not found" is cached
    /// as a valid empty record so absence does not re-trigger a fetch.
    pub fn get(&self, key: &str, out: &mut [u8]) -> Result<usize> {
        let index = self.lookup(key)?;
        let desc = self.schema.record(index);
        if desc.is_disabled() {
            debug!(key, "skipping get of disabled record");
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }

        let mut inner = self.inner.lock();
        let Inner { store, handles, .. } = &mut *inner;

        let mut fetched = false;
        if let Some(backend) = &self.backend {
            if !store.state(index).valid {
                let handle =
                    Self::ensure_open(backend, &self.schema, handles, desc.namespace)?;
                let (slot, state) = store.slot_mut(index, &self.schema);
                match backend.get(handle, &desc.key, slot) {
                    Ok(Some(len)) => {
                        if len != desc.max_size {
                            warn!(
                                key,
                                len,
                                max_size = desc.max_size,
                                "stored size differs from configured maximum"
                            );
                        }
                        *state = RecordState::loaded(len, false);
                    }
                    Ok(None) => {
                        // Cache the absence; the record is valid and empty.
                        *state = RecordState::loaded(0, false);
                    }
                    Err(e) => {
                        // Record stays invalid so the next get retries.
                        error!(key, error = %e, "backing load failed");
                        return Err(e);
                    }
                }
                self.loads.fetch_add(1, Ordering::Relaxed);
                fetched = true;
            }
        }

        let state = store.state(index);
        if !state.valid || state.size == 0 {
            debug!(key, "record has no value");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }

        let len = state.len();
        if out.len() < len {
            error!(key, capacity = out.len(), size = len, "caller buffer insufficient");
            return Err(Error::InvalidSize {
                key: key.to_string(),
                size: len,
                limit: out.len(),
            });
        }
        out[..len].copy_from_slice(store.value(index, &self.schema));
        if !fetched {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(len)
    }

    /// Buffer a record's new value in retained memory.
    ///
    /// Writing the byte-identical current value is a no-op that leaves the
    /// dirty flag untouched; the backing store is never accessed here.
    pub fn set(&self, key: &str, data: &[u8]) -> Result<()> {
        let index = self.lookup(key)?;
        let desc = self.schema.record(index);
        if desc.is_disabled() {
            // The record was compiled out; the write is accepted and dropped.
            debug!(key, size = data.len(), "dropping write to disabled record");
            return Ok(());
        }
        if data.len() > desc.max_size {
            error!(
                key,
                size = data.len(),
                max_size = desc.max_size,
                "value exceeds record maximum"
            );
            return Err(Error::InvalidSize {
                key: key.to_string(),
                size: data.len(),
                limit: desc.max_size,
            });
        }

        let mut inner = self.inner.lock();
        let (slot, state) = inner.store.slot_mut(index, &self.schema);
        let unchanged =
            state.valid && state.len() == data.len() && &slot[..data.len()] == data;
        if !unchanged {
            debug!(key, size = data.len(), "updating record");
            slot[..data.len()].copy_from_slice(data);
            *state = RecordState::loaded(data.len(), self.backend.is_some());
        }
        Ok(())
    }

    /// Erase a record. Idempotent; always succeeds for a known key.
    pub fn erase(&self, key: &str) -> Result<()> {
        let index = self.lookup(key)?;

        let mut inner = self.inner.lock();
        let state = inner.store.state_mut(index);
        // Only a previously present value makes the erase a backing-store
        // visible change.
        if state.valid && state.size > 0 && self.backend.is_some() {
            state.dirty = true;
        }
        state.size = 0;
        state.valid = true;
        debug!(key, "erased record");
        Ok(())
    }

    /// Explicit flush; only valid in manual mode.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.mode != SyncMode::Manual {
            return Err(Error::InvalidState("save is only valid in manual mode"));
        }
        self.do_save(&mut inner)
    }

    /// Change the synchronization mode.
    ///
    /// Entering auto mode flushes everything pending first, so no dirty
    /// record is left stranded before driver-triggered commits take over.
    pub fn set_mode(&self, mode: SyncMode) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.mode != mode {
            debug!(%mode, "switching synchronization mode");
            inner.mode = mode;
            if mode == SyncMode::Auto {
                return self.do_save(&mut inner);
            }
        }
        Ok(())
    }

    /// Commit request from the external driver; flushes only in auto mode.
    pub fn driver_commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.mode == SyncMode::Auto {
            self.do_save(&mut inner)
        } else {
            debug!("driver commit ignored in manual mode");
            Ok(())
        }
    }

    /// Flush every dirty persistent record, then commit each namespace
    /// whose backing content actually changed.
    ///
    /// A write or erase failure aborts the pass immediately; records
    /// flushed before it stay flushed. Namespace commit failures do not
    /// stop the commit loop - every altered namespace is attempted and the
    /// last error wins.
    fn do_save(&self, inner: &mut Inner) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let Inner { store, handles, .. } = inner;
        let mut ns_altered = vec![false; self.schema.namespace_count()];

        for index in 0..self.schema.len() {
            let desc = self.schema.record(index);
            let state = store.state(index);
            if !state.valid || !state.dirty || !desc.persist {
                continue;
            }
            debug!(
                key = %desc.key,
                namespace = %self.schema.namespace_name(desc.namespace),
                size = state.len(),
                "flushing dirty record"
            );
            let handle = Self::ensure_open(backend, &self.schema, handles, desc.namespace)?;

            let mut altered = true;
            if state.size > 0 {
                if let Err(e) = backend.set(handle, &desc.key, store.value(index, &self.schema)) {
                    error!(key = %desc.key, error = %e, "backing set failed");
                    return Err(e);
                }
            } else {
                match backend.erase(handle, &desc.key) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(key = %desc.key, "already erased");
                        altered = false;
                    }
                    Err(e) => {
                        error!(key = %desc.key, error = %e, "backing erase failed");
                        return Err(e);
                    }
                }
            }

            if altered {
                ns_altered[desc.namespace.index()] = true;
            }
            store.state_mut(index).dirty = false;
            self.flushed.fetch_add(1, Ordering::Relaxed);
        }

        let mut last_err = None;
        for (ns, altered) in ns_altered.into_iter().enumerate() {
            if !altered {
                continue;
            }
            // Opened above while flushing the records that altered it.
            let Some(handle) = handles[ns] else { continue };
            match backend.commit(handle) {
                Ok(()) => {
                    self.commits.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(
                        namespace = %self.schema.namespace_name(NamespaceId(ns)),
                        error = %e,
                        "namespace commit failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicBool;

    fn schema() -> Schema {
        Schema::builder()
            .record("alpha", "misc", 4)
            .record("beta", "misc", 8)
            .record("gamma", "net", 2)
            .disabled_record("ghost", "misc")
            .volatile_record("scratch", "misc", 4)
            .build()
            .unwrap()
    }

    fn cache_with_store() -> (WriteBackCache, Arc<InMemoryNvStore>) {
        let store = Arc::new(InMemoryNvStore::new());
        let cache = WriteBackCache::new(schema(), store.clone());
        (cache, store)
    }

    #[test]
    fn test_unknown_key_is_invalid_argument() {
        let (cache, _) = cache_with_store();
        let mut buf = [0u8; 4];

        assert_matches!(cache.get("nope", &mut buf), Err(Error::InvalidArgument(_)));
        assert_matches!(cache.set("nope", &[1]), Err(Error::InvalidArgument(_)));
        assert_matches!(cache.erase("nope"), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let (cache, _) = cache_with_store();

        cache.set("alpha", &[1, 2]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(cache.get("alpha", &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_get_lazily_loads_once() {
        let (cache, store) = cache_with_store();
        store.seed("misc", "alpha", &[9, 9, 9, 9]);

        let mut buf = [0u8; 4];
        assert_eq!(cache.get("alpha", &mut buf).unwrap(), 4);
        assert_eq!(buf, [9, 9, 9, 9]);
        assert_eq!(store.stats().reads, 1);

        // Served from retained memory now.
        cache.get("alpha", &mut buf).unwrap();
        cache.get("alpha", &mut buf).unwrap();
        assert_eq!(store.stats().reads, 1);
        assert_eq!(cache.stats().loads, 1);
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn test_backing_absence_is_cached() {
        let (cache, store) = cache_with_store();

        let mut buf = [0u8; 4];
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::NotFound { .. }));
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::NotFound { .. }));
        // Only the first miss consulted the backing store.
        assert_eq!(store.stats().reads, 1);
    }

    #[test]
    fn test_short_stored_value_loads_with_its_own_size() {
        let (cache, store) = cache_with_store();
        store.seed("misc", "beta", &[7, 7]);

        let mut buf = [0u8; 8];
        assert_eq!(cache.get("beta", &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[7, 7]);
    }

    #[test]
    fn test_get_buffer_too_small() {
        let (cache, _) = cache_with_store();
        cache.set("alpha", &[1, 2, 3]).unwrap();

        let mut buf = [0u8; 2];
        assert_matches!(
            cache.get("alpha", &mut buf),
            Err(Error::InvalidSize { size: 3, limit: 2, .. })
        );

        // The record itself is intact.
        let mut buf = [0u8; 4];
        assert_eq!(cache.get("alpha", &mut buf).unwrap(), 3);
    }

    #[test]
    fn test_oversized_set_rejected() {
        let (cache, _) = cache_with_store();

        assert_matches!(
            cache.set("alpha", &[0; 5]),
            Err(Error::InvalidSize { size: 5, limit: 4, .. })
        );
    }

    #[test]
    fn test_disabled_record_semantics() {
        let (cache, store) = cache_with_store();

        // Writes of any size are accepted and dropped.
        cache.set("ghost", &[1, 2, 3, 4, 5, 6]).unwrap();
        cache.set("ghost", &[]).unwrap();

        // Reads report no value without touching the backing store.
        let mut buf = [0u8; 4];
        assert_matches!(cache.get("ghost", &mut buf), Err(Error::NotFound { .. }));
        assert_eq!(store.stats().reads, 0);

        // Nothing became dirty, so a save flushes nothing.
        cache.save().unwrap();
        assert_eq!(cache.stats().flushed_records, 0);
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_identical_set_preserves_clean_state() {
        let (cache, store) = cache_with_store();

        cache.set("alpha", &[1, 2]).unwrap();
        cache.save().unwrap();
        assert_eq!(cache.stats().flushed_records, 1);

        // Same bytes, same size: stays clean, next save flushes nothing.
        cache.set("alpha", &[1, 2]).unwrap();
        cache.save().unwrap();
        assert_eq!(cache.stats().flushed_records, 1);
        assert_eq!(store.stats().writes, 1);

        // Different bytes dirty it again.
        cache.set("alpha", &[1, 3]).unwrap();
        cache.save().unwrap();
        assert_eq!(cache.stats().flushed_records, 2);
    }

    #[test]
    fn test_erase_of_absent_record_stays_clean() {
        let (cache, store) = cache_with_store();

        // Never loaded, never set: erase caches the absence without
        // marking anything dirty.
        cache.erase("alpha").unwrap();
        let mut buf = [0u8; 4];
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::NotFound { .. }));
        assert_eq!(store.stats().reads, 0);

        cache.save().unwrap();
        assert_eq!(store.stats().erases, 0);
        assert_eq!(store.stats().commits, 0);
    }

    #[test]
    fn test_erase_of_present_record_reaches_backing_store() {
        let (cache, store) = cache_with_store();

        cache.set("alpha", &[1, 2]).unwrap();
        cache.save().unwrap();
        assert!(store.contains("misc", "alpha"));

        cache.erase("alpha").unwrap();
        cache.save().unwrap();
        assert!(!store.contains("misc", "alpha"));

        let mut buf = [0u8; 4];
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_erase_is_idempotent() {
        let (cache, _) = cache_with_store();
        cache.set("alpha", &[1]).unwrap();

        cache.erase("alpha").unwrap();
        cache.erase("alpha").unwrap();
        cache.erase("alpha").unwrap();

        let mut buf = [0u8; 4];
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_volatile_record_never_flushed() {
        let (cache, store) = cache_with_store();

        cache.set("scratch", &[4, 5]).unwrap();
        cache.save().unwrap();

        assert!(!store.contains("misc", "scratch"));
        assert_eq!(cache.stats().flushed_records, 0);

        // Still readable from the cache.
        let mut buf = [0u8; 4];
        assert_eq!(cache.get("scratch", &mut buf).unwrap(), 2);
    }

    #[test]
    fn test_without_backend_round_trip() {
        let cache = WriteBackCache::without_backend(schema());

        cache.set("alpha", &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(cache.get("alpha", &mut buf).unwrap(), 3);

        // Unset records report no value instead of consulting a store.
        assert_matches!(cache.get("beta", &mut buf), Err(Error::NotFound { .. }));

        // Nothing is ever dirty, so flushing paths are trivial no-ops.
        cache.save().unwrap();
        cache.set_mode(SyncMode::Auto).unwrap();
        cache.driver_commit().unwrap();
        assert_eq!(cache.stats().flushed_records, 0);
    }

    #[test]
    fn test_save_requires_manual_mode() {
        let (cache, _) = cache_with_store();

        cache.set_mode(SyncMode::Auto).unwrap();
        assert_matches!(cache.save(), Err(Error::InvalidState(_)));

        cache.set_mode(SyncMode::Manual).unwrap();
        cache.save().unwrap();
    }

    #[test]
    fn test_driver_commit_ignored_in_manual_mode() {
        let (cache, store) = cache_with_store();

        cache.set("alpha", &[1]).unwrap();
        cache.driver_commit().unwrap();

        assert!(!store.contains("misc", "alpha"));
        assert_eq!(store.stats().commits, 0);
    }

    #[test]
    fn test_entering_auto_mode_flushes_pending() {
        let (cache, store) = cache_with_store();

        cache.set("alpha", &[1, 2]).unwrap();
        cache.set_mode(SyncMode::Auto).unwrap();

        assert!(store.contains("misc", "alpha"));
        assert_eq!(store.commit_count("misc"), 1);

        // Already auto: no-op, nothing new flushed.
        cache.set_mode(SyncMode::Auto).unwrap();
        assert_eq!(store.commit_count("misc"), 1);
    }

    #[test]
    fn test_failed_load_retries_on_next_get() {
        struct FailOnceStore {
            inner: InMemoryNvStore,
            fail_next: AtomicBool,
        }
        impl NvStore for FailOnceStore {
            fn open(&self, namespace: &str) -> Result<NvHandle> {
                self.inner.open(namespace)
            }
            fn get(&self, handle: NvHandle, key: &str, out: &mut [u8]) -> Result<Option<usize>> {
                if self.fail_next.swap(false, Ordering::SeqCst) {
                    return Err(Error::Backend("injected read failure".to_string()));
                }
                self.inner.get(handle, key, out)
            }
            fn set(&self, handle: NvHandle, key: &str, data: &[u8]) -> Result<()> {
                self.inner.set(handle, key, data)
            }
            fn erase(&self, handle: NvHandle, key: &str) -> Result<bool> {
                self.inner.erase(handle, key)
            }
            fn commit(&self, handle: NvHandle) -> Result<()> {
                self.inner.commit(handle)
            }
        }

        let store = Arc::new(FailOnceStore {
            inner: InMemoryNvStore::new(),
            fail_next: AtomicBool::new(true),
        });
        store.inner.seed("misc", "alpha", &[3, 4]);
        let cache = WriteBackCache::new(schema(), store.clone());

        let mut buf = [0u8; 4];
        assert_matches!(cache.get("alpha", &mut buf), Err(Error::Backend(_)));

        // The record stayed invalid; this get retries the load and succeeds.
        assert_eq!(cache.get("alpha", &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
    }

    #[test]
    fn test_warm_restart_serves_without_backend_reads() {
        let (cache, store) = cache_with_store();
        cache.set("alpha", &[1, 2]).unwrap();
        cache.set("gamma", &[5]).unwrap();
        cache.save().unwrap();

        let image = cache.retained_image();
        drop(cache);

        let warmed = WriteBackCache::with_retained(schema(), image, store.clone());
        let reads_before = store.stats().reads;

        let mut buf = [0u8; 4];
        assert_eq!(warmed.get("alpha", &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(warmed.get("gamma", &mut buf).unwrap(), 1);
        assert_eq!(store.stats().reads, reads_before);
    }

    #[test]
    fn test_dirty_state_survives_warm_restart() {
        let (cache, store) = cache_with_store();
        cache.set("alpha", &[8, 8]).unwrap();

        let warmed =
            WriteBackCache::with_retained(schema(), cache.retained_image(), store.clone());
        warmed.save().unwrap();

        assert_eq!(store.value("misc", "alpha").unwrap().as_ref(), &[8, 8]);
    }

    #[test]
    fn test_stats_snapshot() {
        let (cache, store) = cache_with_store();
        store.seed("misc", "alpha", &[1]);

        let mut buf = [0u8; 4];
        cache.get("alpha", &mut buf).unwrap();
        cache.get("alpha", &mut buf).unwrap();
        let _ = cache.get("beta", &mut buf);
        cache.set("gamma", &[2]).unwrap();
        cache.save().unwrap();

        let stats = cache.stats();
        assert_eq!(stats.loads, 2); // alpha + beta
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.flushed_records, 1);
        assert_eq!(stats.namespace_commits, 1);
    }
}
