//! Property-Based Tests for the Cache Engine
//!
//! Uses proptest to verify engine contracts across arbitrary values:
//!
//! 1. **Round-trip**: set(v) → get() = v for any value within bounds
//! 2. **Idempotence**: repeating an identical set never re-dirties
//! 3. **Erase**: erase always yields "no value", for any prior state
//! 4. **Save agreement**: after save, the backing store holds exactly the
//!    cache's nonzero persistent values

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use crate::backend::InMemoryNvStore;
use crate::cache::WriteBackCache;
use crate::error::Error;
use crate::schema::Schema;

const BLOB_MAX: usize = 64;

fn schema() -> Schema {
    Schema::builder()
        .record("blob", "misc", BLOB_MAX)
        .record("word", "misc", 2)
        .build()
        .unwrap()
}

fn cache_with_store() -> (WriteBackCache, Arc<InMemoryNvStore>) {
    let store = Arc::new(InMemoryNvStore::new());
    (WriteBackCache::new(schema(), store.clone()), store)
}

/// Strategy for nonempty values that fit the blob record.
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=BLOB_MAX)
}

/// Strategy for an optional prior value, to vary the starting state.
fn prior_strategy() -> impl Strategy<Value = Option<Vec<u8>>> {
    prop::option::of(value_strategy())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any in-bounds value reads back exactly as written.
    #[test]
    fn prop_set_get_round_trip(value in value_strategy()) {
        let (cache, _) = cache_with_store();

        cache.set("blob", &value).unwrap();

        let mut buf = [0u8; BLOB_MAX];
        let len = cache.get("blob", &mut buf).unwrap();
        prop_assert_eq!(len, value.len());
        prop_assert_eq!(&buf[..len], value.as_slice());
    }

    /// Property: a second identical set leaves the dirty flag where the
    /// first left it - after a save, re-setting the same bytes must not
    /// cause another backing write.
    #[test]
    fn prop_identical_set_is_clean(value in value_strategy()) {
        let (cache, store) = cache_with_store();

        cache.set("blob", &value).unwrap();
        cache.save().unwrap();
        let writes_after_save = store.stats().writes;

        cache.set("blob", &value).unwrap();
        cache.save().unwrap();
        prop_assert_eq!(store.stats().writes, writes_after_save);
    }

    /// Property: erase yields "no value" regardless of what was cached
    /// before, and a subsequent save removes the key from the backing
    /// store.
    #[test]
    fn prop_erase_always_clears(prior in prior_strategy()) {
        let (cache, store) = cache_with_store();

        if let Some(value) = &prior {
            cache.set("blob", value).unwrap();
            cache.save().unwrap();
        }

        cache.erase("blob").unwrap();
        let mut buf = [0u8; BLOB_MAX];
        let is_not_found = matches!(
            cache.get("blob", &mut buf),
            Err(Error::NotFound { .. })
        );
        prop_assert!(is_not_found);

        cache.save().unwrap();
        prop_assert!(!store.contains("misc", "blob"));
    }

    /// Property: after a save, the backing store agrees with the cache for
    /// every record that holds a value.
    #[test]
    fn prop_save_agrees_with_cache(
        blob in value_strategy(),
        word in prop::collection::vec(any::<u8>(), 1..=2),
    ) {
        let (cache, store) = cache_with_store();

        cache.set("blob", &blob).unwrap();
        cache.set("word", &word).unwrap();
        cache.save().unwrap();

        let stored_blob = store.value("misc", "blob").unwrap();
        prop_assert_eq!(stored_blob.as_ref(), blob.as_slice());
        let stored_word = store.value("misc", "word").unwrap();
        prop_assert_eq!(stored_word.as_ref(), word.as_slice());
        // One namespace touched, one commit.
        prop_assert_eq!(store.commit_count("misc"), 1);
    }

    /// Property: values over the record maximum are rejected without
    /// disturbing the current value.
    #[test]
    fn prop_oversized_set_rejected(
        value in value_strategy(),
        extra in prop::collection::vec(any::<u8>(), (BLOB_MAX + 1)..=(BLOB_MAX * 2)),
    ) {
        let (cache, _) = cache_with_store();

        cache.set("blob", &value).unwrap();
        let is_invalid_size = matches!(
            cache.set("blob", &extra),
            Err(Error::InvalidSize { .. })
        );
        prop_assert!(is_invalid_size);

        let mut buf = [0u8; BLOB_MAX];
        let len = cache.get("blob", &mut buf).unwrap();
        prop_assert_eq!(&buf[..len], value.as_slice());
    }
}
