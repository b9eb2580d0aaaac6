//! Retained Store
//!
//! The cache's resident state: one contiguous byte buffer holding every
//! record's current value at its schema offset, and a parallel per-record
//! metadata array. Both live for the whole process and are carried across
//! warm resets as a [`RetainedImage`]; a cold boot starts from all-invalid.
//!
//! # Invariants
//!
//! - `size <= max_size` for every record
//! - `dirty` implies `valid`
//! - bytes at `[offset, offset + size)` are authoritative while `valid`;
//!   bytes beyond `size` are stale

use tracing::warn;

use crate::schema::Schema;

/// Per-record cache metadata.
///
/// The all-zero value means "not yet loaded from the backing store"; a
/// valid record with `size == 0` means "known to be absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordState {
    /// Value bytes (or known absence) are present in the retained buffer
    pub valid: bool,
    /// Cached value differs from what the backing store holds
    pub dirty: bool,
    /// Current value size in bytes, bounded by the record's maximum
    pub size: u16,
}

impl RecordState {
    /// State after a successful load or overwrite.
    pub fn loaded(size: usize, dirty: bool) -> Self {
        Self {
            valid: true,
            dirty,
            size: size as u16,
        }
    }

    /// Current size as a usize.
    #[inline]
    pub fn len(&self) -> usize {
        self.size as usize
    }
}

/// Snapshot of retained state, carried across a warm reset.
#[derive(Debug, Clone)]
pub struct RetainedImage {
    pub(crate) data: Vec<u8>,
    pub(crate) states: Vec<RecordState>,
}

/// Value buffer plus metadata array for the whole catalog.
#[derive(Debug)]
pub struct RetainedStore {
    data: Vec<u8>,
    states: Vec<RecordState>,
}

impl RetainedStore {
    /// Cold initialization: every record invalid, buffer zeroed.
    pub fn cold(schema: &Schema) -> Self {
        Self {
            data: vec![0u8; schema.data_len()],
            states: vec![RecordState::default(); schema.len()],
        }
    }

    /// Warm initialization from a preserved image.
    ///
    /// An image whose shape or metadata no longer matches the schema (the
    /// catalog changed between resets, or the memory was not actually
    /// preserved) is discarded and the store starts cold instead.
    pub fn warm(schema: &Schema, image: RetainedImage) -> Self {
        if !Self::image_matches(schema, &image) {
            warn!("retained image does not match schema, reinitializing cold");
            return Self::cold(schema);
        }
        Self {
            data: image.data,
            states: image.states,
        }
    }

    fn image_matches(schema: &Schema, image: &RetainedImage) -> bool {
        if image.data.len() != schema.data_len() || image.states.len() != schema.len() {
            return false;
        }
        image.states.iter().enumerate().all(|(i, st)| {
            st.len() <= schema.record(i).max_size && (!st.dirty || st.valid)
        })
    }

    /// Snapshot the current state for carrying across a warm reset.
    pub fn image(&self) -> RetainedImage {
        RetainedImage {
            data: self.data.clone(),
            states: self.states.clone(),
        }
    }

    /// Metadata for the record at `index`.
    #[inline]
    pub fn state(&self, index: usize) -> RecordState {
        self.states[index]
    }

    /// Mutable metadata for the record at `index`.
    #[inline]
    pub fn state_mut(&mut self, index: usize) -> &mut RecordState {
        &mut self.states[index]
    }

    /// Current value bytes of a valid record.
    #[inline]
    pub fn value(&self, index: usize, schema: &Schema) -> &[u8] {
        let desc = schema.record(index);
        let len = self.states[index].len();
        &self.data[desc.offset..desc.offset + len]
    }

    /// Full slot (up to `max_size` bytes) plus metadata for one record,
    /// borrowed together so a load can fill both in one step.
    #[inline]
    pub fn slot_mut(&mut self, index: usize, schema: &Schema) -> (&mut [u8], &mut RecordState) {
        let desc = schema.record(index);
        (
            &mut self.data[desc.offset..desc.offset + desc.max_size],
            &mut self.states[index],
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
