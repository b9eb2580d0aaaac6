//! Driver Intercept Surface
//!
//! The entry points handed to the external storage driver in place of its
//! normal persistent-store bindings. Call shapes mirror the driver's
//! expectations: open/close by namespace name, fixed-width typed accessors,
//! variable-length blobs, and a commit request. Every operation routes
//! through the cache engine; the driver never reaches the backing store
//! directly.
//!
//! Record keys are unique across the whole catalog, so dispatch is by key;
//! the namespace token is validated at `open` and otherwise carried only
//! for call-shape compatibility.

use std::sync::Arc;

use tracing::{debug, error};

use super::engine::WriteBackCache;
use crate::error::{Error, Result};
use crate::schema::NamespaceId;

/// Token returned by [`Intercept::open`] for an opened namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsToken(NamespaceId);

impl NsToken {
    /// Namespace this token was opened for.
    #[inline]
    pub fn namespace(&self) -> NamespaceId {
        self.0
    }
}

/// Driver-facing surface over a shared cache engine.
pub struct Intercept {
    cache: Arc<WriteBackCache>,
}

impl Intercept {
    /// Wrap a cache engine.
    pub fn new(cache: Arc<WriteBackCache>) -> Self {
        Self { cache }
    }

    /// Open a namespace by name.
    pub fn open(&self, namespace: &str) -> Result<NsToken> {
        debug!(namespace, "driver open");
        self.cache
            .schema()
            .find_namespace(namespace)
            .map(NsToken)
            .ok_or_else(|| {
                error!(namespace, "unknown namespace");
                Error::InvalidArgument(format!("unknown namespace '{}'", namespace))
            })
    }

    /// Close a namespace token. Handles live for the process lifetime, so
    /// this releases nothing.
    pub fn close(&self, token: NsToken) {
        debug!(token = %token.0, "driver close");
    }

    /// Driver-scheduled commit; flushes only when the cache is in auto mode.
    pub fn commit(&self, token: NsToken) -> Result<()> {
        debug!(token = %token.0, "driver commit");
        self.cache.driver_commit()
    }

    /// Read a variable-length value, returning the actual size.
    pub fn get_blob(&self, token: NsToken, key: &str, out: &mut [u8]) -> Result<usize> {
        debug!(token = %token.0, key, capacity = out.len(), "get_blob");
        self.cache.get(key, out)
    }

    /// Write a variable-length value.
    pub fn set_blob(&self, token: NsToken, key: &str, data: &[u8]) -> Result<()> {
        debug!(token = %token.0, key, size = data.len(), "set_blob");
        self.cache.set(key, data)
    }

    /// Erase a value.
    pub fn erase_key(&self, token: NsToken, key: &str) -> Result<()> {
        debug!(token = %token.0, key, "erase_key");
        self.cache.erase(key)
    }

    /// Read an unsigned 8-bit value.
    pub fn get_u8(&self, token: NsToken, key: &str) -> Result<u8> {
        debug!(token = %token.0, key, "get_u8");
        let mut buf = [0u8; 1];
        self.cache.get(key, &mut buf)?;
        Ok(buf[0])
    }

    /// Write an unsigned 8-bit value.
    pub fn set_u8(&self, token: NsToken, key: &str, value: u8) -> Result<()> {
        debug!(token = %token.0, key, "set_u8");
        self.cache.set(key, &[value])
    }

    /// Read a signed 8-bit value.
    pub fn get_i8(&self, token: NsToken, key: &str) -> Result<i8> {
        debug!(token = %token.0, key, "get_i8");
        let mut buf = [0u8; 1];
        self.cache.get(key, &mut buf)?;
        Ok(i8::from_le_bytes(buf))
    }

    /// Write a signed 8-bit value.
    pub fn set_i8(&self, token: NsToken, key: &str, value: i8) -> Result<()> {
        debug!(token = %token.0, key, "set_i8");
        self.cache.set(key, &value.to_le_bytes())
    }

    /// Read an unsigned 16-bit little-endian value. A shorter stored value
    /// zero-extends.
    pub fn get_u16(&self, token: NsToken, key: &str) -> Result<u16> {
        debug!(token = %token.0, key, "get_u16");
        let mut buf = [0u8; 2];
        self.cache.get(key, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Write an unsigned 16-bit little-endian value.
    pub fn set_u16(&self, token: NsToken, key: &str, value: u16) -> Result<()> {
        debug!(token = %token.0, key, "set_u16");
        self.cache.set(key, &value.to_le_bytes())
    }

    /// Read a signed 16-bit little-endian value. A shorter stored value
    /// zero-extends.
    pub fn get_i16(&self, token: NsToken, key: &str) -> Result<i16> {
        debug!(token = %token.0, key, "get_i16");
        let mut buf = [0u8; 2];
        self.cache.get(key, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Write a signed 16-bit little-endian value.
    pub fn set_i16(&self, token: NsToken, key: &str, value: i16) -> Result<()> {
        debug!(token = %token.0, key, "set_i16");
        self.cache.set(key, &value.to_le_bytes())
    }
}

// =============================================================================
// Tests
// =============================================================================
