//! SHA-256 content verification.
//!
//! Blobs are hashed while they stream to disk, so verification needs no
//! second pass over the archive.

use std::io::{self, Write};

use hubroot_common::error::{HubrootError, Result};
use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LENGTH: usize = 64;

/// A writer that forwards to `inner` and hashes every byte written.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the lowercase hex digest, and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let hex = format!("{:x}", self.hasher.finalize());
        (self.inner, hex, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Extracts the hex part of a `sha256:<hex>` digest.
///
/// Returns `None` for other algorithms or malformed hex, which are not
/// verified.
#[must_use]
pub fn sha256_hex(digest: &str) -> Option<&str> {
    let hex = digest.strip_prefix(SHA256_PREFIX)?;
    (hex.len() == SHA256_HEX_LENGTH && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

/// Checks a computed SHA-256 against the layer digest.
///
/// # Errors
///
/// Returns `HubrootError::BlobFetch` when the digest names SHA-256 and
/// the computed hash differs.
pub fn verify_digest(digest: &str, computed_hex: &str) -> Result<()> {
    let Some(expected) = sha256_hex(digest) else {
        tracing::debug!(digest, "digest algorithm not verifiable, skipping check");
        return Ok(());
    };
    if expected.eq_ignore_ascii_case(computed_hex) {
        tracing::debug!(digest, "blob digest verified");
        Ok(())
    } else {
        Err(HubrootError::BlobFetch {
            digest: digest.to_string(),
            message: format!("hash mismatch: expected {expected}, got {computed_hex}"),
        })
    }
}
