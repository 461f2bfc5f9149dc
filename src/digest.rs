use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{PullError, Result};

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A content digest of the form `sha256:<64 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse a digest string. Only `sha256` is supported; the hex portion is
    /// normalized to lowercase.
    pub fn parse(raw: &str) -> Result<Self> {
        let (algorithm, hex) = raw
            .split_once(':')
            .ok_or_else(|| PullError::InvalidDigest(raw.to_string()))?;
        if algorithm != "sha256" {
            return Err(PullError::InvalidDigest(raw.to_string()));
        }
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PullError::InvalidDigest(raw.to_string()));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Compute the digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hex: hex_encode(&Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = PullError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Hex-encode a byte slice.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// DigestReader
// ---------------------------------------------------------------------------

/// Streaming digest verifier: hashes every byte read through it so the
/// accumulated digest can be checked against a declared one after the copy
/// completes.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Consume the reader and check the accumulated digest against `expected`.
    pub fn verified(self, expected: &Digest) -> bool {
        hex_encode(&self.hasher.finalize()) == expected.hex
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.hasher.update(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
