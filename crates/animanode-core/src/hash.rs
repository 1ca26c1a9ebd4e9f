//! Content hashing for deterministic output verification.
//!
//! SHA-256 digests over frame pixels and over evaluated scene state, so that
//! reproducible exports can be checked bit for bit across runs.

use sha2::{Digest, Sha256};

use crate::frame::FrameBuffer;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental hasher for structured values.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(v.to_le_bytes());
        self
    }

    /// Hash the exact bit pattern, so `0.0` and `-0.0` differ.
    pub fn update_f64(&mut self, v: f64) -> &mut Self {
        self.update_u64(v.to_bits())
    }

    pub fn update_f32(&mut self, v: f32) -> &mut Self {
        self.inner.update(v.to_bits().to_le_bytes());
        self
    }

    /// Length-prefixed string.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.update_u64(s.len() as u64);
        self.inner.update(s.as_bytes());
        self
    }

    pub fn update_frame(&mut self, frame: &FrameBuffer) -> &mut Self {
        // Dimensions and format are part of the digest so that differently
        // shaped buffers with identical bytes hash differently.
        self.inner.update(frame.width.to_le_bytes());
        self.inner.update(frame.height.to_le_bytes());
        self.inner.update([frame.format as u8]);
        for row in frame.packed_rows() {
            self.inner.update(row);
        }
        self
    }

    pub fn finish(self) -> ContentHash {
        let result = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        ContentHash::from_bytes(bytes)
    }
}

/// Content hash of a single frame buffer (stride padding excluded).
pub fn hash_frame(frame: &FrameBuffer) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update_frame(frame);
    hasher.finish()
}

/// Content hash of an ordered sequence of frames.
pub fn hash_frames(frames: &[FrameBuffer]) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update_u64(frames.len() as u64);
    for frame in frames {
        hasher.update_frame(frame);
    }
    hasher.finish()
}
