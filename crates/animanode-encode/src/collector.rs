use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use animanode_core::{AnimaError, AnimaResult, FrameBuffer};

use crate::encoder::{EncodeSummary, FrameEncoder};

#[derive(Default)]
struct Shared {
    frames: Mutex<Vec<(u64, FrameBuffer)>>,
    finalized: AtomicUsize,
}

/// Keeps every frame in memory. Used for tests, thumbnails and hashing.
pub struct FrameCollector {
    shared: Arc<Shared>,
}

/// Read side of a [`FrameCollector`], usable after the collector has been
/// moved into a sink.
#[derive(Clone)]
pub struct CollectedFrames {
    shared: Arc<Shared>,
}

impl FrameCollector {
    pub fn new() -> (Self, CollectedFrames) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            CollectedFrames { shared },
        )
    }
}

impl CollectedFrames {
    /// Indices in the order they were encoded.
    pub fn indices(&self) -> Vec<u64> {
        self.lock().iter().map(|(i, _)| *i).collect()
    }

    pub fn frames(&self) -> Vec<FrameBuffer> {
        self.lock().iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `finalize` ran.
    pub fn finalize_count(&self) -> usize {
        self.shared.finalized.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, FrameBuffer)>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.shared
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameEncoder for FrameCollector {
    fn name(&self) -> &str {
        "collector"
    }

    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()> {
        self.shared
            .frames
            .lock()
            .map_err(|_| AnimaError::Encode("frame collector lock poisoned".into()))?
            .push((index, frame.clone()));
        Ok(())
    }

    fn finalize(&mut self) -> AnimaResult<EncodeSummary> {
        self.shared.finalized.fetch_add(1, Ordering::SeqCst);
        let frames = self
            .shared
            .frames
            .lock()
            .map_err(|_| AnimaError::Encode("frame collector lock poisoned".into()))?;
        Ok(EncodeSummary {
            frames: frames.len() as u64,
            bytes_written: frames.iter().map(|(_, f)| f.byte_size() as u64).sum(),
            output: None,
        })
    }
}
