//! Ordered, bounded hand-off from frame readback to an encoder.
//!
//! Frames may arrive out of order. The sink holds them in a reorder buffer and
//! forwards the contiguous run starting at the next expected index into a
//! bounded queue drained by the encoder on a blocking worker.

use std::collections::BTreeMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use animanode_core::{AnimaError, AnimaResult, ExportConfig, FrameBuffer, OverflowKind};

use crate::encoder::{EncodeSummary, FrameEncoder};

/// What happens when the encoder queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Suspend the submitting task until the encoder catches up.
    #[default]
    Block,
    /// Drop the frame, count it and report `EncoderQueueFull`.
    DropOnOverflow,
}

impl From<OverflowKind> for OverflowPolicy {
    fn from(kind: OverflowKind) -> Self {
        match kind {
            OverflowKind::Block => OverflowPolicy::Block,
            OverflowKind::Drop => OverflowPolicy::DropOnOverflow,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Frames allowed between the reorder buffer and the encoder.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl From<&ExportConfig> for SinkConfig {
    fn from(config: &ExportConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            overflow: config.overflow.into(),
        }
    }
}

/// Outcome of a closed sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkReport {
    pub encoder: String,
    /// Frames accepted by `submit`.
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    /// Indices that never arrived and were skipped at close.
    pub gaps_skipped: u64,
    pub summary: EncodeSummary,
}

struct EncodeJob {
    index: u64,
    frame: FrameBuffer,
}

/// Destination for rendered frames.
pub struct ExportSink {
    config: SinkConfig,
    encoder_name: String,
    tx: Option<mpsc::Sender<EncodeJob>>,
    worker: Option<JoinHandle<AnimaResult<EncodeSummary>>>,
    reorder: BTreeMap<u64, FrameBuffer>,
    next_index: u64,
    submitted: u64,
    dropped: u64,
    gaps: u64,
    closed: bool,
}

impl ExportSink {
    /// Start the encoder worker. Must be called inside a tokio runtime.
    pub fn new<E: FrameEncoder>(encoder: E, config: SinkConfig) -> AnimaResult<Self> {
        if config.queue_capacity == 0 {
            return Err(AnimaError::InvalidArgument(
                "export queue capacity must be at least 1".into(),
            ));
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AnimaError::InvalidState("export sink must be created inside a tokio runtime".into())
        })?;

        let encoder_name = encoder.name().to_string();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let worker = handle.spawn_blocking(move || run_encoder(encoder, rx));
        tracing::debug!(
            "Export sink started ({}, capacity {}, {:?})",
            encoder_name,
            config.queue_capacity,
            config.overflow
        );

        Ok(Self {
            config,
            encoder_name,
            tx: Some(tx),
            worker: Some(worker),
            reorder: BTreeMap::new(),
            next_index: 0,
            submitted: 0,
            dropped: 0,
            gaps: 0,
            closed: false,
        })
    }

    /// Hand over the frame with sequence number `index`.
    ///
    /// Frames are delivered to the encoder strictly in index order; a frame
    /// that arrives early waits in the reorder buffer.
    pub async fn submit(&mut self, frame: FrameBuffer, index: u64) -> AnimaResult<()> {
        if self.closed {
            return Err(AnimaError::InvalidState("export sink is closed".into()));
        }
        if index < self.next_index || self.reorder.contains_key(&index) {
            return Err(AnimaError::InvalidArgument(format!(
                "frame {} was already submitted",
                index
            )));
        }
        self.submitted += 1;
        self.reorder.insert(index, frame);

        let mut first_drop = None;
        while let Some(frame) = self.reorder.remove(&self.next_index) {
            let idx = self.next_index;
            self.next_index += 1;
            match self.forward(idx, frame, self.config.overflow).await {
                Ok(()) => {}
                Err(e @ AnimaError::EncoderQueueFull { .. }) => {
                    first_drop.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match first_drop {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn forward(
        &mut self,
        index: u64,
        frame: FrameBuffer,
        overflow: OverflowPolicy,
    ) -> AnimaResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(AnimaError::InvalidState("export sink is closed".into()));
        };
        let job = EncodeJob { index, frame };
        match overflow {
            OverflowPolicy::Block => tx.send(job).await.map_err(|_| worker_stopped()),
            OverflowPolicy::DropOnOverflow => match tx.try_send(job) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    tracing::warn!("Encoder queue full, dropped frame {}", index);
                    Err(AnimaError::EncoderQueueFull { frame_index: index })
                }
                Err(TrySendError::Closed(_)) => Err(worker_stopped()),
            },
        }
    }

    /// Flush buffered frames in index order, skipping gaps, then finalize
    /// the encoder. A sink can be closed once.
    pub async fn close(&mut self) -> AnimaResult<SinkReport> {
        if self.closed {
            return Err(AnimaError::InvalidState(
                "export sink already closed".into(),
            ));
        }
        self.closed = true;

        // Nothing is produced any more, so the flush always waits for room.
        let pending = std::mem::take(&mut self.reorder);
        let mut flush_error = None;
        for (index, frame) in pending {
            if index > self.next_index {
                let missing = index - self.next_index;
                tracing::warn!(
                    "Skipping {} missing frame(s) before frame {}",
                    missing,
                    index
                );
                self.gaps += missing;
            }
            self.next_index = index + 1;
            if let Err(e) = self.forward(index, frame, OverflowPolicy::Block).await {
                flush_error = Some(e);
                break;
            }
        }

        self.tx = None;
        let summary = match self.worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| AnimaError::Encode(format!("encoder worker panicked: {}", e)))??,
            None => EncodeSummary::default(),
        };
        if let Some(e) = flush_error {
            return Err(e);
        }

        let report = SinkReport {
            encoder: self.encoder_name.clone(),
            frames_submitted: self.submitted,
            frames_dropped: self.dropped,
            gaps_skipped: self.gaps,
            summary,
        };
        tracing::info!(
            "Export sink closed: {} frames encoded by {}, {} dropped, {} skipped",
            report.summary.frames,
            report.encoder,
            report.frames_dropped,
            report.gaps_skipped
        );
        Ok(report)
    }

    /// Index the encoder is waiting for.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Frames held back waiting for an earlier index.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn encoder_name(&self) -> &str {
        &self.encoder_name
    }
}

fn worker_stopped() -> AnimaError {
    AnimaError::Encode("encoder worker stopped; close the sink for details".into())
}

fn run_encoder<E: FrameEncoder>(
    mut encoder: E,
    mut rx: mpsc::Receiver<EncodeJob>,
) -> AnimaResult<EncodeSummary> {
    while let Some(job) = rx.blocking_recv() {
        if let Err(e) = encoder.encode_frame(&job.frame, job.index) {
            tracing::error!("{} failed on frame {}: {}", encoder.name(), job.index, e);
            drop(rx);
            if let Err(fin) = encoder.finalize() {
                tracing::warn!("{} finalize after failure: {}", encoder.name(), fin);
            }
            return Err(e);
        }
    }
    encoder.finalize()
}
