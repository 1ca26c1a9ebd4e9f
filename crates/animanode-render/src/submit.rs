//! Ordered hand-off of compiled frames to a [`GpuBackend`].
//!
//! A single worker task takes requests in order and submits each one once a
//! GPU slot is free. The slot travels with the returned fence, so at most
//! `gpu_depth` frames are on the device at a time. "Accepted" means the
//! backend took the command list and returned a fence.
//!
//! Cancelling only refuses frames that are waiting for a slot. After the
//! first refused or failed frame the worker refuses everything behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use animanode_core::{AnimaError, AnimaResult};

use crate::compiler::RenderCommand;
use crate::gpu::{GpuBackend, GpuFence};

/// Shared cancellation flag. Every clone observes the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

struct Request {
    frame_index: u64,
    commands: Vec<RenderCommand>,
    reply: oneshot::Sender<AnimaResult<GpuFence>>,
}

/// Pending answer to an [`SubmissionQueue::enqueue`] call.
#[derive(Debug)]
pub struct Acceptance {
    frame_index: u64,
    rx: oneshot::Receiver<AnimaResult<GpuFence>>,
}

impl Acceptance {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Suspend until the backend accepted the frame, returning its fence.
    pub async fn accepted(self) -> AnimaResult<GpuFence> {
        let frame_index = self.frame_index;
        self.rx.await.map_err(|_| cancelled(frame_index))?
    }
}

pub struct SubmissionQueue {
    tx: Option<mpsc::UnboundedSender<Request>>,
    worker: Option<JoinHandle<()>>,
    token: CancelToken,
    gpu_depth: usize,
}

impl SubmissionQueue {
    /// Spawn the submission worker on the current tokio runtime.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        gpu_depth: usize,
        token: CancelToken,
    ) -> AnimaResult<Self> {
        if gpu_depth == 0 {
            return Err(AnimaError::InvalidArgument(
                "GPU queue depth must be at least 1".into(),
            ));
        }
        let handle = Handle::try_current().map_err(|_| {
            AnimaError::InvalidState("the submission queue needs a tokio runtime".into())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(gpu_depth));
        let worker = handle.spawn(run_queue(backend, semaphore, token.clone(), rx));
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            token,
            gpu_depth,
        })
    }

    /// Queue `commands` for `frame_index`. Returns immediately; await the
    /// [`Acceptance`] to learn when the backend took the frame.
    pub fn enqueue(
        &self,
        frame_index: u64,
        commands: Vec<RenderCommand>,
    ) -> AnimaResult<Acceptance> {
        if self.token.is_cancelled() {
            return Err(cancelled(frame_index));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AnimaError::InvalidState("submission queue is shut down".into()))?;
        let (reply, rx) = oneshot::channel();
        tx.send(Request {
            frame_index,
            commands,
            reply,
        })
        .map_err(|_| AnimaError::InvalidState("submission worker has exited".into()))?;
        Ok(Acceptance { frame_index, rx })
    }

    pub fn gpu_depth(&self) -> usize {
        self.gpu_depth
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Stop accepting requests and wait for the worker to answer the ones
    /// already queued.
    pub async fn shutdown(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Submission worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_queue(
    backend: Arc<dyn GpuBackend>,
    semaphore: Arc<Semaphore>,
    token: CancelToken,
    mut rx: mpsc::UnboundedReceiver<Request>,
) {
    // Once a frame is cancelled or rejected, every later frame is refused so
    // the backend only ever sees a gap-free prefix of the run.
    let mut halted = false;
    while let Some(request) = rx.recv().await {
        let frame_index = request.frame_index;
        if halted {
            let _ = request.reply.send(Err(cancelled(frame_index)));
            continue;
        }

        // A free slot is taken even after a stop request; only frames that
        // would have to wait for the GPU are cancelled.
        let permit = match Arc::clone(&semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => {
                halted = true;
                let _ = request.reply.send(Err(cancelled(frame_index)));
                continue;
            }
            Err(TryAcquireError::NoPermits) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    halted = true;
                    let _ = request.reply.send(Err(cancelled(frame_index)));
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        halted = true;
                        let _ = request.reply.send(Err(cancelled(frame_index)));
                        continue;
                    }
                },
            },
        };

        let result = backend
            .submit(frame_index, request.commands)
            .map(|mut fence| {
                fence.hold(permit);
                fence
            });
        if let Err(e) = &result {
            tracing::error!("{} rejected frame {}: {}", backend.name(), frame_index, e);
            halted = true;
        }
        if request.reply.send(result).is_err() {
            tracing::debug!("Submission of frame {} was abandoned", frame_index);
        }
    }
}

fn cancelled(frame_index: u64) -> AnimaError {
    AnimaError::Cancelled(format!("frame {} was not submitted", frame_index))
}
