//! Frame scheduler: paces a run and keeps compile, GPU work and encoding
//! overlapped.
//!
//! Each [`FrameScheduler::tick`] evaluates the scene at the current simulated
//! time, compiles it on a blocking worker and queues it for the GPU. Up to
//! `max_in_flight` frames may sit between "submitted" and "read back"; once
//! the window is full the oldest frame is awaited and handed to the export
//! sink.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use animanode_core::{
    AnimaConfig, AnimaError, AnimaResult, Color, Duration, FrameBuffer, PacingKind,
};
use animanode_encode::{ExportSink, SinkReport};
use animanode_ir::{SceneGraph, Timeline};

use crate::compiler::{compile_with_stats, CompileStats, RenderTarget};
use crate::gpu::{GpuBackend, TextureDesc};
use crate::resources::ResourceSet;
use crate::submit::{Acceptance, CancelToken, SubmissionQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// How simulated time advances when a frame rate is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacingMode {
    /// Exactly one frame interval per tick, as fast as the pipeline allows.
    #[default]
    FixedStep,
    /// One frame interval per tick, waiting for each frame's deadline.
    WallClock,
}

impl From<PacingKind> for PacingMode {
    fn from(kind: PacingKind) -> Self {
        match kind {
            PacingKind::FixedStep => PacingMode::FixedStep,
            PacingKind::WallClock => PacingMode::WallClock,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub width: u32,
    pub height: u32,
    pub background: Color,
    /// Frames allowed between submission and readback.
    pub max_in_flight: usize,
    /// Frames the GPU may hold at once.
    pub gpu_depth: usize,
    pub pacing: PacingMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            background: Color::BLACK,
            max_in_flight: 2,
            gpu_depth: 2,
            pacing: PacingMode::FixedStep,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &AnimaConfig) -> AnimaResult<Self> {
        Ok(Self {
            width: config.project.width,
            height: config.project.height,
            background: config.project.background_color()?,
            max_in_flight: config.render.max_in_flight,
            gpu_depth: config.render.max_in_flight,
            pacing: config.render.pacing.into(),
        })
    }

    fn validate(&self) -> AnimaResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AnimaError::InvalidArgument(format!(
                "canvas must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_in_flight == 0 || self.gpu_depth == 0 {
            return Err(AnimaError::InvalidArgument(
                "max_in_flight and gpu_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub frame_index: u64,
    /// Simulated time the frame was evaluated at.
    pub time: f64,
    /// Frames read back and handed to the sink during this tick.
    pub delivered: Vec<u64>,
    pub stats: CompileStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Rendered(TickReport),
    /// Paused; nothing was produced and simulated time did not move.
    Paused,
    Stopped(RunSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Frames handed to the submission queue, including cancelled ones.
    pub frames_submitted: u64,
    /// Frames read back from the GPU.
    pub frames_delivered: u64,
    /// Frames the sink dropped on overflow.
    pub frames_dropped: u64,
    /// Frames cancelled before the GPU accepted them.
    pub frames_cancelled: u64,
    pub simulated_time: f64,
    pub sink: Option<SinkReport>,
}

/// Requests a stop from another task. Submissions waiting for a GPU slot are
/// cancelled at once; the scheduler finishes the stop on its next tick.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancelToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct InFlight {
    frame_index: u64,
    acceptance: Acceptance,
}

/// Drives a single run from `start` to `stop`. Not restartable.
pub struct FrameScheduler {
    backend: Arc<dyn GpuBackend>,
    resources: Arc<ResourceSet>,
    timeline: Timeline,
    config: SchedulerConfig,
    sink: Option<ExportSink>,
    state: SchedulerState,
    run_id: Uuid,
    token: CancelToken,
    fps: Option<f64>,
    queue: Option<SubmissionQueue>,
    target: Option<RenderTarget>,
    pending_resize: Option<(u32, u32)>,
    in_flight: VecDeque<InFlight>,
    next_frame: u64,
    sim_time: f64,
    /// Last wall-clock sample of an unpaced run.
    anchor: Option<Instant>,
    ticker: Option<Interval>,
    submitted: u64,
    delivered: u64,
    dropped: u64,
    cancelled: u64,
    last_error: Option<AnimaError>,
    summary: Option<RunSummary>,
}

impl FrameScheduler {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        resources: ResourceSet,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backend,
            resources: Arc::new(resources),
            timeline: Timeline::new(),
            config,
            sink: None,
            state: SchedulerState::Idle,
            run_id: Uuid::new_v4(),
            token: CancelToken::new(),
            fps: None,
            queue: None,
            target: None,
            pending_resize: None,
            in_flight: VecDeque::new(),
            next_frame: 0,
            sim_time: 0.0,
            anchor: None,
            ticker: None,
            submitted: 0,
            delivered: 0,
            dropped: 0,
            cancelled: 0,
            last_error: None,
            summary: None,
        }
    }

    /// Deliver read-back frames to `sink`. The sink is closed when the run
    /// ends.
    pub fn with_sink(mut self, sink: ExportSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = timeline;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The error that stopped the run, if any.
    pub fn last_error(&self) -> Option<&AnimaError> {
        self.last_error.as_ref()
    }

    pub fn simulated_time(&self) -> f64 {
        self.sim_time
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Current canvas size, including a resize that is still pending.
    pub fn size(&self) -> (u32, u32) {
        self.pending_resize
            .unwrap_or((self.config.width, self.config.height))
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.clone(),
        }
    }

    /// Begin the run. `fps` of `None` runs unpaced: simulated time follows
    /// measured wall time. Must be called inside a tokio runtime.
    pub fn start(&mut self, fps: Option<f64>) -> AnimaResult<()> {
        if self.state != SchedulerState::Idle {
            return Err(AnimaError::InvalidState(format!(
                "cannot start a scheduler that is {:?}",
                self.state
            )));
        }
        if let Some(f) = fps {
            if !f.is_finite() || f <= 0.0 {
                return Err(self.fail(AnimaError::InvalidArgument(format!(
                    "frame rate must be finite and positive, got {}",
                    f
                ))));
            }
        }
        if let Err(e) = self.config.validate() {
            return Err(self.fail(e));
        }

        let queue = match SubmissionQueue::new(
            Arc::clone(&self.backend),
            self.config.gpu_depth,
            self.token.clone(),
        ) {
            Ok(queue) => queue,
            Err(e) => return Err(self.fail(e)),
        };
        let texture = match self.backend.create_texture(&TextureDesc::render_target(
            self.config.width,
            self.config.height,
        )) {
            Ok(texture) => texture,
            Err(e) => return Err(self.fail(e)),
        };

        self.target = Some(RenderTarget {
            texture,
            width: self.config.width,
            height: self.config.height,
            clear: self.config.background,
        });
        self.queue = Some(queue);
        self.fps = fps;
        if let (Some(f), PacingMode::WallClock) = (fps, self.config.pacing) {
            let mut ticker = tokio::time::interval(Duration::frame_interval(f).to_std());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
        self.state = SchedulerState::Running;
        tracing::info!(
            "Run {} started on {} ({}x{}, {}, window {})",
            self.run_id,
            self.backend.name(),
            self.config.width,
            self.config.height,
            match fps {
                Some(f) => format!("{} fps {:?}", f, self.config.pacing),
                None => "unpaced".to_string(),
            },
            self.config.max_in_flight
        );
        Ok(())
    }

    /// Produce the next frame.
    #[tracing::instrument(level = "debug", skip_all, fields(run = %self.run_id))]
    pub async fn tick(&mut self, graph: &SceneGraph) -> AnimaResult<TickOutcome> {
        match self.state {
            SchedulerState::Idle => {
                return Err(AnimaError::InvalidState(
                    "scheduler has not been started".into(),
                ))
            }
            SchedulerState::Paused => return Ok(TickOutcome::Paused),
            SchedulerState::Stopped => return Ok(TickOutcome::Stopped(self.current_summary())),
            SchedulerState::Running => {}
        }
        if self.token.is_cancelled() {
            tracing::info!("Stop requested for run {}", self.run_id);
            return self.stop().await.map(TickOutcome::Stopped);
        }

        let mut delivered = Vec::new();
        if let Err(e) = self.apply_resize(&mut delivered).await {
            return Err(self.abort(e).await);
        }
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }
        if self.fps.is_none() {
            let now = Instant::now();
            if let Some(prev) = self.anchor {
                self.sim_time += now.duration_since(prev).as_secs_f64();
            }
            self.anchor = Some(now);
        }

        let frame_index = self.next_frame;
        let time = self.sim_time;
        let target = self
            .target
            .ok_or_else(|| AnimaError::InvalidState("no render target".into()))?;
        let frame = self.timeline.evaluate(graph, time);
        let resources = Arc::clone(&self.resources);
        let (commands, stats) = tokio::task::spawn_blocking(move || {
            compile_with_stats(&frame, &resources, &target)
        })
        .await
        .map_err(|e| AnimaError::InvalidState(format!("compile worker panicked: {}", e)))??;

        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| AnimaError::InvalidState("submission queue is gone".into()))?;
        let acceptance = match queue.enqueue(frame_index, commands) {
            Ok(acceptance) => acceptance,
            Err(AnimaError::Cancelled(_)) => {
                return self.stop().await.map(TickOutcome::Stopped);
            }
            Err(e) => return Err(e),
        };
        self.in_flight.push_back(InFlight {
            frame_index,
            acceptance,
        });
        self.submitted += 1;
        self.next_frame += 1;
        if let Some(f) = self.fps {
            self.sim_time = Timeline::frame_time(self.next_frame, f);
        }
        tracing::debug!(
            "Frame {} at t={:.4}s: {} draws, {} state changes",
            frame_index,
            time,
            stats.draws,
            stats.state_changes()
        );

        while self.in_flight.len() > self.config.max_in_flight {
            match self.retire_oldest().await {
                Ok(Some(index)) => delivered.push(index),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(self.abort(e).await),
                Err(e) => return Err(e),
            }
        }

        Ok(TickOutcome::Rendered(TickReport {
            frame_index,
            time,
            delivered,
            stats,
        }))
    }

    pub fn pause(&mut self) -> AnimaResult<()> {
        if self.state != SchedulerState::Running {
            return Err(AnimaError::InvalidState(format!(
                "cannot pause a scheduler that is {:?}",
                self.state
            )));
        }
        if let Some(prev) = self.anchor.take() {
            self.sim_time += prev.elapsed().as_secs_f64();
        }
        self.state = SchedulerState::Paused;
        tracing::debug!("Run {} paused at t={:.4}s", self.run_id, self.sim_time);
        Ok(())
    }

    pub fn resume(&mut self) -> AnimaResult<()> {
        if self.state != SchedulerState::Paused {
            return Err(AnimaError::InvalidState(format!(
                "cannot resume a scheduler that is {:?}",
                self.state
            )));
        }
        if self.fps.is_none() {
            self.anchor = Some(Instant::now());
        }
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.reset();
        }
        self.state = SchedulerState::Running;
        tracing::debug!("Run {} resumed at t={:.4}s", self.run_id, self.sim_time);
        Ok(())
    }

    /// Change the canvas size. Takes effect on the next tick.
    pub fn resize(&mut self, width: u32, height: u32) -> AnimaResult<()> {
        if width == 0 || height == 0 {
            return Err(AnimaError::InvalidArgument(format!(
                "canvas must be non-empty, got {}x{}",
                width, height
            )));
        }
        if self.state == SchedulerState::Idle {
            self.config.width = width;
            self.config.height = height;
        } else {
            self.pending_resize = Some((width, height));
        }
        Ok(())
    }

    /// Cancel frames still waiting for a GPU slot, drain the rest into the
    /// sink and close it. Calling it again returns the same summary.
    #[tracing::instrument(skip_all, fields(run = %self.run_id))]
    pub async fn stop(&mut self) -> AnimaResult<RunSummary> {
        if self.state == SchedulerState::Stopped {
            return Ok(self.current_summary());
        }
        match self.finish().await {
            Some(e) => Err(e),
            None => Ok(self.current_summary()),
        }
    }

    /// Start if needed, render `frames` frames, read every one of them back
    /// and stop. On error the run is still stopped and the sink closed.
    pub async fn render_range(
        &mut self,
        graph: &SceneGraph,
        fps: Option<f64>,
        frames: u64,
    ) -> AnimaResult<RunSummary> {
        if self.state == SchedulerState::Idle {
            self.start(fps)?;
        }
        match self.render_frames(graph, frames).await {
            Ok(Some(summary)) => Ok(summary),
            Ok(None) => self.stop().await,
            Err(e) => {
                if self.state != SchedulerState::Stopped {
                    if let Err(secondary) = self.stop().await {
                        tracing::warn!("While stopping after an error: {}", secondary);
                    }
                }
                Err(e)
            }
        }
    }

    async fn render_frames(
        &mut self,
        graph: &SceneGraph,
        frames: u64,
    ) -> AnimaResult<Option<RunSummary>> {
        for _ in 0..frames {
            if let TickOutcome::Stopped(summary) = self.tick(graph).await? {
                return Ok(Some(summary));
            }
        }
        self.drain_in_flight().await?;
        Ok(None)
    }

    /// Read back every frame still in flight without cancelling any.
    async fn drain_in_flight(&mut self) -> AnimaResult<()> {
        while !self.in_flight.is_empty() {
            match self.retire_oldest().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(self.abort(e).await),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Wait for the oldest in-flight frame and hand it to the sink.
    async fn retire_oldest(&mut self) -> AnimaResult<Option<u64>> {
        let Some(entry) = self.in_flight.pop_front() else {
            return Ok(None);
        };
        let fence = match entry.acceptance.accepted().await {
            Ok(fence) => fence,
            Err(AnimaError::Cancelled(_)) => {
                self.cancelled += 1;
                tracing::debug!("Frame {} was cancelled before submission", entry.frame_index);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.backend.poll_completion();
        let pixels = fence.wait().await?;
        self.delivered += 1;
        self.deliver(pixels, entry.frame_index).await?;
        Ok(Some(entry.frame_index))
    }

    async fn deliver(&mut self, pixels: FrameBuffer, index: u64) -> AnimaResult<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let result = sink.submit(pixels, index).await;
        self.dropped = sink.dropped();
        match result {
            Err(AnimaError::EncoderQueueFull { frame_index }) => {
                tracing::warn!("Encoder queue full, dropped frame {}", frame_index);
                Ok(())
            }
            other => other,
        }
    }

    async fn apply_resize(&mut self, delivered: &mut Vec<u64>) -> AnimaResult<()> {
        let Some((width, height)) = self.pending_resize.take() else {
            return Ok(());
        };
        if (width, height) == (self.config.width, self.config.height) {
            return Ok(());
        }
        // Frames queued for the old target must reach the GPU before it goes.
        while !self.in_flight.is_empty() {
            if let Some(index) = self.retire_oldest().await? {
                delivered.push(index);
            }
        }
        let texture = self
            .backend
            .create_texture(&TextureDesc::render_target(width, height))?;
        if let Some(old) = self.target.replace(RenderTarget {
            texture,
            width,
            height,
            clear: self.config.background,
        }) {
            self.backend.release_texture(old.texture);
        }
        tracing::info!(
            "Canvas resized from {}x{} to {}x{}",
            self.config.width,
            self.config.height,
            width,
            height
        );
        self.config.width = width;
        self.config.height = height;
        Ok(())
    }

    /// Shut the run down after a fatal error and return that error.
    async fn abort(&mut self, err: AnimaError) -> AnimaError {
        tracing::error!("Run {} failed: {}", self.run_id, err);
        self.last_error = Some(err.duplicate());
        if let Some(secondary) = self.finish().await {
            tracing::warn!("While shutting down after a failure: {}", secondary);
        }
        err
    }

    /// Cancel, drain, close the sink and move to `Stopped`. Returns the
    /// first error met on the way.
    async fn finish(&mut self) -> Option<AnimaError> {
        self.token.cancel();
        if let Some(prev) = self.anchor.take() {
            self.sim_time += prev.elapsed().as_secs_f64();
        }

        let mut first_error = None;
        while !self.in_flight.is_empty() {
            if let Err(e) = self.retire_oldest().await {
                tracing::warn!("Frame lost while draining: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut queue) = self.queue.take() {
            queue.shutdown().await;
        }
        if let Some(target) = self.target.take() {
            self.backend.release_texture(target.texture);
        }

        let sink_report = match self.sink.take() {
            Some(mut sink) => match sink.close().await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!("Export sink failed to close: {}", e);
                    first_error.get_or_insert(e);
                    None
                }
            },
            None => None,
        };

        self.state = SchedulerState::Stopped;
        self.ticker = None;
        let summary = self.build_summary(sink_report);
        tracing::info!(
            "Run {} stopped: {} submitted, {} delivered, {} dropped, {} cancelled, t={:.3}s",
            summary.run_id,
            summary.frames_submitted,
            summary.frames_delivered,
            summary.frames_dropped,
            summary.frames_cancelled,
            summary.simulated_time
        );
        self.summary = Some(summary);

        if let Some(e) = &first_error {
            if self.last_error.is_none() {
                self.last_error = Some(e.duplicate());
            }
        }
        first_error
    }

    fn build_summary(&self, sink: Option<SinkReport>) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            frames_submitted: self.submitted,
            frames_delivered: self.delivered,
            frames_dropped: self.dropped,
            frames_cancelled: self.cancelled,
            simulated_time: self.sim_time,
            sink,
        }
    }

    fn current_summary(&self) -> RunSummary {
        self.summary
            .clone()
            .unwrap_or_else(|| self.build_summary(None))
    }

    /// Record a start failure: the scheduler is `Stopped` with `err` kept.
    fn fail(&mut self, err: AnimaError) -> AnimaError {
        tracing::error!("Run {} could not start: {}", self.run_id, err);
        self.state = SchedulerState::Stopped;
        self.last_error = Some(err.duplicate());
        err
    }
}
