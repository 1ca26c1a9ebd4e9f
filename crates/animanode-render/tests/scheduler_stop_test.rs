//! Stopping and failing runs with a backend whose fences only complete when
//! the scheduler polls for completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use animanode_core::{AnimaError, AnimaResult, Color, FrameBuffer};
use animanode_encode::{ExportSink, FrameCollector, SinkConfig};
use animanode_ir::{Node, NodeId, Renderable, SceneGraph};
use animanode_render::{
    fence, BufferHandle, BufferUsage, FenceSignal, FrameScheduler, GpuBackend, GpuFence,
    Material, RenderCommand, ResourceSet, SchedulerConfig, SchedulerState, SoftwareBackend,
    TextureDesc, TextureHandle, TickOutcome,
};

struct ScriptedBackend {
    inner: SoftwareBackend,
    pending: Mutex<Vec<(FenceSignal, FrameBuffer)>>,
    submissions: AtomicUsize,
    fail_frame: Option<u64>,
}

impl ScriptedBackend {
    fn new(fail_frame: Option<u64>) -> Self {
        Self {
            inner: SoftwareBackend::new(),
            pending: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
            fail_frame,
        }
    }

    fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl GpuBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_buffer(
        &self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> AnimaResult<BufferHandle> {
        self.inner.create_buffer(label, usage, contents)
    }

    fn create_texture(&self, desc: &TextureDesc) -> AnimaResult<TextureHandle> {
        self.inner.create_texture(desc)
    }

    fn release_texture(&self, texture: TextureHandle) {
        self.inner.release_texture(texture)
    }

    fn submit(&self, frame_index: u64, commands: Vec<RenderCommand>) -> AnimaResult<GpuFence> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.fail_frame == Some(frame_index) {
            return Err(AnimaError::gpu(frame_index, "device lost"));
        }
        let (width, height) = commands
            .iter()
            .find_map(|c| match c {
                RenderCommand::BeginPass { width, height, .. } => Some((*width, *height)),
                _ => None,
            })
            .ok_or_else(|| AnimaError::gpu(frame_index, "no pass"))?;
        let (signal, fence) = fence(frame_index);
        let shade = frame_index as f32 / 10.0;
        self.pending.lock().unwrap().push((
            signal,
            FrameBuffer::solid(width, height, &Color::rgb(shade, shade, shade)),
        ));
        Ok(fence)
    }

    fn poll_completion(&self) {
        for (signal, frame) in self.pending.lock().unwrap().drain(..) {
            signal.complete(Ok(frame));
        }
    }
}

fn scene() -> SceneGraph {
    let mut graph = SceneGraph::new();
    graph
        .add_node(
            NodeId::ROOT,
            Node::new("dot").with_renderable(Renderable::mesh("quad", "white")),
        )
        .unwrap();
    graph
}

fn scheduler(
    backend: &Arc<ScriptedBackend>,
    gpu_depth: usize,
    max_in_flight: usize,
) -> (FrameScheduler, animanode_encode::CollectedFrames) {
    let mut resources = ResourceSet::new().with_builtin_meshes(&**backend).unwrap();
    resources.add_material("white", Material::solid(Color::WHITE));
    let config = SchedulerConfig {
        width: 8,
        height: 8,
        max_in_flight,
        gpu_depth,
        ..Default::default()
    };
    let (collector, frames) = FrameCollector::new();
    let sink = ExportSink::new(collector, SinkConfig::default()).unwrap();
    let scheduler = FrameScheduler::new(backend.clone(), resources, config).with_sink(sink);
    (scheduler, frames)
}

#[tokio::test]
async fn test_stop_mid_pipeline_drains_accepted_and_cancels_pending() {
    let backend = Arc::new(ScriptedBackend::new(None));
    let (mut scheduler, frames) = scheduler(&backend, 1, 2);
    let graph = scene();
    scheduler.start(Some(30.0)).unwrap();

    // Frame 0 takes the only GPU slot; frame 1 waits for it.
    scheduler.tick(&graph).await.unwrap();
    scheduler.tick(&graph).await.unwrap();
    while backend.submissions() < 1 {
        tokio::task::yield_now().await;
    }
    assert_eq!(scheduler.in_flight(), 2);

    let summary = scheduler.stop().await.unwrap();

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(backend.submissions(), 1);
    assert_eq!(summary.frames_submitted, 2);
    assert_eq!(summary.frames_delivered, 1);
    assert_eq!(summary.frames_cancelled, 1);
    assert_eq!(frames.indices(), vec![0]);
    assert_eq!(frames.finalize_count(), 1);

    let report = summary.sink.unwrap();
    assert_eq!(report.summary.frames, 1);
    assert_eq!(report.gaps_skipped, 0);
}

#[tokio::test]
async fn test_gpu_failure_is_fatal_and_closes_sink() {
    let backend = Arc::new(ScriptedBackend::new(Some(2)));
    let (mut scheduler, frames) = scheduler(&backend, 2, 1);
    let graph = scene();
    scheduler.start(Some(30.0)).unwrap();

    let mut failure = None;
    for _ in 0..5 {
        match scheduler.tick(&graph).await {
            Ok(TickOutcome::Rendered(_)) => {}
            Ok(other) => panic!("unexpected {:?}", other),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let err = failure.expect("frame 2 must fail");
    assert!(err.is_fatal());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(matches!(
        scheduler.last_error(),
        Some(AnimaError::GpuSubmissionFailed { frame_index: 2, .. })
    ));
    assert_eq!(frames.finalize_count(), 1);
    // Nothing after the rejected frame reaches the GPU or the encoder.
    assert_eq!(frames.indices(), vec![0, 1]);
    assert_eq!(backend.submissions(), 3);

    // The run is over; further ticks only report the summary.
    assert!(matches!(
        scheduler.tick(&graph).await.unwrap(),
        TickOutcome::Stopped(_)
    ));
    let summary = scheduler.stop().await.unwrap();
    assert_eq!(summary.frames_submitted, 4);
    assert_eq!(summary.frames_delivered, 2);
    assert_eq!(summary.frames_cancelled, 1);
}

#[tokio::test]
async fn test_first_frame_failure_refuses_queued_frames() {
    let backend = Arc::new(ScriptedBackend::new(Some(0)));
    let (mut scheduler, frames) = scheduler(&backend, 4, 3);
    let graph = scene();
    scheduler.start(Some(30.0)).unwrap();

    let mut failure = None;
    for _ in 0..6 {
        if let Err(e) = scheduler.tick(&graph).await {
            failure = Some(e);
            break;
        }
    }

    assert!(matches!(
        failure,
        Some(AnimaError::GpuSubmissionFailed { frame_index: 0, .. })
    ));
    assert_eq!(backend.submissions(), 1);
    assert!(frames.indices().is_empty());
    assert_eq!(frames.finalize_count(), 1);
    let summary = scheduler.stop().await.unwrap();
    assert_eq!(summary.frames_cancelled, 3);
}

#[tokio::test]
async fn test_render_range_encodes_every_frame() {
    let backend = Arc::new(ScriptedBackend::new(None));
    let (mut scheduler, frames) = scheduler(&backend, 1, 3);

    let summary = scheduler
        .render_range(&scene(), Some(30.0), 5)
        .await
        .unwrap();

    assert_eq!(frames.indices(), vec![0, 1, 2, 3, 4]);
    assert_eq!(summary.frames_delivered, 5);
    assert_eq!(summary.frames_cancelled, 0);
    assert_eq!(backend.submissions(), 5);
    assert_eq!(summary.sink.unwrap().gaps_skipped, 0);
}
