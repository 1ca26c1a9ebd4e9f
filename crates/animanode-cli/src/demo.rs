//! The built-in demo scene rendered by `animanode render`.

use std::f64::consts::TAU;

use anyhow::Result;
use animanode_core::{BlendMode, Color, Interpolation, Point2D};
use animanode_ir::{
    Mesh, NodeBuilder, NodeId, Renderable, ScalarProperty, SceneGraph, TrackBinding, TrackBuilder,
};
use animanode_render::{GpuBackend, Material, ResourceSet};

/// Length of the demo animation in seconds.
pub const DURATION: f64 = 4.0;

/// Materials and meshes the demo scene references.
pub fn resources(backend: &dyn GpuBackend) -> Result<ResourceSet> {
    let mut resources = ResourceSet::new().with_builtin_meshes(backend)?;
    resources.upload_mesh(backend, "ring", &Mesh::ring(0.42, 0.5, 64))?;
    resources.upload_mesh(backend, "hexagon", &Mesh::regular_polygon(0.5, 6))?;
    resources.add_material("coral", Material::solid(Color::rgb(0.98, 0.45, 0.36)));
    resources.add_material("ink", Material::solid(Color::rgb(0.12, 0.16, 0.28)));
    resources.add_material("mint", Material::solid(Color::rgb(0.36, 0.86, 0.67)));
    resources.add_material(
        "glow",
        Material::blended(Color::rgb(1.0, 0.85, 0.4), BlendMode::Add),
    );
    Ok(resources)
}

/// A spinning hexagon orbited by two satellites, a pulsing ring and a burst
/// of additive sparks, sized for a `width` x `height` canvas.
pub fn scene(width: u32, height: u32) -> Result<SceneGraph> {
    let unit = f64::from(width.min(height)) / 10.0;
    let mut graph = SceneGraph::new();

    let spin = TrackBuilder::new(Interpolation::Linear)
        .key(0.0, 0.0)
        .key(DURATION, TAU)
        .build()?;
    let hub = graph.add_node(
        NodeId::ROOT,
        NodeBuilder::new("hub")
            .scale(unit * 2.5)
            .mesh("hexagon", "ink")
            .animate(ScalarProperty::Rotation, spin)
            .build(),
    )?;

    // Satellites hang off an orbit node so they inherit its rotation.
    let orbit_spin = TrackBuilder::new(Interpolation::Cubic)
        .key(0.0, 0.0)
        .key(DURATION * 0.5, -TAU * 0.6)
        .key(DURATION, -TAU)
        .build()?;
    let orbit = graph.add_node(
        NodeId::ROOT,
        NodeBuilder::new("orbit")
            .animate(ScalarProperty::Rotation, orbit_spin)
            .build(),
    )?;
    for (i, material) in ["coral", "mint"].into_iter().enumerate() {
        let side = if i == 0 { 1.0 } else { -1.0 };
        graph.add_node(
            orbit,
            NodeBuilder::new(format!("satellite_{}", i))
                .position(side * unit * 3.2, 0.0)
                .scale(unit * 0.9)
                .z(1.0)
                .mesh("circle", material)
                .build(),
        )?;
    }

    let pulse = TrackBuilder::new(Interpolation::Cubic)
        .key(0.0, Point2D::new(unit * 4.0, unit * 4.0))
        .key(DURATION * 0.5, Point2D::new(unit * 5.5, unit * 5.5))
        .key(DURATION, Point2D::new(unit * 4.0, unit * 4.0))
        .build()?;
    let ring_tint = TrackBuilder::new(Interpolation::Linear)
        .key(0.0, Color::rgb(0.98, 0.45, 0.36))
        .key(DURATION, Color::rgb(0.36, 0.86, 0.67))
        .build()?;
    graph.add_node(
        NodeId::ROOT,
        NodeBuilder::new("ring")
            .z(0.5)
            .mesh("ring", "mint")
            .bind(TrackBinding::Scale(pulse))
            .bind(TrackBinding::Tint(ring_tint))
            .build(),
    )?;

    let sparks: Vec<Point2D> = (0..24)
        .map(|i| {
            let angle = TAU * f64::from(i) / 24.0;
            let radius = if i % 2 == 0 { 1.0 } else { 0.8 };
            Point2D::new(angle.cos() * radius, angle.sin() * radius)
        })
        .collect();
    let burst = TrackBuilder::new(Interpolation::Linear)
        .key(0.0, 0.0)
        .key(DURATION * 0.5, 1.0)
        .key(DURATION, 0.0)
        .build()?;
    let spread = TrackBuilder::new(Interpolation::Linear)
        .key(0.0, Point2D::new(unit * 2.0, unit * 2.0))
        .key(DURATION, Point2D::new(unit * 4.5, unit * 4.5))
        .build()?;
    graph.add_node(
        NodeId::ROOT,
        NodeBuilder::new("sparks")
            .z(2.0)
            .renderable(
                Renderable::particles("circle", "glow", sparks, 0.08).with_transparent(true),
            )
            .animate(ScalarProperty::Opacity, burst)
            .bind(TrackBinding::Scale(spread))
            .build(),
    )?;

    // Blinks on for the middle of the run.
    let blink = TrackBuilder::new(Interpolation::Step)
        .key(0.0, false)
        .key(DURATION * 0.25, true)
        .key(DURATION * 0.75, false)
        .build()?;
    graph.add_node(
        hub,
        NodeBuilder::new("core")
            .scale(0.3)
            .z(3.0)
            .mesh("triangle", "coral")
            .bind(TrackBinding::Visible(blink))
            .build(),
    )?;

    Ok(graph)
}
