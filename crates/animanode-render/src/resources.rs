use std::collections::HashMap;

use animanode_core::AnimaResult;
use animanode_ir::{MaterialId, Mesh, MeshId};

use crate::gpu::{BufferHandle, BufferUsage, GpuBackend, Vertex};
use crate::material::Material;

/// GPU buffers of an uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshResource {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub index_count: u32,
    pub vertex_count: u32,
}

/// The materials and meshes a frame may reference.
///
/// Read-only while frames compile; rebuild or extend it between runs.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    materials: HashMap<MaterialId, Material>,
    meshes: HashMap<MeshId, MeshResource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material, returning the one it replaces.
    pub fn add_material(&mut self, id: impl Into<String>, material: Material) -> Option<Material> {
        self.materials.insert(MaterialId::new(id), material)
    }

    pub fn material(&self, id: &MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    /// Validate `mesh`, upload its vertex and index buffers to `backend` and
    /// register it under `id`.
    pub fn upload_mesh(
        &mut self,
        backend: &dyn GpuBackend,
        id: impl Into<String>,
        mesh: &Mesh,
    ) -> AnimaResult<MeshResource> {
        let id = MeshId::new(id);
        mesh.validate()?;
        let vertices: Vec<Vertex> = mesh
            .positions
            .iter()
            .zip(&mesh.uvs)
            .map(|(p, uv)| Vertex {
                position: *p,
                uv: *uv,
            })
            .collect();

        let label = format!("mesh_{}", id);
        let resource = MeshResource {
            vertices: backend.create_buffer(
                &label,
                BufferUsage::Vertex,
                bytemuck::cast_slice(&vertices),
            )?,
            indices: backend.create_buffer(
                &label,
                BufferUsage::Index,
                bytemuck::cast_slice(&mesh.indices),
            )?,
            index_count: mesh.indices.len() as u32,
            vertex_count: vertices.len() as u32,
        };
        tracing::debug!(
            "Uploaded mesh '{}' ({} vertices, {} triangles) to {}",
            id,
            resource.vertex_count,
            mesh.triangle_count(),
            backend.name()
        );
        self.meshes.insert(id, resource);
        Ok(resource)
    }

    pub fn mesh(&self, id: &MeshId) -> Option<&MeshResource> {
        self.meshes.get(id)
    }

    /// Upload the stock meshes: `quad` (unit square), `circle` (unit
    /// diameter) and `triangle` (unit circumradius).
    pub fn with_builtin_meshes(mut self, backend: &dyn GpuBackend) -> AnimaResult<Self> {
        self.upload_mesh(backend, "quad", &Mesh::quad())?;
        self.upload_mesh(backend, "circle", &Mesh::circle(0.5, 48))?;
        self.upload_mesh(backend, "triangle", &Mesh::equilateral(1.0))?;
        Ok(self)
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}
