use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::geometry::Geometry;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12, // [f32; 3] is 12 bytes
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Interleave a geometry's positions and normals.
pub fn vertices(geometry: &Geometry) -> Vec<Vertex> {
    geometry
        .positions
        .iter()
        .zip(&geometry.normals)
        .map(|(p, n)| Vertex {
            position: p.to_array(),
            normal: n.to_array(),
        })
        .collect()
}

/// GPU buffers for one scene geometry. Edge indices are built on first use
/// by a wireframe material.
pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_indices: u32,
    pub edge_buffer: Option<wgpu::Buffer>,
    pub num_edges: u32,
}

impl GpuGeometry {
    pub fn upload(device: &wgpu::Device, geometry: &Geometry, with_edges: bool) -> Self {
        let vertices = vertices(geometry);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Index Buffer"),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let mut gpu = Self {
            vertex_buffer,
            index_buffer,
            num_indices: geometry.indices.len() as u32,
            edge_buffer: None,
            num_edges: 0,
        };
        if with_edges {
            gpu.ensure_edges(device, geometry);
        }
        gpu
    }

    pub fn ensure_edges(&mut self, device: &wgpu::Device, geometry: &Geometry) {
        if self.edge_buffer.is_some() {
            return;
        }
        let edges = geometry.edges();
        self.edge_buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Wireframe Index Buffer"),
            contents: bytemuck::cast_slice(&edges),
            usage: wgpu::BufferUsages::INDEX,
        }));
        self.num_edges = edges.len() as u32;
    }

    /// Index buffer and count for a topology.
    pub fn indices(&self, lines: bool) -> Option<(&wgpu::Buffer, u32)> {
        if lines {
            self.edge_buffer.as_ref().map(|b| (b, self.num_edges))
        } else {
            Some((&self.index_buffer, self.num_indices))
        }
    }

    pub fn destroy(self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
        if let Some(edges) = self.edge_buffer {
            edges.destroy();
        }
    }
}
