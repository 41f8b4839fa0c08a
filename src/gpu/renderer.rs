//! Offscreen wgpu backend for the [`Renderer`] seam.
//!
//! Frames are drawn into an sRGB colour target plus depth buffer and can be
//! read back as an image. Geometry buffers are uploaded lazily the first time
//! an id is drawn and freed when the scene manager disposes that id; pipelines
//! are cached per [`PipelineKey`] for the renderer's lifetime.

use std::collections::HashMap;
use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::camera::CameraUniforms;
use crate::config::PreviewConfig;
use crate::error::{RenderError, SetupError};
use crate::gpu::mesh::GpuGeometry;
use crate::gpu::pipeline::{create_mesh_pipeline, PipelineKey};
use crate::lighting::LightingUniforms;
use crate::material::BlendMode;
use crate::renderer::{check_size, RenderFrame, Renderer, RendererFactory};
use crate::scene_graph::{DrawItem, GeometryId, MaterialId, SceneGraph};

/// Maximum number of meshes that can be drawn per frame.
/// Each mesh needs its own slot in the dynamic uniform buffer.
const MAX_DRAWS_PER_FRAME: usize = 1024;

/// Uniform buffer alignment (minUniformBufferOffsetAlignment is typically 256 bytes)
const UNIFORM_ALIGNMENT: usize = 256;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.1,
    b: 0.1,
    a: 1.0,
};

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FrameUniforms {
    camera: CameraUniforms,
    lighting: LightingUniforms,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct DrawUniforms {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
    color: [f32; 4],
    emissive: [f32; 4],
    params: [f32; 4],
    // Padding to reach 256-byte alignment (176 bytes of data + 80 bytes padding)
    _padding: [f32; 20],
}

impl DrawUniforms {
    fn new(item: &DrawItem, graph: &SceneGraph) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.model = item.world.to_cols_array_2d();
        uniforms.normal = normal_matrix(item.world).to_cols_array_2d();
        if let Some(material) = graph.material(item.material) {
            uniforms.color = material.color_rgba();
            uniforms.emissive = material.emissive_rgba();
            uniforms.params = [
                material.roughness,
                material.metalness,
                if material.flat_shading { 1.0 } else { 0.0 },
                if material.wireframe { 1.0 } else { 0.0 },
            ];
        } else {
            uniforms.color = [1.0, 1.0, 1.0, 1.0];
        }
        uniforms
    }
}

fn normal_matrix(world: Mat4) -> Mat4 {
    if world.determinant().abs() < f32::EPSILON {
        return Mat4::IDENTITY;
    }
    world.inverse().transpose()
}

struct Targets {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl Targets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Color Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Depth Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self {
            width,
            height,
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            color,
            depth,
        }
    }

    fn destroy(&self) {
        self.color.destroy();
        self.depth.destroy();
    }
}

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    targets: Targets,
}

pub struct GpuRenderer {
    gpu: Option<Gpu>,
    geometries: HashMap<GeometryId, GpuGeometry>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    rendered: bool,
}

impl GpuRenderer {
    /// Request an adapter and device and allocate targets for the configured
    /// viewport.
    pub async fn new(config: &PreviewConfig) -> Result<Self, SetupError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SetupError::NoSurface("no suitable GPU adapter found".into()))?;

        let info = adapter.get_info();
        log::info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| SetupError::NoSurface(format!("failed to create device: {e}")))?;

        Ok(Self::with_device(device, queue, config))
    }

    /// Factory that builds a GPU renderer on the sandbox thread.
    pub fn factory() -> RendererFactory {
        Box::new(|config: &PreviewConfig| {
            let renderer = pollster::block_on(GpuRenderer::new(config))?;
            Ok(Box::new(renderer) as Box<dyn Renderer>)
        })
    }

    fn with_device(device: wgpu::Device, queue: wgpu::Queue, config: &PreviewConfig) -> Self {
        let shader = device.create_shader_module(wgpu::include_wgsl!("shader.wgsl"));

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniform Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("frame_bind_group_layout"),
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
            label: Some("frame_bind_group"),
        });

        // One slot per draw, bound with a dynamic offset.
        let draw_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer (Dynamic)"),
            size: (UNIFORM_ALIGNMENT * MAX_DRAWS_PER_FRAME) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                },
                count: None,
            }],
            label: Some("draw_bind_group_layout"),
        });
        let draw_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &draw_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &draw_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
            label: Some("draw_bind_group"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout],
            push_constant_ranges: &[],
        });

        let max_dimension = device.limits().max_texture_dimension_2d;
        let targets = Targets::new(
            &device,
            config.viewport.width.clamp(1, max_dimension),
            config.viewport.height.clamp(1, max_dimension),
        );

        Self {
            gpu: Some(Gpu {
                device,
                queue,
                shader,
                pipeline_layout,
                frame_buffer,
                frame_bind_group,
                draw_buffer,
                draw_bind_group,
                targets,
            }),
            geometries: HashMap::new(),
            pipelines: HashMap::new(),
            rendered: false,
        }
    }

    fn gpu(&self) -> Result<&Gpu, RenderError> {
        self.gpu.as_ref().ok_or(RenderError::Disposed)
    }

    /// Upload geometry buffers and build pipelines this frame needs.
    fn prepare(&mut self, graph: &SceneGraph, items: &[(DrawItem, PipelineKey)]) -> Result<(), RenderError> {
        let gpu = self.gpu.as_ref().ok_or(RenderError::Disposed)?;
        for (item, key) in items {
            let lines = key.topology.uses_edge_indices();
            if let Some(geometry) = graph.geometry(item.geometry) {
                let uploaded = self
                    .geometries
                    .entry(item.geometry)
                    .or_insert_with(|| GpuGeometry::upload(&gpu.device, geometry, lines));
                if lines {
                    uploaded.ensure_edges(&gpu.device, geometry);
                }
            }
            self.pipelines.entry(*key).or_insert_with(|| {
                log::debug!("Building pipeline for {:?}", key);
                create_mesh_pipeline(
                    &gpu.device,
                    &gpu.pipeline_layout,
                    &gpu.shader,
                    COLOR_FORMAT,
                    DEPTH_FORMAT,
                    *key,
                )
            });
        }
        Ok(())
    }
}

impl Renderer for GpuRenderer {
    fn set_size(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::Disposed)?;
        check_size(width, height, gpu.device.limits().max_texture_dimension_2d)?;
        if gpu.targets.width == width && gpu.targets.height == height {
            return Ok(());
        }
        gpu.targets.destroy();
        gpu.targets = Targets::new(&gpu.device, width, height);
        self.rendered = false;
        Ok(())
    }

    fn render(&mut self, frame: &RenderFrame<'_>) -> Result<(), RenderError> {
        self.gpu()?;

        let mut items: Vec<(DrawItem, PipelineKey)> = frame
            .graph
            .draw_list()
            .into_iter()
            .filter_map(|item| {
                let material = frame.graph.material(item.material)?;
                Some((item, PipelineKey::for_material(material)))
            })
            .collect();
        // Opaque first so blended surfaces composite over them.
        items.sort_by_key(|(_, key)| key.blend != BlendMode::Opaque);

        if items.len() > MAX_DRAWS_PER_FRAME {
            log::warn!(
                "Too many meshes ({} > {}), some will not be rendered",
                items.len(),
                MAX_DRAWS_PER_FRAME
            );
            items.truncate(MAX_DRAWS_PER_FRAME);
        }

        self.prepare(frame.graph, &items)?;
        let gpu = self.gpu()?;

        let frame_uniforms = FrameUniforms {
            camera: frame.camera.uniforms(),
            lighting: frame.lights.uniforms(),
        };
        gpu.queue
            .write_buffer(&gpu.frame_buffer, 0, bytemuck::cast_slice(&[frame_uniforms]));

        // queue.write_buffer() is immediate, so every slot is written before
        // the pass is recorded.
        for (slot, (item, _)) in items.iter().enumerate() {
            let uniforms = DrawUniforms::new(item, frame.graph);
            gpu.queue.write_buffer(
                &gpu.draw_buffer,
                (slot * UNIFORM_ALIGNMENT) as u64,
                bytemuck::cast_slice(&[uniforms]),
            );
        }

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Preview Render Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Preview Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu.targets.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_bind_group(0, &gpu.frame_bind_group, &[]);

            for (slot, (item, key)) in items.iter().enumerate() {
                let (Some(pipeline), Some(geometry)) =
                    (self.pipelines.get(key), self.geometries.get(&item.geometry))
                else {
                    continue;
                };
                let Some((index_buffer, count)) = geometry.indices(key.topology.uses_edge_indices())
                else {
                    continue;
                };
                if count == 0 {
                    continue;
                }

                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(
                    1,
                    &gpu.draw_bind_group,
                    &[(slot * UNIFORM_ALIGNMENT) as u32],
                );
                render_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..count, 0, 0..1);
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        self.rendered = true;
        Ok(())
    }

    fn dispose_geometry(&mut self, id: GeometryId) -> Result<(), RenderError> {
        self.gpu()?;
        if let Some(geometry) = self.geometries.remove(&id) {
            geometry.destroy();
        }
        Ok(())
    }

    fn dispose_material(&mut self, _id: MaterialId) -> Result<(), RenderError> {
        // Materials live entirely in per-draw uniforms; pipelines are shared
        // by key and outlive any one material.
        self.gpu()?;
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), RenderError> {
        let gpu = self.gpu.take().ok_or(RenderError::Disposed)?;
        for (_, geometry) in self.geometries.drain() {
            geometry.destroy();
        }
        self.pipelines.clear();
        gpu.targets.destroy();
        gpu.frame_buffer.destroy();
        gpu.draw_buffer.destroy();
        log::debug!("GPU renderer disposed");
        Ok(())
    }

    fn snapshot(&mut self) -> Result<Option<image::RgbaImage>, RenderError> {
        let gpu = self.gpu()?;
        if !self.rendered {
            return Ok(None);
        }
        read_back(gpu).map(Some)
    }
}

impl Drop for GpuRenderer {
    fn drop(&mut self) {
        if self.gpu.is_some() {
            let _ = self.dispose();
        }
    }
}

/// Copy the colour target into a mappable buffer and wait for it.
fn read_back(gpu: &Gpu) -> Result<image::RgbaImage, RenderError> {
    let width = gpu.targets.width;
    let height = gpu.targets.height;

    // Rows must be padded to a multiple of 256 bytes for copy_texture_to_buffer
    let unpadded_bytes_per_row = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

    let output_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Snapshot Buffer"),
        size: (padded_bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Snapshot Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &gpu.targets.color,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &output_buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = output_buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| RenderError::Backend(format!("snapshot readback dropped: {e}")))?
        .map_err(|e| RenderError::Backend(format!("failed to map snapshot buffer: {e}")))?;

    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
    }
    output_buffer.unmap();
    output_buffer.destroy();

    image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| RenderError::Backend("snapshot size mismatch".into()))
}
