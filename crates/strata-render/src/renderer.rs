//! Frame-level driver tying the batcher output to the caches and encoder.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use strata_core::profiling::{self, profile_function, profile_scope};
use strata_test_utils::{
    ColorAttachment, DepthStencilAttachment, GpuBuffer, GpuSampler, GpuTextureView,
    RenderDevice, RenderPassDescriptor, SubmitFuture,
};

use crate::batcher::{Batch, BatchGeometry, BatchKind, BatchVertex, Batcher, BatcherOptions};
use crate::binding_cache::{BindingCacheStats, BindingSet, ResourceBindingCache};
use crate::encoder::{DrawRequest, EncoderPhase, EncoderStats, StateTrackingEncoder};
use crate::error::{ProtocolError, RenderResult, protocol};
use crate::executor::{
    BatchExecutor, BatchResources, ExecutionContext, GeometryPlacement, GpuBatchExecutor,
    batch_shader,
};
use crate::pipeline_cache::{PipelineCache, PipelineCacheStats, PipelineRequest};
use crate::resource::{BindingKind, BindingResource, BufferResource, TextureSource};
use crate::sampler_cache::{ImageSampling, SamplerCache};
use crate::shader::{BindingLayout, BindingSlot};
use crate::state::{GlobalRenderState, RenderState, StencilMode};

/// Texture slots per batch when the config leaves it to the device.
pub const DEFAULT_MAX_TEXTURES: usize = 16;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub label: &'static str,
    /// Texture slots per batch. `None` uses the device limit, capped at
    /// [`DEFAULT_MAX_TEXTURES`].
    pub max_textures: Option<usize>,
    /// Initial batch vertex buffer size, in vertices.
    pub initial_vertex_capacity: usize,
    /// Initial batch index buffer size, in indices.
    pub initial_index_capacity: usize,
    /// Reclaim binding sets idle for this many frames at the end of each frame.
    pub binding_idle_frames: Option<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let batcher = BatcherOptions::default();
        Self {
            label: "strata_renderer",
            max_textures: None,
            initial_vertex_capacity: batcher.initial_vertex_capacity,
            initial_index_capacity: batcher.initial_index_capacity,
            binding_idle_frames: None,
        }
    }
}

impl RendererConfig {
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn max_textures(mut self, max_textures: usize) -> Self {
        self.max_textures = Some(max_textures);
        self
    }

    pub fn initial_capacity(mut self, vertices: usize, indices: usize) -> Self {
        self.initial_vertex_capacity = vertices;
        self.initial_index_capacity = indices;
        self
    }

    pub fn reclaim_idle_bindings(mut self, frames: u64) -> Self {
        self.binding_idle_frames = Some(frames);
        self
    }
}

/// Depth/stencil attachment of a [`RenderTarget`].
#[derive(Debug, Clone)]
pub struct DepthStencilTarget {
    pub view: GpuTextureView,
    pub format: wgpu::TextureFormat,
    /// `None` loads the existing contents.
    pub clear_depth: Option<f32>,
    pub clear_stencil: Option<u32>,
}

/// Where a frame is drawn.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub color: GpuTextureView,
    pub format: wgpu::TextureFormat,
    pub resolve_target: Option<GpuTextureView>,
    pub sample_count: u32,
    /// `None` loads the existing contents.
    pub clear_color: Option<wgpu::Color>,
    pub depth_stencil: Option<DepthStencilTarget>,
}

impl RenderTarget {
    pub fn new(color: GpuTextureView, format: wgpu::TextureFormat) -> Self {
        Self {
            color,
            format,
            resolve_target: None,
            sample_count: 1,
            clear_color: None,
            depth_stencil: None,
        }
    }

    pub fn with_clear_color(mut self, color: wgpu::Color) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilTarget) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    /// Render into a multisampled `color`, resolving into `resolve_target`.
    pub fn with_multisample(mut self, sample_count: u32, resolve_target: GpuTextureView) -> Self {
        self.sample_count = sample_count;
        self.resolve_target = Some(resolve_target);
        self
    }

    pub fn global_state(
        &self,
        stencil_mode: StencilMode,
        color_mask: wgpu::ColorWrites,
    ) -> GlobalRenderState {
        GlobalRenderState {
            sample_count: self.sample_count,
            depth_stencil_format: self.depth_stencil.as_ref().map(|ds| ds.format),
            stencil_mode,
            color_mask,
            ..GlobalRenderState::new(self.format)
        }
    }

    pub fn pass_descriptor(&self, label: &str) -> RenderPassDescriptor {
        let depth_stencil = self.depth_stencil.as_ref().map(|ds| DepthStencilAttachment {
            view: ds.view.clone(),
            depth_load: ds
                .format
                .has_depth_aspect()
                .then(|| ds.clear_depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear)),
            stencil_load: ds
                .format
                .has_stencil_aspect()
                .then(|| ds.clear_stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear)),
        });
        RenderPassDescriptor {
            label: Some(label.to_string()),
            color_attachments: vec![ColorAttachment {
                view: self.color.clone(),
                resolve_target: self.resolve_target.clone(),
                load: self.clear_color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            }],
            depth_stencil,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GlobalsUniform {
    projection: [[f32; 4]; 4],
}

impl GlobalsUniform {
    const SIZE: u64 = std::mem::size_of::<GlobalsUniform>() as u64;

    fn new(projection: glam::Mat4) -> Self {
        Self {
            projection: projection.to_cols_array_2d(),
        }
    }
}

fn create_globals_buffer(device: &dyn RenderDevice, projection: glam::Mat4) -> GpuBuffer {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("globals_uniform"),
        size: GlobalsUniform::SIZE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    device.write_buffer(&buffer, 0, bytemuck::bytes_of(&GlobalsUniform::new(projection)));
    buffer
}

/// Growable buffer written front to back once per frame.
///
/// Data already written this frame is never overwritten: when the next
/// write does not fit, a larger buffer replaces this one and earlier draws
/// keep the old one alive.
struct FrameBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: GpuBuffer,
    cursor: u64,
}

impl FrameBuffer {
    fn new(
        device: &dyn RenderDevice,
        label: &'static str,
        usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        Self {
            label,
            usage,
            buffer: Self::create(device, label, usage, capacity.max(4)),
            cursor: 0,
        }
    }

    fn create(
        device: &dyn RenderDevice,
        label: &'static str,
        usage: wgpu::BufferUsages,
        size: u64,
    ) -> GpuBuffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Append `data`, returning the buffer it landed in and its byte offset.
    fn push(&mut self, device: &dyn RenderDevice, data: &[u8]) -> (GpuBuffer, u64) {
        let size = data.len() as u64;
        if self.cursor + size > self.buffer.size() {
            let capacity = size.max(self.buffer.size() * 2).next_power_of_two();
            tracing::debug!("Growing {} to {capacity} bytes", self.label);
            self.buffer = Self::create(device, self.label, self.usage, capacity);
            self.cursor = 0;
        }
        let offset = self.cursor;
        device.write_buffer(&self.buffer, offset, data);
        self.cursor += size;
        (self.buffer.clone(), offset)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Owns the caches, the encoder and the batch buffers for one device.
///
/// # Frame lifecycle
///
/// ```text
/// render_start(target) → render_batches(..)* → render_end() → SubmitFuture
/// ```
pub struct Renderer {
    device: Arc<dyn RenderDevice>,
    config: RendererConfig,
    samplers: SamplerCache,
    pipelines: PipelineCache,
    bindings: ResourceBindingCache,
    encoder: StateTrackingEncoder,
    executor: Box<dyn BatchExecutor>,
    resources: BatchResources,
    globals: BufferResource,
    globals_set: Arc<BindingSet>,
    projection: glam::Mat4,
    vertices: FrameBuffer,
    indices: FrameBuffer,
    stencil_mode: StencilMode,
    color_mask: wgpu::ColorWrites,
    tick: u64,
}

impl Renderer {
    pub fn new(device: Arc<dyn RenderDevice>, config: RendererConfig) -> Self {
        profile_function!();
        let limits = device.limits();
        let device_max = limits
            .max_sampled_textures_per_shader_stage
            .min(limits.max_samplers_per_shader_stage) as usize;
        let max_textures = config
            .max_textures
            .unwrap_or(DEFAULT_MAX_TEXTURES)
            .min(device_max)
            .max(1);

        let samplers = SamplerCache::new();
        let mut bindings = ResourceBindingCache::new(device.as_ref(), &samplers);
        let texture_layout = bindings.texture_batch_layout(device.as_ref(), max_textures);
        let globals_layout = BindingLayout::new(
            device.as_ref(),
            "globals_layout",
            vec![BindingSlot::new(
                0,
                BindingKind::UniformBuffer,
                wgpu::ShaderStages::VERTEX,
            )],
        );
        let shader = Arc::new(batch_shader(
            max_textures,
            Arc::clone(&globals_layout),
            texture_layout,
        ));

        let projection = glam::Mat4::IDENTITY;
        let globals = BufferResource::new(create_globals_buffer(device.as_ref(), projection));
        let globals_set = BindingSet::new(
            globals_layout,
            vec![BindingResource::UniformBuffer(globals.clone())],
        );

        let vertices = FrameBuffer::new(
            device.as_ref(),
            "batch_vertices",
            wgpu::BufferUsages::VERTEX,
            config.initial_vertex_capacity as u64 * BatchVertex::STRIDE,
        );
        let indices = FrameBuffer::new(
            device.as_ref(),
            "batch_indices",
            wgpu::BufferUsages::INDEX,
            config.initial_index_capacity as u64 * 4,
        );

        tracing::info!(
            "Created renderer '{}' with {max_textures} texture slots per batch",
            config.label
        );

        Self {
            encoder: StateTrackingEncoder::new(Arc::clone(&device)),
            device,
            config,
            samplers,
            pipelines: PipelineCache::new(),
            bindings,
            executor: Box::new(GpuBatchExecutor),
            resources: BatchResources::new(shader, max_textures),
            globals,
            globals_set,
            projection,
            vertices,
            indices,
            stencil_mode: StencilMode::None,
            color_mask: wgpu::ColorWrites::ALL,
            tick: 0,
        }
    }

    /// Replace the executor batches are dispatched through.
    pub fn with_executor(mut self, executor: Box<dyn BatchExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn max_textures(&self) -> usize {
        self.resources.max_textures
    }

    /// A batcher sized for this renderer's texture slots.
    pub fn create_batcher(&self) -> Batcher {
        Batcher::new(BatcherOptions {
            max_textures: self.resources.max_textures,
            initial_vertex_capacity: self.config.initial_vertex_capacity,
            initial_index_capacity: self.config.initial_index_capacity,
        })
    }

    pub fn sampler(&self, sampling: ImageSampling) -> GpuSampler {
        self.samplers.from_sampling(self.device.as_ref(), sampling)
    }

    /// Pair a texture view with a shared sampler.
    pub fn texture_source(&self, view: GpuTextureView, sampling: ImageSampling) -> TextureSource {
        TextureSource::from_parts(view, self.sampler(sampling))
    }

    pub fn projection(&self) -> glam::Mat4 {
        self.projection
    }

    /// Set the projection applied by the batch shader.
    ///
    /// Mid-frame, the globals move to a new buffer so batches already
    /// recorded keep the old projection.
    pub fn set_projection(&mut self, projection: glam::Mat4) {
        if projection == self.projection {
            return;
        }
        self.projection = projection;
        if self.encoder.phase() == EncoderPhase::Idle {
            self.device.write_buffer(
                &self.globals.get(),
                0,
                bytemuck::bytes_of(&GlobalsUniform::new(projection)),
            );
        } else {
            self.globals
                .update(create_globals_buffer(self.device.as_ref(), projection));
        }
    }

    pub fn stencil_mode(&self) -> StencilMode {
        self.stencil_mode
    }

    pub fn set_stencil_mode(&mut self, mode: StencilMode) -> RenderResult<()> {
        self.stencil_mode = mode;
        self.refresh_global_state()
    }

    pub fn set_color_mask(&mut self, mask: wgpu::ColorWrites) -> RenderResult<()> {
        self.color_mask = mask;
        self.refresh_global_state()
    }

    pub fn set_stencil_reference(&mut self, reference: u32) -> RenderResult<bool> {
        self.encoder.set_stencil_reference(reference)
    }

    fn refresh_global_state(&mut self) -> RenderResult<()> {
        if let Some(state) = self.pipelines.global_state().copied() {
            self.pipelines.set_global_state(GlobalRenderState {
                stencil_mode: self.stencil_mode,
                color_mask: self.color_mask,
                ..state
            })?;
        }
        Ok(())
    }

    /// Advance the frame tick, apply the target's global state, start
    /// recording and begin the pass.
    pub fn render_start(&mut self, target: &RenderTarget) -> RenderResult<()> {
        profiling::new_frame();
        profile_function!();
        self.tick += 1;
        self.bindings.set_tick(self.tick);
        self.vertices.reset();
        self.indices.reset();

        self.pipelines
            .set_global_state(target.global_state(self.stencil_mode, self.color_mask))?;
        self.encoder.start_frame(Some(self.config.label))?;
        self.encoder
            .begin_render_pass(target.pass_descriptor(self.config.label))
    }

    /// Look up pipelines and binding sets ahead of [`Self::render_batches`].
    ///
    /// Custom batches get their pipeline only; their binding sets are
    /// resolved when drawn.
    pub fn resolve_batches(&mut self, batches: &mut [Batch]) -> RenderResult<()> {
        profile_function!();
        let device = self.device.as_ref();
        let global = self.pipelines.global_key();
        for batch in batches.iter_mut() {
            batch.resolved_for = global;
            match &batch.kind {
                BatchKind::Textured { textures } => {
                    let pipeline = self.pipelines.resolve(
                        device,
                        &PipelineRequest {
                            geometry: &self.resources.layout,
                            shader: &self.resources.shader,
                            state: RenderState::empty(),
                            blend: batch.blend_mode,
                            topology: batch.topology,
                        },
                    )?;
                    let group = self.bindings.get_texture_batch(
                        device,
                        textures,
                        self.resources.max_textures,
                    )?;
                    batch.pipeline = Some(pipeline);
                    batch.binding_set = Some(group);
                }
                BatchKind::Custom(draw) => {
                    let pipeline = self.pipelines.resolve(
                        device,
                        &PipelineRequest {
                            geometry: &draw.geometry.layout,
                            shader: &draw.shader,
                            state: draw.state,
                            blend: batch.blend_mode,
                            topology: draw.geometry.topology,
                        },
                    )?;
                    batch.pipeline = Some(pipeline);
                }
            }
        }
        Ok(())
    }

    /// Upload each distinct batch geometry once, then execute every batch
    /// in order.
    pub fn render_batches(&mut self, batches: &[Batch]) -> RenderResult<()> {
        profile_function!();
        if self.encoder.phase() != EncoderPhase::InPass {
            return Err(protocol(ProtocolError::DrawOutsidePass {
                phase: self.encoder.phase(),
            }));
        }

        let device = Arc::clone(&self.device);
        let globals = self.bindings.resolve(device.as_ref(), &self.globals_set)?;

        let mut uploaded: Vec<(&Arc<BatchGeometry>, GeometryPlacement)> = Vec::new();
        let mut placements = Vec::with_capacity(batches.len());
        {
            profile_scope!("upload_batch_geometry");
            for batch in batches {
                let known = uploaded
                    .iter()
                    .find(|(geometry, _)| Arc::ptr_eq(geometry, &batch.geometry))
                    .map(|(_, placement)| placement.clone());
                let placement = match known {
                    Some(placement) => placement,
                    None => {
                        let placement = self.upload(&batch.geometry);
                        uploaded.push((&batch.geometry, placement.clone()));
                        placement
                    }
                };
                placements.push(placement);
            }
        }

        for (batch, placement) in batches.iter().zip(placements) {
            let mut ctx = ExecutionContext {
                encoder: &mut self.encoder,
                pipelines: &mut self.pipelines,
                bindings: &mut self.bindings,
                resources: &self.resources,
                globals: &globals,
                placement,
            };
            self.executor.execute(&mut ctx, batch)?;
        }
        Ok(())
    }

    fn upload(&mut self, geometry: &BatchGeometry) -> GeometryPlacement {
        if geometry.indices.is_empty() {
            return GeometryPlacement {
                vertex_buffer: self.vertices.buffer.clone(),
                index_buffer: self.indices.buffer.clone(),
                base_vertex: 0,
                first_index: 0,
            };
        }
        let device = self.device.as_ref();
        let (vertex_buffer, vertex_offset) = self
            .vertices
            .push(device, bytemuck::cast_slice(&geometry.vertices));
        let (index_buffer, index_offset) = self
            .indices
            .push(device, bytemuck::cast_slice(&geometry.indices));
        GeometryPlacement {
            vertex_buffer,
            index_buffer,
            base_vertex: (vertex_offset / BatchVertex::STRIDE) as i32,
            first_index: (index_offset / 4) as u32,
        }
    }

    /// Draw outside the batcher through the encoder's convenience path.
    pub fn draw(&mut self, request: &DrawRequest<'_>) -> RenderResult<()> {
        self.encoder
            .draw(&mut self.pipelines, &mut self.bindings, request)
    }

    /// End the pass, submit the frame and reclaim idle binding sets if
    /// configured.
    pub fn render_end(&mut self) -> RenderResult<SubmitFuture> {
        profile_function!();
        let future = self.encoder.submit()?;
        if let Some(idle) = self.config.binding_idle_frames {
            self.bindings.reclaim(idle);
        }
        Ok(future)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn encoder(&self) -> &StateTrackingEncoder {
        &self.encoder
    }

    /// For pass interruption and raw binds.
    pub fn encoder_mut(&mut self) -> &mut StateTrackingEncoder {
        &mut self.encoder
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn bindings(&self) -> &ResourceBindingCache {
        &self.bindings
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }

    pub fn pipeline_stats(&self) -> PipelineCacheStats {
        self.pipelines.stats()
    }

    pub fn binding_stats(&self) -> BindingCacheStats {
        self.bindings.stats()
    }
}
