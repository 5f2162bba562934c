//! Traits abstracting the GPU device and command recording.
//!
//! The draw-submission core never talks to wgpu directly. It creates objects
//! through [`RenderDevice`] and records commands through [`CommandRecorder`],
//! so the same caches and encoder run against a real device or
//! `MockRenderDevice`.

use std::ops::Range;

use crate::error::DeviceError;
use crate::gpu_types::*;
use crate::submit::SubmitFuture;

/// Limits the core needs to size its batches and binding sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_sampled_textures_per_shader_stage: u32,
    pub max_samplers_per_shader_stage: u32,
    pub max_bind_groups: u32,
    pub max_vertex_buffers: u32,
}

impl Default for DeviceLimits {
    /// WebGPU baseline limits.
    fn default() -> Self {
        Self {
            max_sampled_textures_per_shader_stage: 16,
            max_samplers_per_shader_stage: 16,
            max_bind_groups: 4,
            max_vertex_buffers: 8,
        }
    }
}

impl From<&wgpu::Limits> for DeviceLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_sampled_textures_per_shader_stage: limits.max_sampled_textures_per_shader_stage,
            max_samplers_per_shader_stage: limits.max_samplers_per_shader_stage,
            max_bind_groups: limits.max_bind_groups,
            max_vertex_buffers: limits.max_vertex_buffers,
        }
    }
}

/// A resource bound at one binding slot of a bind group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindGroupResource {
    TextureView(GpuTextureView),
    Sampler(GpuSampler),
    Buffer(GpuBuffer),
}

impl BindGroupResource {
    pub fn id(&self) -> GpuResourceId {
        match self {
            Self::TextureView(view) => view.id(),
            Self::Sampler(sampler) => sampler.id(),
            Self::Buffer(buffer) => buffer.id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindGroupResource,
}

/// Bind group descriptor referencing wrapped resources.
#[derive(Debug, Clone)]
pub struct BindGroupDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: &'a GpuBindGroupLayout,
    pub entries: &'a [BindGroupEntry],
}

/// Owned counterpart of `wgpu::VertexBufferLayout`.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: wgpu::BufferAddress,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexBufferLayout {
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

/// Render pipeline descriptor referencing wrapped resources.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    /// Bind group layouts, one per group index.
    pub bind_group_layouts: &'a [GpuBindGroupLayout],
    pub module: &'a GpuShaderModule,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_buffers: &'a [VertexBufferLayout],
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub multisample: wgpu::MultisampleState,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
}

#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: GpuTextureView,
    pub resolve_target: Option<GpuTextureView>,
    pub load: wgpu::LoadOp<wgpu::Color>,
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: GpuTextureView,
    /// `None` when the attachment has no depth aspect.
    pub depth_load: Option<wgpu::LoadOp<f32>>,
    /// `None` when the attachment has no stencil aspect.
    pub stencil_load: Option<wgpu::LoadOp<u32>>,
}

/// Render pass descriptor referencing wrapped attachments.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
}

impl RenderPassDescriptor {
    /// The same attachments with every clear turned into a load.
    ///
    /// Used to resume a pass without wiping what was already drawn.
    pub fn resumed(&self) -> Self {
        let mut resumed = self.clone();
        for attachment in &mut resumed.color_attachments {
            attachment.load = wgpu::LoadOp::Load;
        }
        if let Some(depth_stencil) = &mut resumed.depth_stencil {
            if depth_stencil.depth_load.is_some() {
                depth_stencil.depth_load = Some(wgpu::LoadOp::Load);
            }
            if depth_stencil.stencil_load.is_some() {
                depth_stencil.stencil_load = Some(wgpu::LoadOp::Load);
            }
        }
        resumed
    }

    /// Whether any attachment clears on load.
    pub fn clears(&self) -> bool {
        let color = self
            .color_attachments
            .iter()
            .any(|a| matches!(a.load, wgpu::LoadOp::Clear(_)));
        let depth_stencil = self.depth_stencil.as_ref().is_some_and(|ds| {
            matches!(ds.depth_load, Some(wgpu::LoadOp::Clear(_)))
                || matches!(ds.stencil_load, Some(wgpu::LoadOp::Clear(_)))
        });
        color || depth_stencil
    }
}

/// Trait abstracting GPU resource creation and submission.
///
/// # Lifetime Considerations
///
/// Methods take `&self` and return owned wrapper types, so the trait is
/// object-safe and one device can be shared (via `Arc`) by every cache and the
/// encoder. Mock implementations use interior mutability to record calls.
///
/// Creation of shader modules, bind groups and pipelines is fallible: these
/// are the objects whose descriptors the core derives, so validation failures
/// must reach the caller instead of surfacing later as a device error.
pub trait RenderDevice: Send + Sync {
    /// Limits relevant to batching.
    fn limits(&self) -> DeviceLimits;

    // Buffer operations

    fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> GpuBuffer;

    /// Write data to a buffer.
    ///
    /// For real buffers, this maps to `queue.write_buffer()`.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    // Texture operations

    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture;

    /// Upload the full first mip level of a 2D texture.
    fn write_texture(&self, texture: &GpuTexture, data: &[u8], bytes_per_row: u32);

    /// Create the default view of a texture.
    fn create_texture_view(&self, texture: &GpuTexture) -> GpuTextureView;

    fn create_sampler(&self, desc: &wgpu::SamplerDescriptor) -> GpuSampler;

    // Shader operations

    fn create_shader_module(
        &self,
        desc: &wgpu::ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, DeviceError>;

    // Bind group operations

    fn create_bind_group_layout(&self, desc: &wgpu::BindGroupLayoutDescriptor) -> GpuBindGroupLayout;

    fn create_bind_group(&self, desc: &BindGroupDescriptor) -> Result<GpuBindGroup, DeviceError>;

    // Pipeline operations

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, DeviceError>;

    // Command submission

    /// Start recording commands for one frame.
    fn create_command_recorder(&self, label: Option<&str>) -> Box<dyn CommandRecorder>;

    /// Submit a finished command buffer to the queue.
    ///
    /// The returned future resolves once the device reports the work done.
    fn submit(&self, commands: GpuCommandBuffer) -> SubmitFuture;
}

/// Trait abstracting command recording.
///
/// Recorders perform no redundancy checks of their own; every call is
/// forwarded to the device. Deduplication is the encoder's job.
pub trait CommandRecorder: Send {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn set_pipeline(&mut self, pipeline: &GpuRenderPipeline);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer);

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: wgpu::IndexFormat);

    fn set_bind_group(&mut self, index: u32, group: &GpuBindGroup);

    fn set_stencil_reference(&mut self, reference: u32);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    fn insert_debug_marker(&mut self, label: &str);

    /// Copy mip level 0 of `texture` into `buffer`, rows `bytes_per_row`
    /// apart. Only valid outside a render pass.
    fn copy_texture_to_buffer(
        &mut self,
        texture: &GpuTexture,
        buffer: &GpuBuffer,
        bytes_per_row: u32,
    );

    /// Close recording and produce a command buffer.
    fn finish(self: Box<Self>) -> GpuCommandBuffer;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_webgpu_baseline() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.max_sampled_textures_per_shader_stage, 16);
        assert_eq!(limits.max_bind_groups, 4);
    }

    #[test]
    fn test_limits_from_wgpu() {
        let limits = DeviceLimits::from(&wgpu::Limits::downlevel_defaults());
        assert_eq!(limits.max_bind_groups, 4);
    }

    #[test]
    fn test_empty_pass_does_not_clear() {
        assert!(!RenderPassDescriptor::default().clears());
    }
}
