//! Mock implementation of [`RenderDevice`] for testing.
//!
//! The mock device records every creation call and every recorded command
//! into one shared log without touching a GPU. Tests assert on the log to
//! check cache hit rates and redundant-call elision.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::gpu_types::*;
use crate::render_device::*;
use crate::submit::SubmitFuture;

/// Records a GPU operation call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateBuffer {
        id: GpuResourceId,
        size: u64,
        usage: wgpu::BufferUsages,
    },
    WriteBuffer {
        buffer_id: GpuResourceId,
        offset: u64,
        size: usize,
    },
    CreateTexture {
        id: GpuResourceId,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    },
    WriteTexture {
        texture_id: GpuResourceId,
        size: usize,
    },
    CreateTextureView {
        id: GpuResourceId,
        texture_id: GpuResourceId,
    },
    CreateSampler {
        id: GpuResourceId,
    },
    CreateShaderModule {
        id: GpuResourceId,
        label: Option<String>,
    },
    CreateBindGroupLayout {
        id: GpuResourceId,
        label: Option<String>,
    },
    CreateBindGroup {
        id: GpuResourceId,
        layout_id: GpuResourceId,
        resources: Vec<GpuResourceId>,
    },
    CreateRenderPipeline {
        id: GpuResourceId,
        label: Option<String>,
    },
    BeginRenderPass {
        label: Option<String>,
        clears: bool,
    },
    EndRenderPass,
    SetPipeline {
        id: GpuResourceId,
    },
    SetVertexBuffer {
        slot: u32,
        id: GpuResourceId,
    },
    SetIndexBuffer {
        id: GpuResourceId,
        format: wgpu::IndexFormat,
    },
    SetBindGroup {
        index: u32,
        id: GpuResourceId,
    },
    SetStencilReference {
        reference: u32,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    DebugMarker {
        label: String,
    },
    CopyTextureToBuffer {
        texture_id: GpuResourceId,
        buffer_id: GpuResourceId,
        bytes_per_row: u32,
    },
    FinishCommands,
    Submit,
}

impl RenderCall {
    /// Whether this call was recorded through a [`CommandRecorder`].
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::BeginRenderPass { .. }
                | Self::EndRenderPass
                | Self::SetPipeline { .. }
                | Self::SetVertexBuffer { .. }
                | Self::SetIndexBuffer { .. }
                | Self::SetBindGroup { .. }
                | Self::SetStencilReference { .. }
                | Self::Draw { .. }
                | Self::DrawIndexed { .. }
                | Self::DebugMarker { .. }
                | Self::CopyTextureToBuffer { .. }
        )
    }
}

/// Creation calls a test can force to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    ShaderModule,
    BindGroup,
    RenderPipeline,
}

type CallLog = Arc<Mutex<Vec<RenderCall>>>;

/// Mock implementation of RenderDevice for testing.
///
/// # Borrow Checking Pattern: Interior Mutability
///
/// Methods take `&self` but need to mutate internal state (record calls).
/// The call log is an `Arc<Mutex<..>>` so recorders handed out by
/// [`RenderDevice::create_command_recorder`] append to the same log as the
/// device itself.
///
/// # Validation
///
/// The mock rejects a few descriptors the way a real device would:
/// empty WGSL source, bind groups whose entry count does not match their
/// layout, and pipelines with duplicate vertex shader locations.
///
/// # Example
///
/// ```rust
/// use strata_test_utils::{MockRenderDevice, RenderDevice};
///
/// let mock = MockRenderDevice::new();
/// let mut recorder = mock.create_command_recorder(None);
/// recorder.insert_debug_marker("hello");
/// let commands = recorder.finish();
/// pollster::block_on(mock.submit(commands));
///
/// assert_eq!(mock.count_submits(), 1);
/// ```
pub struct MockRenderDevice {
    /// Recorded calls for verification
    calls: CallLog,
    ids: GpuIdAllocator,
    limits: DeviceLimits,
    /// Entry count per created bind group layout.
    layout_entries: Mutex<Vec<(GpuResourceId, usize)>>,
    /// Pending forced failures, consumed in order of matching calls.
    failures: Mutex<Vec<MockFailure>>,
}

impl MockRenderDevice {
    /// Create a new mock device with WebGPU baseline limits.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            ids: GpuIdAllocator::new(),
            limits,
            layout_entries: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Make the next call of the given kind fail with a validation error.
    pub fn fail_next(&self, failure: MockFailure) {
        self.failures.lock().push(failure);
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    /// Only the calls recorded through command recorders.
    pub fn commands(&self) -> Vec<RenderCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_command())
            .cloned()
            .collect()
    }

    /// Count calls matching a predicate.
    pub fn count(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn count_buffer_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateBuffer { .. }))
    }

    pub fn count_buffer_writes(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::WriteBuffer { .. }))
    }

    pub fn count_shader_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateShaderModule { .. }))
    }

    pub fn count_bind_group_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateBindGroup { .. }))
    }

    pub fn count_render_pipeline_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateRenderPipeline { .. }))
    }

    pub fn count_set_pipeline(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::SetPipeline { .. }))
    }

    pub fn count_set_bind_group(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::SetBindGroup { .. }))
    }

    pub fn count_set_vertex_buffer(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::SetVertexBuffer { .. }))
    }

    pub fn count_draws(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::Draw { .. } | RenderCall::DrawIndexed { .. }))
    }

    pub fn count_render_passes(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::BeginRenderPass { .. }))
    }

    pub fn count_submits(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::Submit))
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, call: RenderCall) {
        self.calls.lock().push(call);
    }

    fn take_failure(&self, kind: MockFailure) -> bool {
        let mut failures = self.failures.lock();
        match failures.iter().position(|f| *f == kind) {
            Some(index) => {
                failures.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for MockRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for MockRenderDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> GpuBuffer {
        let id = self.ids.allocate();
        self.record(RenderCall::CreateBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
        });
        GpuBuffer::mock(id, desc.size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        self.record(RenderCall::WriteBuffer {
            buffer_id: buffer.id(),
            offset,
            size: data.len(),
        });
    }

    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture {
        let id = self.ids.allocate();
        self.record(RenderCall::CreateTexture {
            id,
            width: desc.size.width,
            height: desc.size.height,
            format: desc.format,
        });
        GpuTexture::mock(id, desc.size.width, desc.size.height, desc.format)
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8], _bytes_per_row: u32) {
        self.record(RenderCall::WriteTexture {
            texture_id: texture.id(),
            size: data.len(),
        });
    }

    fn create_texture_view(&self, texture: &GpuTexture) -> GpuTextureView {
        let id = self.ids.allocate();
        self.record(RenderCall::CreateTextureView {
            id,
            texture_id: texture.id(),
        });
        GpuTextureView::mock(id)
    }

    fn create_sampler(&self, _desc: &wgpu::SamplerDescriptor) -> GpuSampler {
        let id = self.ids.allocate();
        self.record(RenderCall::CreateSampler { id });
        GpuSampler::mock(id)
    }

    fn create_shader_module(
        &self,
        desc: &wgpu::ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, DeviceError> {
        if self.take_failure(MockFailure::ShaderModule) {
            return Err(DeviceError::Validation("forced shader module failure".into()));
        }
        if let wgpu::ShaderSource::Wgsl(source) = &desc.source {
            if source.trim().is_empty() {
                return Err(DeviceError::Validation("empty WGSL source".into()));
            }
        }

        let id = self.ids.allocate();
        self.record(RenderCall::CreateShaderModule {
            id,
            label: desc.label.map(|s| s.to_string()),
        });
        Ok(GpuShaderModule::mock(id))
    }

    fn create_bind_group_layout(&self, desc: &wgpu::BindGroupLayoutDescriptor) -> GpuBindGroupLayout {
        let id = self.ids.allocate();
        self.layout_entries.lock().push((id, desc.entries.len()));
        self.record(RenderCall::CreateBindGroupLayout {
            id,
            label: desc.label.map(|s| s.to_string()),
        });
        GpuBindGroupLayout::mock(id)
    }

    fn create_bind_group(&self, desc: &BindGroupDescriptor) -> Result<GpuBindGroup, DeviceError> {
        if self.take_failure(MockFailure::BindGroup) {
            return Err(DeviceError::Validation("forced bind group failure".into()));
        }

        let layout_id = desc.layout.id();
        let expected = self
            .layout_entries
            .lock()
            .iter()
            .find(|(id, _)| *id == layout_id)
            .map(|(_, count)| *count);
        match expected {
            Some(count) if count == desc.entries.len() => {}
            Some(count) => {
                return Err(DeviceError::Validation(format!(
                    "bind group has {} entries, layout {} expects {}",
                    desc.entries.len(),
                    layout_id,
                    count
                )));
            }
            None => {
                return Err(DeviceError::Validation(format!(
                    "unknown bind group layout {}",
                    layout_id
                )));
            }
        }

        let id = self.ids.allocate();
        self.record(RenderCall::CreateBindGroup {
            id,
            layout_id,
            resources: desc.entries.iter().map(|e| e.resource.id()).collect(),
        });
        Ok(GpuBindGroup::mock(id, layout_id))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, DeviceError> {
        if self.take_failure(MockFailure::RenderPipeline) {
            return Err(DeviceError::Validation("forced render pipeline failure".into()));
        }

        let mut locations: Vec<u32> = desc
            .vertex_buffers
            .iter()
            .flat_map(|layout| layout.attributes.iter().map(|a| a.shader_location))
            .collect();
        let total = locations.len();
        locations.sort_unstable();
        locations.dedup();
        if locations.len() != total {
            return Err(DeviceError::Validation(
                "duplicate vertex shader location".into(),
            ));
        }
        if desc.bind_group_layouts.len() > self.limits.max_bind_groups as usize {
            return Err(DeviceError::Validation("too many bind group layouts".into()));
        }

        let id = self.ids.allocate();
        self.record(RenderCall::CreateRenderPipeline {
            id,
            label: desc.label.map(|s| s.to_string()),
        });
        Ok(GpuRenderPipeline::mock(id))
    }

    fn create_command_recorder(&self, _label: Option<&str>) -> Box<dyn CommandRecorder> {
        Box::new(MockCommandRecorder {
            calls: Arc::clone(&self.calls),
            recorded: 0,
        })
    }

    fn submit(&self, _commands: GpuCommandBuffer) -> SubmitFuture {
        self.record(RenderCall::Submit);
        SubmitFuture::ready()
    }
}

/// Command recorder appending to the owning device's call log.
pub struct MockCommandRecorder {
    calls: CallLog,
    recorded: usize,
}

impl MockCommandRecorder {
    fn record(&mut self, call: RenderCall) {
        self.recorded += 1;
        self.calls.lock().push(call);
    }
}

impl CommandRecorder for MockCommandRecorder {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.record(RenderCall::BeginRenderPass {
            label: desc.label.clone(),
            clears: desc.clears(),
        });
    }

    fn end_render_pass(&mut self) {
        self.record(RenderCall::EndRenderPass);
    }

    fn set_pipeline(&mut self, pipeline: &GpuRenderPipeline) {
        self.record(RenderCall::SetPipeline { id: pipeline.id() });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer) {
        self.record(RenderCall::SetVertexBuffer {
            slot,
            id: buffer.id(),
        });
    }

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: wgpu::IndexFormat) {
        self.record(RenderCall::SetIndexBuffer {
            id: buffer.id(),
            format,
        });
    }

    fn set_bind_group(&mut self, index: u32, group: &GpuBindGroup) {
        self.record(RenderCall::SetBindGroup {
            index,
            id: group.id(),
        });
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.record(RenderCall::SetStencilReference { reference });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RenderCall::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RenderCall::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn insert_debug_marker(&mut self, label: &str) {
        self.record(RenderCall::DebugMarker {
            label: label.to_string(),
        });
    }

    fn copy_texture_to_buffer(
        &mut self,
        texture: &GpuTexture,
        buffer: &GpuBuffer,
        bytes_per_row: u32,
    ) {
        self.record(RenderCall::CopyTextureToBuffer {
            texture_id: texture.id(),
            buffer_id: buffer.id(),
            bytes_per_row,
        });
    }

    fn finish(self: Box<Self>) -> GpuCommandBuffer {
        self.calls.lock().push(RenderCall::FinishCommands);
        GpuCommandBuffer::mock(self.recorded)
    }
}
