//! Command encoding with redundant-state elimination.
//!
//! [`StateTrackingEncoder`] sits between the renderer and a
//! [`CommandRecorder`]. It remembers what is bound (pipeline, vertex
//! buffers, index buffer, binding sets, stencil reference) and drops any
//! set call whose target is already bound.
//!
//! # State machine
//!
//! ```text
//! Idle ──start_frame──► Recording ──begin_render_pass──► InPass
//!  ▲                        ▲  │                            │
//!  └──────── submit ────────┘  └◄──── end_render_pass ──────┘
//! ```
//!
//! Tracked state is cleared whenever a pass begins, since a pass inherits
//! nothing from the one before it.

use std::ops::Range;
use std::sync::Arc;

use strata_core::profiling::profile_function;
use strata_test_utils::{
    CommandRecorder, GpuBindGroup, GpuBuffer, RenderDevice, RenderPassDescriptor, SubmitFuture,
};

use crate::batcher::CustomDraw;
use crate::binding_cache::{BindingSet, ResourceBindingCache};
use crate::blend::BlendMode;
use crate::error::{ProtocolError, RenderResult, protocol};
use crate::geometry::Geometry;
use crate::pipeline_cache::{PipelineCache, PipelineHandle, PipelineRequest};
use crate::shader::Shader;
use crate::state::RenderState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderPhase {
    Idle,
    Recording,
    InPass,
}

/// What the encoder believes is bound in the current pass.
#[derive(Debug, Clone, Default)]
struct BoundState {
    pipeline: Option<PipelineHandle>,
    vertex_buffers: Vec<Option<GpuBuffer>>,
    index_buffer: Option<(GpuBuffer, wgpu::IndexFormat)>,
    binding_sets: Vec<Option<GpuBindGroup>>,
    stencil_reference: Option<u32>,
}

fn slot<T>(slots: &mut Vec<Option<T>>, index: usize) -> &mut Option<T> {
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    &mut slots[index]
}

/// Per-frame counters, reset by [`StateTrackingEncoder::start_frame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub passes: u32,
    pub draw_calls: u32,
    /// State-set calls forwarded to the recorder.
    pub issued: u32,
    /// State-set calls dropped as redundant.
    pub skipped: u32,
}

/// Everything needed to draw a geometry with a shader.
#[derive(Debug, Clone)]
pub struct DrawRequest<'a> {
    pub shader: &'a Shader,
    pub geometry: &'a Geometry,
    /// One binding set per shader group, in group order.
    pub binding_sets: &'a [Arc<BindingSet>],
    pub state: RenderState,
    pub blend: BlendMode,
    /// Indices, or vertices for non-indexed geometry.
    pub range: Range<u32>,
    pub base_vertex: i32,
    pub instances: Range<u32>,
}

impl<'a> DrawRequest<'a> {
    pub fn from_custom(draw: &'a CustomDraw, blend: BlendMode) -> Self {
        Self {
            shader: &draw.shader,
            geometry: &draw.geometry,
            binding_sets: &draw.binding_sets,
            state: draw.state,
            blend,
            range: draw.range.clone(),
            base_vertex: 0,
            instances: draw.instances.clone(),
        }
    }
}

pub struct StateTrackingEncoder {
    device: Arc<dyn RenderDevice>,
    recorder: Option<Box<dyn CommandRecorder>>,
    phase: EncoderPhase,
    pass: Option<RenderPassDescriptor>,
    bound: BoundState,
    stats: EncoderStats,
}

impl StateTrackingEncoder {
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            recorder: None,
            phase: EncoderPhase::Idle,
            pass: None,
            bound: BoundState::default(),
            stats: EncoderStats::default(),
        }
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn phase(&self) -> EncoderPhase {
        self.phase
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    /// Descriptor of the open pass, if any.
    pub fn current_pass(&self) -> Option<&RenderPassDescriptor> {
        self.pass.as_ref()
    }

    fn invalid(&self, operation: &'static str) -> crate::error::RenderError {
        protocol(ProtocolError::InvalidTransition {
            from: self.phase,
            operation,
        })
    }

    fn require_pass(&self, operation: &'static str) -> RenderResult<()> {
        if self.phase == EncoderPhase::InPass {
            Ok(())
        } else {
            Err(protocol(ProtocolError::BindOutsidePass {
                phase: self.phase,
                operation,
            }))
        }
    }

    /// Start recording a frame. Valid only from `Idle`.
    pub fn start_frame(&mut self, label: Option<&str>) -> RenderResult<()> {
        if self.phase != EncoderPhase::Idle {
            return Err(self.invalid("start_frame"));
        }
        self.recorder = Some(self.device.create_command_recorder(label));
        self.phase = EncoderPhase::Recording;
        self.stats = EncoderStats::default();
        Ok(())
    }

    /// Begin a render pass, ending the open one first.
    pub fn begin_render_pass(&mut self, desc: RenderPassDescriptor) -> RenderResult<()> {
        match self.phase {
            EncoderPhase::Idle => return Err(self.invalid("begin_render_pass")),
            EncoderPhase::InPass => self.end_render_pass()?,
            EncoderPhase::Recording => {}
        }

        self.bound = BoundState::default();
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.begin_render_pass(&desc);
        }
        self.pass = Some(desc);
        self.phase = EncoderPhase::InPass;
        self.stats.passes += 1;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> RenderResult<()> {
        if self.phase != EncoderPhase::InPass {
            return Err(self.invalid("end_render_pass"));
        }
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.end_render_pass();
        }
        self.phase = EncoderPhase::Recording;
        Ok(())
    }

    /// Bind a pipeline. Returns whether a device call was issued.
    pub fn set_pipeline(&mut self, pipeline: &PipelineHandle) -> RenderResult<bool> {
        self.require_pass("set_pipeline")?;
        if self
            .bound
            .pipeline
            .as_ref()
            .is_some_and(|bound| bound.id() == pipeline.id())
        {
            return Ok(self.skip("set_pipeline"));
        }
        self.bound.pipeline = Some(Arc::clone(pipeline));
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.set_pipeline(pipeline.pipeline());
        }
        Ok(self.issue())
    }

    pub fn set_vertex_buffer(&mut self, index: u32, buffer: &GpuBuffer) -> RenderResult<bool> {
        self.require_pass("set_vertex_buffer")?;
        let bound = slot(&mut self.bound.vertex_buffers, index as usize);
        if bound.as_ref().is_some_and(|b| b.id() == buffer.id()) {
            return Ok(self.skip("set_vertex_buffer"));
        }
        *bound = Some(buffer.clone());
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.set_vertex_buffer(index, buffer);
        }
        Ok(self.issue())
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: &GpuBuffer,
        format: wgpu::IndexFormat,
    ) -> RenderResult<bool> {
        self.require_pass("set_index_buffer")?;
        if self
            .bound
            .index_buffer
            .as_ref()
            .is_some_and(|(b, f)| b.id() == buffer.id() && *f == format)
        {
            return Ok(self.skip("set_index_buffer"));
        }
        self.bound.index_buffer = Some((buffer.clone(), format));
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.set_index_buffer(buffer, format);
        }
        Ok(self.issue())
    }

    /// Bind a binding set at `index`.
    ///
    /// With a pipeline bound, the set's layout must be the one the pipeline
    /// declares for that group.
    pub fn set_binding_set(&mut self, index: u32, group: &GpuBindGroup) -> RenderResult<bool> {
        self.require_pass("set_binding_set")?;
        if let Some(pipeline) = &self.bound.pipeline {
            let expected = pipeline.bind_group_layouts().get(index as usize).copied();
            if expected != Some(group.layout_id()) {
                return Err(protocol(ProtocolError::BindingLayoutMismatch {
                    group: index,
                    expected,
                    found: group.layout_id(),
                }));
            }
        }
        Ok(self.bind_group(index, group))
    }

    fn bind_group(&mut self, index: u32, group: &GpuBindGroup) -> bool {
        let bound = slot(&mut self.bound.binding_sets, index as usize);
        if bound.as_ref().is_some_and(|g| g.id() == group.id()) {
            return self.skip("set_binding_set");
        }
        *bound = Some(group.clone());
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.set_bind_group(index, group);
        }
        self.issue()
    }

    pub fn set_stencil_reference(&mut self, reference: u32) -> RenderResult<bool> {
        self.require_pass("set_stencil_reference")?;
        if self.bound.stencil_reference == Some(reference) {
            return Ok(self.skip("set_stencil_reference"));
        }
        self.bound.stencil_reference = Some(reference);
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.set_stencil_reference(reference);
        }
        Ok(self.issue())
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.insert_debug_marker(label);
        }
    }

    fn issue(&mut self) -> bool {
        self.stats.issued += 1;
        true
    }

    fn skip(&mut self, operation: &'static str) -> bool {
        tracing::trace!("Skipping redundant {operation}");
        self.stats.skipped += 1;
        false
    }

    fn validate_draw(&self) -> RenderResult<()> {
        if self.phase != EncoderPhase::InPass {
            return Err(protocol(ProtocolError::DrawOutsidePass { phase: self.phase }));
        }
        let Some(pipeline) = &self.bound.pipeline else {
            return Err(protocol(ProtocolError::MissingPipeline));
        };
        for (group, &expected) in pipeline.bind_group_layouts().iter().enumerate() {
            let group = group as u32;
            match self.bound.binding_sets.get(group as usize).and_then(Option::as_ref) {
                None => return Err(protocol(ProtocolError::MissingBindingSet { group })),
                Some(set) if set.layout_id() != expected => {
                    return Err(protocol(ProtocolError::BindingLayoutMismatch {
                        group,
                        expected: Some(expected),
                        found: set.layout_id(),
                    }));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn draw_vertices(&mut self, vertices: Range<u32>, instances: Range<u32>) -> RenderResult<()> {
        self.validate_draw()?;
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.draw(vertices, instances);
        }
        self.stats.draw_calls += 1;
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> RenderResult<()> {
        self.validate_draw()?;
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.draw_indexed(indices, base_vertex, instances);
        }
        self.stats.draw_calls += 1;
        Ok(())
    }

    /// Resolve, bind and draw in one go.
    ///
    /// Only the geometry buffers the shader reads are bound, each once.
    pub fn draw(
        &mut self,
        pipelines: &mut PipelineCache,
        bindings: &mut ResourceBindingCache,
        request: &DrawRequest<'_>,
    ) -> RenderResult<()> {
        profile_function!();
        if self.phase != EncoderPhase::InPass {
            return Err(protocol(ProtocolError::DrawOutsidePass { phase: self.phase }));
        }

        let geometry = request.geometry;
        let pipeline = pipelines.resolve(
            self.device.as_ref(),
            &PipelineRequest {
                geometry: &geometry.layout,
                shader: request.shader,
                state: request.state,
                blend: request.blend,
                topology: geometry.topology,
            },
        )?;
        let groups = request
            .binding_sets
            .iter()
            .map(|set| bindings.resolve(self.device.as_ref(), set))
            .collect::<RenderResult<Vec<_>>>()?;

        self.set_pipeline(&pipeline)?;
        for (vertex_slot, &buffer_index) in pipeline.vertex_buffers().iter().enumerate() {
            let buffer = geometry.buffers.get(buffer_index).ok_or_else(|| {
                protocol(ProtocolError::MissingVertexBuffer {
                    index: buffer_index,
                })
            })?;
            self.set_vertex_buffer(vertex_slot as u32, buffer)?;
        }
        for (index, group) in groups.iter().enumerate() {
            self.set_binding_set(index as u32, group)?;
        }

        match &geometry.index_buffer {
            Some(index_buffer) => {
                let format = geometry
                    .layout
                    .index_format()
                    .unwrap_or(wgpu::IndexFormat::Uint32);
                self.set_index_buffer(index_buffer, format)?;
                self.draw_indexed(
                    request.range.clone(),
                    request.base_vertex,
                    request.instances.clone(),
                )
            }
            None => self.draw_vertices(request.range.clone(), request.instances.clone()),
        }
    }

    /// End the open pass and resume it with load operations, replaying
    /// every binding through the tracked setters.
    pub fn restore_render_pass(&mut self) -> RenderResult<()> {
        self.interrupt_render_pass(|_| {})
    }

    /// End the open pass, run `f` against the recorder outside any pass,
    /// then resume the pass as [`Self::restore_render_pass`] does.
    pub fn interrupt_render_pass<F>(&mut self, f: F) -> RenderResult<()>
    where
        F: FnOnce(&mut dyn CommandRecorder),
    {
        if self.phase != EncoderPhase::InPass {
            return Err(self.invalid("restore_render_pass"));
        }
        let Some(pass) = self.pass.as_ref().map(RenderPassDescriptor::resumed) else {
            return Err(self.invalid("restore_render_pass"));
        };
        let snapshot = std::mem::take(&mut self.bound);

        self.end_render_pass()?;
        if let Some(recorder) = self.recorder.as_deref_mut() {
            f(recorder);
        }
        self.begin_render_pass(pass)?;
        self.replay(snapshot)
    }

    fn replay(&mut self, snapshot: BoundState) -> RenderResult<()> {
        if let Some(pipeline) = &snapshot.pipeline {
            self.set_pipeline(pipeline)?;
        }
        for (index, buffer) in snapshot.vertex_buffers.iter().enumerate() {
            if let Some(buffer) = buffer {
                self.set_vertex_buffer(index as u32, buffer)?;
            }
        }
        if let Some((buffer, format)) = &snapshot.index_buffer {
            self.set_index_buffer(buffer, *format)?;
        }
        // Sets left over from an earlier pipeline are restored as they were.
        for (index, group) in snapshot.binding_sets.iter().enumerate() {
            if let Some(group) = group {
                self.bind_group(index as u32, group);
            }
        }
        if let Some(reference) = snapshot.stencil_reference {
            self.set_stencil_reference(reference)?;
        }
        Ok(())
    }

    /// Finish recording and submit. An open pass is ended first.
    pub fn submit(&mut self) -> RenderResult<SubmitFuture> {
        match self.phase {
            EncoderPhase::Idle => return Err(self.invalid("submit")),
            EncoderPhase::InPass => self.end_render_pass()?,
            EncoderPhase::Recording => {}
        }
        let Some(recorder) = self.recorder.take() else {
            return Err(self.invalid("submit"));
        };

        let future = self.device.submit(recorder.finish());
        self.phase = EncoderPhase::Idle;
        self.pass = None;
        self.bound = BoundState::default();
        tracing::trace!(
            "Submitted frame: {} passes, {} draws, {} state calls ({} skipped)",
            self.stats.passes,
            self.stats.draw_calls,
            self.stats.issued,
            self.stats.skipped
        );
        Ok(future)
    }
}
