//! Dispatching batches to the encoder.
//!
//! The renderer walks its batches and hands each one to a [`BatchExecutor`]
//! along with an [`ExecutionContext`]. [`GpuBatchExecutor`] is the default:
//! textured batches go through the generated batch shader, custom draws
//! through the encoder's convenience path.

use std::fmt::Write as _;
use std::sync::Arc;

use strata_core::profiling::profile_function;
use strata_test_utils::{GpuBindGroup, GpuBuffer};

use crate::batcher::{Batch, BatchKind, BatchVertex};
use crate::binding_cache::ResourceBindingCache;
use crate::encoder::{DrawRequest, StateTrackingEncoder};
use crate::error::RenderResult;
use crate::geometry::GeometryLayout;
use crate::pipeline_cache::{PipelineCache, PipelineRequest};
use crate::shader::{BindingLayout, Shader};
use crate::state::RenderState;

/// Generate the WGSL batch shader for `max_textures` texture slots.
///
/// Group 0 holds the globals uniform, group 1 the texture batch with
/// `texture_i` at binding `2i` and `sampler_i` at `2i + 1`. The slot is
/// chosen per fragment from the flat-interpolated vertex attribute.
pub fn batch_shader_source(max_textures: usize) -> String {
    let mut src = String::with_capacity(1024 + max_textures * 192);
    src.push_str(
        "struct Globals {
    projection: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> globals: Globals;
",
    );
    for i in 0..max_textures {
        let _ = writeln!(
            src,
            "@group(1) @binding({}) var texture_{i}: texture_2d<f32>;\n@group(1) @binding({}) var sampler_{i}: sampler;",
            2 * i,
            2 * i + 1
        );
    }
    src.push_str(
        "
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
    @location(3) texture_slot: u32,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) @interpolate(flat) texture_slot: u32,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = globals.projection * vec4<f32>(in.position, 0.0, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    out.texture_slot = in.texture_slot;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    // Derivatives must be taken in uniform control flow.
    let ddx = dpdx(in.uv);
    let ddy = dpdy(in.uv);
    var texel = vec4<f32>(1.0);
    switch in.texture_slot {
",
    );
    for i in 0..max_textures {
        let _ = writeln!(
            src,
            "        case {i}u: {{ texel = textureSampleGrad(texture_{i}, sampler_{i}, in.uv, ddx, ddy); }}"
        );
    }
    src.push_str(
        "        default: {}
    }
    return texel * in.color;
}
",
    );
    src
}

/// Build the batch [`Shader`] over the given globals and texture-batch
/// layouts. Attribute names match [`BatchVertex::geometry_layout`].
pub fn batch_shader(
    max_textures: usize,
    globals: Arc<BindingLayout>,
    textures: Arc<BindingLayout>,
) -> Shader {
    Shader::new(format!("batch_shader_{max_textures}"), batch_shader_source(max_textures))
        .with_attribute("position", 0)
        .with_attribute("uv", 1)
        .with_attribute("color", 2)
        .with_attribute("texture_slot", 3)
        .with_group(globals)
        .with_group(textures)
}

/// Renderer-owned state shared by every textured batch.
#[derive(Debug)]
pub struct BatchResources {
    pub shader: Arc<Shader>,
    pub layout: GeometryLayout,
    pub max_textures: usize,
}

impl BatchResources {
    pub fn new(shader: Arc<Shader>, max_textures: usize) -> Self {
        Self {
            shader,
            layout: BatchVertex::geometry_layout(),
            max_textures,
        }
    }
}

/// Where a batch's shared geometry landed in the frame buffers.
#[derive(Debug, Clone)]
pub struct GeometryPlacement {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub base_vertex: i32,
    pub first_index: u32,
}

pub struct ExecutionContext<'a> {
    pub encoder: &'a mut StateTrackingEncoder,
    pub pipelines: &'a mut PipelineCache,
    pub bindings: &'a mut ResourceBindingCache,
    pub resources: &'a BatchResources,
    /// Resolved globals binding set, bound at group 0.
    pub globals: &'a GpuBindGroup,
    /// Placement of the geometry of the batch being executed.
    pub placement: GeometryPlacement,
}

/// Issues the commands for one batch.
pub trait BatchExecutor: Send {
    fn execute(&mut self, ctx: &mut ExecutionContext<'_>, batch: &Batch) -> RenderResult<()>;
}

/// Default executor over the [`BatchKind`] variants.
#[derive(Debug, Default)]
pub struct GpuBatchExecutor;

impl GpuBatchExecutor {
    fn execute_textured(ctx: &mut ExecutionContext<'_>, batch: &Batch) -> RenderResult<()> {
        if batch.size == 0 {
            return Ok(());
        }
        let device = Arc::clone(ctx.encoder.device());
        // A pipeline resolved before a stencil or color mask change is
        // for the wrong tier and gets looked up again.
        let pipeline = match batch.pipeline_for(ctx.pipelines.global_key()) {
            Some(pipeline) => Arc::clone(pipeline),
            None => ctx.pipelines.resolve(
                device.as_ref(),
                &PipelineRequest {
                    geometry: &ctx.resources.layout,
                    shader: &ctx.resources.shader,
                    state: RenderState::empty(),
                    blend: batch.blend_mode,
                    topology: batch.topology,
                },
            )?,
        };
        let textures = match &batch.binding_set {
            Some(group) => group.clone(),
            None => ctx.bindings.get_texture_batch(
                device.as_ref(),
                batch.textures(),
                ctx.resources.max_textures,
            )?,
        };

        let placement = &ctx.placement;
        let first = placement.first_index + batch.start;
        ctx.encoder.set_pipeline(&pipeline)?;
        ctx.encoder.set_vertex_buffer(0, &placement.vertex_buffer)?;
        ctx.encoder
            .set_index_buffer(&placement.index_buffer, wgpu::IndexFormat::Uint32)?;
        ctx.encoder.set_binding_set(0, ctx.globals)?;
        ctx.encoder.set_binding_set(1, &textures)?;
        ctx.encoder
            .draw_indexed(first..first + batch.size, placement.base_vertex, 0..1)
    }
}

impl BatchExecutor for GpuBatchExecutor {
    fn execute(&mut self, ctx: &mut ExecutionContext<'_>, batch: &Batch) -> RenderResult<()> {
        profile_function!();
        match &batch.kind {
            BatchKind::Textured { .. } => Self::execute_textured(ctx, batch),
            BatchKind::Custom(draw) => ctx.encoder.draw(
                ctx.pipelines,
                ctx.bindings,
                &DrawRequest::from_custom(draw, batch.blend_mode),
            ),
        }
    }
}
