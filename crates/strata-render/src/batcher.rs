//! Forward-scan batching of drawable elements.
//!
//! [`Batcher::add`] only records elements. [`Batcher::break_into_batches`]
//! walks them in submission order and cuts a new batch whenever the next
//! element cannot join the current one:
//!
//! - its texture is not in the batch and the batch already holds `max_textures`
//! - its blend mode differs
//! - its topology differs
//! - it cannot be batched at all (custom draw, strip topology)
//!
//! Elements are never reordered. Vertex data is packed into one shared
//! vertex/index buffer pair while scanning; each vertex carries the slot of
//! its texture within its batch.

use std::ops::Range;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use strata_core::profiling::profile_function;
use strata_test_utils::GpuBindGroup;

use crate::binding_cache::BindingSet;
use crate::blend::BlendMode;
use crate::geometry::{Geometry, GeometryLayout};
use crate::pipeline_cache::PipelineHandle;
use crate::resource::TextureSource;
use crate::shader::Shader;
use crate::state::{GlobalStateKey, RenderState, Topology};

/// Pack an RGBA color into the byte order the batch shader reads.
pub fn rgba8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

pub const WHITE: u32 = 0xffff_ffff;

/// One vertex in the shared batch buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// RGBA8, read as `unorm8x4`.
    pub color: u32,
    /// Index into the batch's texture set.
    pub texture_slot: u32,
}

impl BatchVertex {
    pub const STRIDE: u64 = std::mem::size_of::<BatchVertex>() as u64;

    /// Geometry layout of the shared batch buffers.
    pub fn geometry_layout() -> GeometryLayout {
        GeometryLayout::new()
            .with_attribute("position", 0, wgpu::VertexFormat::Float32x2, 0, Self::STRIDE)
            .with_attribute("uv", 0, wgpu::VertexFormat::Float32x2, 8, Self::STRIDE)
            .with_attribute("color", 0, wgpu::VertexFormat::Unorm8x4, 16, Self::STRIDE)
            .with_attribute("texture_slot", 0, wgpu::VertexFormat::Uint32, 20, Self::STRIDE)
            .with_index_format(wgpu::IndexFormat::Uint32)
    }
}

/// Already-tessellated vertex data for one element, with local indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementMesh {
    pub positions: Vec<[f32; 2]>,
    /// Missing UVs are packed as `[0, 0]`.
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl ElementMesh {
    pub fn new(positions: Vec<[f32; 2]>, uvs: Vec<[f32; 2]>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            uvs,
            indices,
        }
    }

    /// Axis-aligned textured quad as two triangles.
    pub fn quad(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            positions: vec![
                [x, y],
                [x + width, y],
                [x + width, y + height],
                [x, y + height],
            ],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// A draw that bypasses the batch shader.
#[derive(Debug, Clone)]
pub struct CustomDraw {
    pub shader: Arc<Shader>,
    pub geometry: Arc<Geometry>,
    /// One binding set per group of the shader.
    pub binding_sets: Vec<Arc<BindingSet>>,
    pub state: RenderState,
    /// Indices (or vertices when not indexed) to draw.
    pub range: Range<u32>,
    pub instances: Range<u32>,
}

impl CustomDraw {
    /// Draw the whole geometry once.
    pub fn new(shader: Arc<Shader>, geometry: Arc<Geometry>, binding_sets: Vec<Arc<BindingSet>>) -> Self {
        let range = 0..geometry.element_count;
        Self {
            shader,
            geometry,
            binding_sets,
            state: RenderState::empty(),
            range,
            instances: 0..1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ElementContent {
    Textured {
        mesh: Arc<ElementMesh>,
        texture: TextureSource,
        color: u32,
    },
    Custom(Arc<CustomDraw>),
}

/// One renderable unit submitted to the batcher.
#[derive(Debug, Clone)]
pub struct DrawableElement {
    pub content: ElementContent,
    pub blend_mode: BlendMode,
    pub topology: Topology,
}

impl DrawableElement {
    pub fn textured(mesh: Arc<ElementMesh>, texture: TextureSource) -> Self {
        Self {
            content: ElementContent::Textured {
                mesh,
                texture,
                color: WHITE,
            },
            blend_mode: BlendMode::default(),
            topology: Topology::TriangleList,
        }
    }

    /// A custom draw takes its topology from its geometry.
    pub fn custom(draw: Arc<CustomDraw>) -> Self {
        let topology = draw.geometry.topology;
        Self {
            content: ElementContent::Custom(draw),
            blend_mode: BlendMode::default(),
            topology,
        }
    }

    pub fn with_color(mut self, rgba: u32) -> Self {
        if let ElementContent::Textured { color, .. } = &mut self.content {
            *color = rgba;
        }
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Whether this element can share a draw with its neighbours.
    pub fn is_batchable(&self) -> bool {
        matches!(self.content, ElementContent::Textured { .. }) && !self.topology.is_strip()
    }

    pub fn texture(&self) -> Option<&TextureSource> {
        match &self.content {
            ElementContent::Textured { texture, .. } => Some(texture),
            ElementContent::Custom(_) => None,
        }
    }

    fn counts(&self) -> (usize, usize) {
        match &self.content {
            ElementContent::Textured { mesh, .. } => (mesh.vertex_count(), mesh.index_count()),
            ElementContent::Custom(_) => (0, 0),
        }
    }
}

/// Packed vertex and index data shared by all batches of one call.
#[derive(Debug, Default)]
pub struct BatchGeometry {
    pub vertices: Vec<BatchVertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum BatchKind {
    /// Drawn with the batch shader from the shared buffers.
    Textured { textures: Vec<TextureSource> },
    /// Drawn with its own shader, geometry and binding sets.
    Custom(Arc<CustomDraw>),
}

/// A run of elements issued as one draw.
#[derive(Debug, Clone)]
pub struct Batch {
    pub kind: BatchKind,
    pub geometry: Arc<BatchGeometry>,
    /// First index in `geometry.indices`.
    pub start: u32,
    /// Number of indices.
    pub size: u32,
    pub blend_mode: BlendMode,
    pub topology: Topology,
    /// Elements covered, as submission indices.
    pub elements: Range<usize>,
    /// False for singletons that could not be batched.
    pub batched: bool,
    /// Filled by [`Renderer::resolve_batches`](crate::renderer::Renderer::resolve_batches).
    pub pipeline: Option<PipelineHandle>,
    pub binding_set: Option<GpuBindGroup>,
    /// Global state `pipeline` was built for.
    pub resolved_for: Option<GlobalStateKey>,
}

impl Batch {
    pub fn textures(&self) -> &[TextureSource] {
        match &self.kind {
            BatchKind::Textured { textures } => textures,
            BatchKind::Custom(_) => &[],
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.pipeline.is_some()
    }

    /// The resolved pipeline, if it was built for `global`.
    pub fn pipeline_for(&self, global: Option<GlobalStateKey>) -> Option<&PipelineHandle> {
        self.pipeline
            .as_ref()
            .filter(|_| global.is_some() && self.resolved_for == global)
    }
}

#[derive(Debug, Clone)]
pub struct BatcherOptions {
    /// Texture slots per batch.
    pub max_textures: usize,
    pub initial_vertex_capacity: usize,
    pub initial_index_capacity: usize,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        Self {
            max_textures: 16,
            initial_vertex_capacity: 4096,
            initial_index_capacity: 6144,
        }
    }
}

/// Counters for the last [`Batcher::break_into_batches`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub elements: usize,
    pub batches: usize,
    pub singletons: usize,
    pub texture_breaks: usize,
    pub blend_breaks: usize,
    pub topology_breaks: usize,
    pub vertices: usize,
    pub indices: usize,
}

struct PendingBatch {
    kind: BatchKind,
    start: usize,
    blend_mode: BlendMode,
    topology: Topology,
    first_element: usize,
    batched: bool,
}

impl PendingBatch {
    fn textures(&self) -> &[TextureSource] {
        match &self.kind {
            BatchKind::Textured { textures } => textures,
            BatchKind::Custom(_) => &[],
        }
    }
}

pub struct Batcher {
    options: BatcherOptions,
    elements: Vec<DrawableElement>,
    vertex_count: usize,
    index_count: usize,
    stats: BatchStats,
}

impl Batcher {
    pub fn new(mut options: BatcherOptions) -> Self {
        options.max_textures = options.max_textures.max(1);
        Self {
            options,
            elements: Vec::new(),
            vertex_count: 0,
            index_count: 0,
            stats: BatchStats::default(),
        }
    }

    pub fn options(&self) -> &BatcherOptions {
        &self.options
    }

    pub fn max_textures(&self) -> usize {
        self.options.max_textures
    }

    /// Record an element. No data is packed until [`Self::break_into_batches`].
    pub fn add(&mut self, element: DrawableElement) {
        let (vertices, indices) = element.counts();
        self.vertex_count += vertices;
        self.index_count += indices;
        self.elements.push(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Vertices recorded so far.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Indices recorded so far.
    pub fn index_count(&self) -> usize {
        self.index_count
    }

    /// Drop recorded elements without batching them.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.vertex_count = 0;
        self.index_count = 0;
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Partition the recorded elements into batches and pack their data.
    ///
    /// Consumes the recorded elements, leaving the batcher ready for the
    /// next frame. Every returned batch shares one [`BatchGeometry`].
    pub fn break_into_batches(&mut self) -> Vec<Batch> {
        profile_function!();
        let max_textures = self.options.max_textures;
        let mut stats = BatchStats {
            elements: self.elements.len(),
            ..BatchStats::default()
        };
        let mut geometry = BatchGeometry {
            vertices: Vec::with_capacity(self.vertex_count.max(self.options.initial_vertex_capacity)),
            indices: Vec::with_capacity(self.index_count.max(self.options.initial_index_capacity)),
        };
        let mut pending: Vec<(PendingBatch, usize, usize)> = Vec::new();
        let mut working: Option<PendingBatch> = None;

        let mut finish = |batch: PendingBatch, end_element: usize, end_index: usize| {
            pending.push((batch, end_element, end_index));
        };

        for (i, element) in self.elements.iter().enumerate() {
            let (mesh, texture, color) = match &element.content {
                ElementContent::Custom(draw) => {
                    if let Some(batch) = working.take() {
                        finish(batch, i, geometry.indices.len());
                    }
                    stats.singletons += 1;
                    finish(
                        PendingBatch {
                            kind: BatchKind::Custom(Arc::clone(draw)),
                            start: draw.range.start as usize,
                            blend_mode: element.blend_mode,
                            topology: element.topology,
                            first_element: i,
                            batched: false,
                        },
                        i + 1,
                        draw.range.end as usize,
                    );
                    continue;
                }
                ElementContent::Textured {
                    mesh,
                    texture,
                    color,
                } => (mesh, texture, *color),
            };

            if !element.is_batchable() {
                if let Some(batch) = working.take() {
                    finish(batch, i, geometry.indices.len());
                }
                stats.singletons += 1;
                let start = geometry.indices.len();
                pack(&mut geometry, mesh, color, 0);
                finish(
                    PendingBatch {
                        kind: BatchKind::Textured {
                            textures: vec![texture.clone()],
                        },
                        start,
                        blend_mode: element.blend_mode,
                        topology: element.topology,
                        first_element: i,
                        batched: false,
                    },
                    i + 1,
                    geometry.indices.len(),
                );
                continue;
            }

            let cut = match &working {
                Some(batch) => {
                    let overflow = batch.textures().len() >= max_textures
                        && !batch.textures().iter().any(|t| t.ptr_eq(texture));
                    if batch.blend_mode != element.blend_mode {
                        stats.blend_breaks += 1;
                        true
                    } else if batch.topology != element.topology {
                        stats.topology_breaks += 1;
                        true
                    } else if overflow {
                        stats.texture_breaks += 1;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if cut {
                if let Some(batch) = working.take() {
                    finish(batch, i, geometry.indices.len());
                }
            }

            let batch = working.get_or_insert_with(|| PendingBatch {
                kind: BatchKind::Textured {
                    textures: Vec::with_capacity(max_textures),
                },
                start: geometry.indices.len(),
                blend_mode: element.blend_mode,
                topology: element.topology,
                first_element: i,
                batched: true,
            });
            let slot = match &mut batch.kind {
                BatchKind::Textured { textures } => {
                    match textures.iter().position(|t| t.ptr_eq(texture)) {
                        Some(slot) => slot,
                        None => {
                            textures.push(texture.clone());
                            textures.len() - 1
                        }
                    }
                }
                BatchKind::Custom(_) => 0,
            };
            pack(&mut geometry, mesh, color, slot as u32);
        }

        if let Some(batch) = working.take() {
            finish(batch, self.elements.len(), geometry.indices.len());
        }

        stats.vertices = geometry.vertices.len();
        stats.indices = geometry.indices.len();
        let geometry = Arc::new(geometry);
        let batches: Vec<Batch> = pending
            .into_iter()
            .map(|(batch, end_element, end_index)| Batch {
                kind: batch.kind,
                geometry: Arc::clone(&geometry),
                start: batch.start as u32,
                size: (end_index - batch.start) as u32,
                blend_mode: batch.blend_mode,
                topology: batch.topology,
                elements: batch.first_element..end_element,
                batched: batch.batched,
                pipeline: None,
                binding_set: None,
                resolved_for: None,
            })
            .collect();
        stats.batches = batches.len();

        tracing::trace!(
            "Batched {} elements into {} batches ({} singletons)",
            stats.elements,
            stats.batches,
            stats.singletons
        );
        self.stats = stats;
        self.clear();
        batches
    }
}

/// Append one mesh, offsetting its indices by the running vertex count.
fn pack(geometry: &mut BatchGeometry, mesh: &ElementMesh, color: u32, texture_slot: u32) {
    let base = geometry.vertices.len() as u32;
    geometry
        .vertices
        .extend(mesh.positions.iter().enumerate().map(|(i, &position)| BatchVertex {
            position,
            uv: mesh.uvs.get(i).copied().unwrap_or_default(),
            color,
            texture_slot,
        }));
    geometry
        .indices
        .extend(mesh.indices.iter().map(|&index| base + index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test_utils::{GpuResourceId, GpuSampler, GpuTextureView};

    fn texture(id: u64) -> TextureSource {
        TextureSource::from_parts(
            GpuTextureView::mock(GpuResourceId::new(id)),
            GpuSampler::mock(GpuResourceId::new(id + 500)),
        )
    }

    fn quad() -> Arc<ElementMesh> {
        Arc::new(ElementMesh::quad(0.0, 0.0, 1.0, 1.0))
    }

    fn batcher(max_textures: usize) -> Batcher {
        Batcher::new(BatcherOptions {
            max_textures,
            ..BatcherOptions::default()
        })
    }

    #[test]
    fn test_empty_input_produces_no_batches() {
        let mut batcher = batcher(4);
        assert!(batcher.break_into_batches().is_empty());
        assert_eq!(batcher.stats().batches, 0);
    }

    #[test]
    fn test_add_records_counts_without_packing() {
        let mut batcher = batcher(4);
        batcher.add(DrawableElement::textured(quad(), texture(1)));
        batcher.add(DrawableElement::textured(quad(), texture(1)));
        assert_eq!(batcher.len(), 2);
        assert_eq!(batcher.vertex_count(), 8);
        assert_eq!(batcher.index_count(), 12);
    }

    #[test]
    fn test_indices_are_offset_by_running_vertex_count() {
        let mut batcher = batcher(4);
        batcher.add(DrawableElement::textured(quad(), texture(1)));
        batcher.add(DrawableElement::textured(quad(), texture(2)));
        let batches = batcher.break_into_batches();

        assert_eq!(batches.len(), 1);
        let geometry = &batches[0].geometry;
        assert_eq!(&geometry.indices[6..], &[4, 5, 6, 4, 6, 7]);
        assert_eq!(geometry.vertices[0].texture_slot, 0);
        assert_eq!(geometry.vertices[4].texture_slot, 1);
    }

    #[test]
    fn test_repeated_texture_uses_one_slot() {
        let mut batcher = batcher(2);
        let t = texture(1);
        for _ in 0..10 {
            batcher.add(DrawableElement::textured(quad(), t.clone()));
        }
        let batches = batcher.break_into_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].textures().len(), 1);
        assert!(batches[0].geometry.vertices.iter().all(|v| v.texture_slot == 0));
    }

    #[test]
    fn test_texture_overflow_breaks() {
        let mut batcher = batcher(2);
        for id in 1..=3 {
            batcher.add(DrawableElement::textured(quad(), texture(id)));
        }
        let batches = batcher.break_into_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].textures().len(), 2);
        assert_eq!(batches[1].textures().len(), 1);
        assert_eq!(batches[1].start, 12);
        assert_eq!(batcher.stats().texture_breaks, 1);
        // The new batch starts its slots from zero.
        assert_eq!(batches[1].geometry.vertices[8].texture_slot, 0);
    }

    #[test]
    fn test_topology_change_breaks() {
        let mut batcher = batcher(4);
        let t = texture(1);
        batcher.add(DrawableElement::textured(quad(), t.clone()));
        batcher.add(DrawableElement::textured(quad(), t).with_topology(Topology::LineList));
        let batches = batcher.break_into_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].topology, Topology::LineList);
        assert_eq!(batcher.stats().topology_breaks, 1);
    }

    #[test]
    fn test_strip_is_a_singleton() {
        let mut batcher = batcher(4);
        let t = texture(1);
        batcher.add(DrawableElement::textured(quad(), t.clone()));
        batcher.add(DrawableElement::textured(quad(), t.clone()).with_topology(Topology::TriangleStrip));
        batcher.add(DrawableElement::textured(quad(), t.clone()).with_topology(Topology::TriangleStrip));
        batcher.add(DrawableElement::textured(quad(), t));
        let batches = batcher.break_into_batches();

        assert_eq!(batches.len(), 4);
        assert!(batches[0].batched);
        assert!(!batches[1].batched);
        assert!(!batches[2].batched);
        assert!(batches[3].batched);
        assert_eq!(batches[1].elements, 1..2);
        assert_eq!(batcher.stats().singletons, 2);
    }

    #[test]
    fn test_colors_are_packed_per_vertex() {
        let mut batcher = batcher(4);
        let red = rgba8(255, 0, 0, 255);
        batcher.add(DrawableElement::textured(quad(), texture(1)).with_color(red));
        let batches = batcher.break_into_batches();
        assert!(batches[0].geometry.vertices.iter().all(|v| v.color == red));
        assert_eq!(red.to_le_bytes(), [255, 0, 0, 255]);
    }

    #[test]
    fn test_break_consumes_elements() {
        let mut batcher = batcher(4);
        batcher.add(DrawableElement::textured(quad(), texture(1)));
        batcher.break_into_batches();
        assert!(batcher.is_empty());
        assert_eq!(batcher.vertex_count(), 0);
        assert_eq!(batcher.stats().elements, 1);
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        assert_eq!(BatchVertex::STRIDE, 24);
        let layout = BatchVertex::geometry_layout();
        assert_eq!(layout.attribute("texture_slot").map(|a| a.offset), Some(20));
        assert_eq!(layout.index_format(), Some(wgpu::IndexFormat::Uint32));
    }
}
