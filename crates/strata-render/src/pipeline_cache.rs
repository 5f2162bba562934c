//! Two-tier render pipeline cache.
//!
//! # Structure
//!
//! ```text
//! GlobalStateKey ──► tier ──► GraphicsStateKey ──► pipeline
//!       (per render target)          (per draw)
//! ```
//!
//! Tiers live in a `Vec`. A cursor holds the index of the tier for the
//! current global state, so the per-draw lookup is one integer-keyed map
//! access. The outer map is consulted only by [`PipelineCache::set_global_state`]
//! and when a caller passes a global key other than the current one.
//!
//! On a miss, shader modules and vertex layouts come from their own
//! sub-caches, so a new blend mode for a known shader reuses the compiled
//! module. Creation failures are returned and never cached.

use std::hash::Hash;
use std::sync::Arc;

use strata_core::alloc::HashMap;
use strata_core::profiling::profile_function;
use strata_test_utils::{
    GpuBindGroupLayout, GpuRenderPipeline, GpuResourceId, GpuShaderModule, RenderDevice,
    RenderPipelineDescriptor, VertexBufferLayout,
};

use crate::blend::BlendMode;
use crate::error::{DeviceResourceKind, ProtocolError, RenderError, RenderResult, protocol};
use crate::geometry::GeometryLayout;
use crate::resource::ResourceUid;
use crate::shader::Shader;
use crate::state::{GlobalRenderState, GlobalStateKey, GraphicsStateKey, RenderState, Topology};

/// A created pipeline and what the encoder needs to know about it.
#[derive(Debug)]
pub struct CachedPipeline {
    pipeline: GpuRenderPipeline,
    bind_group_layouts: Vec<GpuResourceId>,
    vertex_buffers: Arc<[usize]>,
}

impl CachedPipeline {
    /// `bind_group_layouts` lists the expected layout per group index;
    /// `vertex_buffers` maps each pipeline vertex slot to a geometry buffer index.
    pub fn new(
        pipeline: GpuRenderPipeline,
        bind_group_layouts: Vec<GpuResourceId>,
        vertex_buffers: impl Into<Arc<[usize]>>,
    ) -> Self {
        Self {
            pipeline,
            bind_group_layouts,
            vertex_buffers: vertex_buffers.into(),
        }
    }

    pub fn id(&self) -> GpuResourceId {
        self.pipeline.id()
    }

    pub fn pipeline(&self) -> &GpuRenderPipeline {
        &self.pipeline
    }

    pub fn bind_group_layouts(&self) -> &[GpuResourceId] {
        &self.bind_group_layouts
    }

    pub fn vertex_buffers(&self) -> &[usize] {
        &self.vertex_buffers
    }
}

pub type PipelineHandle = Arc<CachedPipeline>;

/// Everything per-draw that selects a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRequest<'a> {
    pub geometry: &'a GeometryLayout,
    pub shader: &'a Shader,
    pub state: RenderState,
    pub blend: BlendMode,
    pub topology: Topology,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub pipelines_created: u64,
    pub shader_modules_compiled: u64,
    pub vertex_layouts_derived: u64,
    pub tiers: usize,
}

/// Hands out compact ids for keys too large to pack.
///
/// Ids start at 1; 0 is left for "none".
struct LayoutRegistry<K> {
    name: &'static str,
    max: u16,
    ids: HashMap<K, u16>,
}

impl<K: Hash + Eq + Clone> LayoutRegistry<K> {
    fn new(name: &'static str, max: u16) -> Self {
        Self {
            name,
            max,
            ids: HashMap::default(),
        }
    }

    fn id(&mut self, key: &K) -> RenderResult<u16> {
        if let Some(&id) = self.ids.get(key) {
            return Ok(id);
        }
        let next = self.ids.len() + 1;
        if next > self.max as usize {
            return Err(protocol(ProtocolError::LayoutRegistryFull {
                registry: self.name,
            }));
        }
        let id = next as u16;
        self.ids.insert(key.clone(), id);
        Ok(id)
    }
}

struct PipelineTier {
    key: GlobalStateKey,
    state: GlobalRenderState,
    pipelines: HashMap<GraphicsStateKey, PipelineHandle>,
}

/// The outer map, tier storage and cursor.
struct Tiers {
    index: HashMap<GlobalStateKey, usize>,
    tiers: Vec<PipelineTier>,
    cursor: Option<usize>,
    color_formats: LayoutRegistry<wgpu::TextureFormat>,
    depth_formats: LayoutRegistry<wgpu::TextureFormat>,
    hits: u64,
    misses: u64,
}

impl Tiers {
    fn new() -> Self {
        Self {
            index: HashMap::default(),
            tiers: Vec::new(),
            cursor: None,
            color_formats: LayoutRegistry::new("color format", 0xff),
            depth_formats: LayoutRegistry::new("depth format", 0x1f),
            hits: 0,
            misses: 0,
        }
    }

    fn set_global_state(&mut self, state: GlobalRenderState) -> RenderResult<GlobalStateKey> {
        let format_id = self.color_formats.id(&state.color_format)? as u8;
        let depth_id = match state.depth_stencil_format {
            Some(format) => self.depth_formats.id(&format)? as u8,
            None => 0,
        };
        let key = GlobalStateKey::pack(format_id, depth_id, &state);

        let tiers = &mut self.tiers;
        let index = *self.index.entry(key).or_insert_with(|| {
            tracing::debug!("New pipeline tier for global state {key}");
            tiers.push(PipelineTier {
                key,
                state,
                pipelines: HashMap::default(),
            });
            tiers.len() - 1
        });
        self.cursor = Some(index);
        Ok(key)
    }

    fn current(&self) -> Option<&PipelineTier> {
        self.cursor.map(|i| &self.tiers[i])
    }

    fn get_pipeline<F>(
        &mut self,
        graphics_key: GraphicsStateKey,
        global_key: GlobalStateKey,
        create: F,
    ) -> RenderResult<PipelineHandle>
    where
        F: FnOnce(&GlobalRenderState) -> RenderResult<CachedPipeline>,
    {
        let tier = match self.cursor {
            Some(i) if self.tiers[i].key == global_key => i,
            _ => {
                let i = *self.index.get(&global_key).ok_or_else(|| {
                    protocol(ProtocolError::UnknownGlobalState {
                        key: global_key.raw(),
                    })
                })?;
                self.cursor = Some(i);
                i
            }
        };

        let tier = &mut self.tiers[tier];
        if let Some(pipeline) = tier.pipelines.get(&graphics_key) {
            self.hits += 1;
            return Ok(Arc::clone(pipeline));
        }

        self.misses += 1;
        let pipeline = Arc::new(create(&tier.state)?);
        tier.pipelines.insert(graphics_key, Arc::clone(&pipeline));
        Ok(pipeline)
    }
}

/// Vertex buffer layouts derived from a (geometry, shader) pair.
#[derive(Debug)]
struct DerivedVertexLayout {
    buffers: Vec<VertexBufferLayout>,
    /// Geometry buffer index per pipeline vertex slot, deduplicated.
    buffer_indices: Arc<[usize]>,
}

impl DerivedVertexLayout {
    fn derive(geometry: &GeometryLayout, shader: &Shader) -> RenderResult<Self> {
        let mut attributes: Vec<_> = shader.attributes().iter().collect();
        attributes.sort_by_key(|a| a.location);

        let mut indices: Vec<usize> = Vec::new();
        let mut buffers: Vec<VertexBufferLayout> = Vec::new();
        for attribute in attributes {
            let source = geometry.attribute(&attribute.name).ok_or_else(|| {
                protocol(ProtocolError::MissingVertexAttribute {
                    name: attribute.name.to_string(),
                })
            })?;

            let slot = match indices.iter().position(|&b| b == source.buffer) {
                Some(slot) => slot,
                None => {
                    indices.push(source.buffer);
                    buffers.push(VertexBufferLayout {
                        array_stride: source.stride,
                        step_mode: source.step_mode,
                        attributes: Vec::new(),
                    });
                    buffers.len() - 1
                }
            };
            buffers[slot].attributes.push(wgpu::VertexAttribute {
                format: source.format,
                offset: source.offset,
                shader_location: attribute.location,
            });
        }

        Ok(Self {
            buffers,
            buffer_indices: indices.into(),
        })
    }
}

/// Sub-caches consulted when a pipeline has to be created.
struct PipelineBuilder {
    shader_modules: HashMap<Arc<str>, GpuShaderModule>,
    vertex_layouts: HashMap<(u16, u16), Arc<DerivedVertexLayout>>,
    geometry_layouts: LayoutRegistry<GeometryLayout>,
    shader_layouts: LayoutRegistry<ResourceUid>,
    pipelines_created: u64,
    shader_modules_compiled: u64,
    vertex_layouts_derived: u64,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            shader_modules: HashMap::default(),
            vertex_layouts: HashMap::default(),
            geometry_layouts: LayoutRegistry::new("geometry layout", u16::MAX),
            shader_layouts: LayoutRegistry::new("shader layout", u16::MAX),
            pipelines_created: 0,
            shader_modules_compiled: 0,
            vertex_layouts_derived: 0,
        }
    }

    fn graphics_key(&mut self, request: &PipelineRequest<'_>) -> RenderResult<GraphicsStateKey> {
        let geometry = self.geometry_layouts.id(request.geometry)?;
        let shader = self.shader_layouts.id(&request.shader.uid())?;
        Ok(GraphicsStateKey::pack(
            geometry,
            shader,
            request.state,
            request.blend,
            request.topology,
        ))
    }

    fn shader_module(
        &mut self,
        device: &dyn RenderDevice,
        shader: &Shader,
    ) -> RenderResult<GpuShaderModule> {
        if let Some(module) = self.shader_modules.get(shader.source()) {
            return Ok(module.clone());
        }

        let module = device
            .create_shader_module(&wgpu::ShaderModuleDescriptor {
                label: Some(shader.label()),
                source: wgpu::ShaderSource::Wgsl(shader.source().as_ref().into()),
            })
            .map_err(|source| {
                tracing::error!("Failed to compile shader `{}`: {source}", shader.label());
                RenderError::device(DeviceResourceKind::ShaderModule, shader.label(), source)
            })?;
        tracing::debug!("Compiled shader module `{}`", shader.label());
        self.shader_modules_compiled += 1;
        self.shader_modules
            .insert(Arc::clone(shader.source()), module.clone());
        Ok(module)
    }

    fn vertex_layout(
        &mut self,
        graphics_key: GraphicsStateKey,
        request: &PipelineRequest<'_>,
    ) -> RenderResult<Arc<DerivedVertexLayout>> {
        let key = (graphics_key.geometry_layout(), graphics_key.shader_layout());
        if let Some(layout) = self.vertex_layouts.get(&key) {
            return Ok(Arc::clone(layout));
        }
        let layout = Arc::new(DerivedVertexLayout::derive(request.geometry, request.shader)?);
        self.vertex_layouts_derived += 1;
        self.vertex_layouts.insert(key, Arc::clone(&layout));
        Ok(layout)
    }

    fn build(
        &mut self,
        device: &dyn RenderDevice,
        request: &PipelineRequest<'_>,
        graphics_key: GraphicsStateKey,
        global_key: GlobalStateKey,
        global: &GlobalRenderState,
    ) -> RenderResult<CachedPipeline> {
        profile_function!();
        let module = self.shader_module(device, request.shader)?;
        let vertex = self.vertex_layout(graphics_key, request)?;

        let layouts: Vec<GpuBindGroupLayout> = request
            .shader
            .groups()
            .iter()
            .map(|group| group.gpu().clone())
            .collect();
        let target = request
            .blend
            .to_color_target_state(global.color_format, global.color_mask);
        let targets = vec![Some(target); global.color_target_count.max(1) as usize];

        let pipeline = device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(request.shader.label()),
                bind_group_layouts: &layouts,
                module: &module,
                vertex_entry: request.shader.vertex_entry(),
                fragment_entry: request.shader.fragment_entry(),
                vertex_buffers: &vertex.buffers,
                primitive: request
                    .state
                    .primitive_state(request.topology, request.geometry.index_format()),
                depth_stencil: global.depth_stencil_state(request.state),
                multisample: global.multisample_state(),
                targets: &targets,
            })
            .map_err(|source| {
                tracing::error!(
                    "Failed to create pipeline {graphics_key}/{global_key} for `{}`: {source}",
                    request.shader.label()
                );
                RenderError::device(
                    DeviceResourceKind::Pipeline,
                    format_args!("{graphics_key}/{global_key}"),
                    source,
                )
            })?;
        self.pipelines_created += 1;
        tracing::debug!(
            "Created pipeline {graphics_key}/{global_key} for `{}`",
            request.shader.label()
        );

        Ok(CachedPipeline::new(
            pipeline,
            layouts.iter().map(GpuBindGroupLayout::id).collect(),
            Arc::clone(&vertex.buffer_indices),
        ))
    }
}

/// Pipeline cache owned by one renderer.
pub struct PipelineCache {
    tiers: Tiers,
    builder: PipelineBuilder,
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCache {
    pub fn new() -> Self {
        Self {
            tiers: Tiers::new(),
            builder: PipelineBuilder::new(),
        }
    }

    /// Compute the key for `state`, add an empty tier if it is new and point
    /// the cursor at it.
    pub fn set_global_state(&mut self, state: GlobalRenderState) -> RenderResult<GlobalStateKey> {
        self.tiers.set_global_state(state)
    }

    pub fn global_key(&self) -> Option<GlobalStateKey> {
        self.tiers.current().map(|tier| tier.key)
    }

    pub fn global_state(&self) -> Option<&GlobalRenderState> {
        self.tiers.current().map(|tier| &tier.state)
    }

    /// Pack the graphics key for a request, registering its layouts.
    pub fn graphics_key(&mut self, request: &PipelineRequest<'_>) -> RenderResult<GraphicsStateKey> {
        self.builder.graphics_key(request)
    }

    /// Return the pipeline for `graphics_key` in the tier of `global_key`,
    /// calling `create` only on a miss.
    ///
    /// A `global_key` other than the current one moves the cursor to that
    /// tier; a key never passed through `set_global_state` is an error.
    pub fn get_pipeline<F>(
        &mut self,
        graphics_key: GraphicsStateKey,
        global_key: GlobalStateKey,
        create: F,
    ) -> RenderResult<PipelineHandle>
    where
        F: FnOnce(&GlobalRenderState) -> RenderResult<CachedPipeline>,
    {
        self.tiers.get_pipeline(graphics_key, global_key, create)
    }

    /// Resolve a request against the current global state, building the
    /// pipeline from the sub-caches on a miss.
    pub fn resolve(
        &mut self,
        device: &dyn RenderDevice,
        request: &PipelineRequest<'_>,
    ) -> RenderResult<PipelineHandle> {
        let global_key = self
            .global_key()
            .ok_or_else(|| protocol(ProtocolError::NoGlobalState))?;
        let graphics_key = self.builder.graphics_key(request)?;
        let builder = &mut self.builder;
        self.tiers.get_pipeline(graphics_key, global_key, |global| {
            builder.build(device, request, graphics_key, global_key, global)
        })
    }

    /// Number of cached pipelines across all tiers.
    pub fn len(&self) -> usize {
        self.tiers.tiers.iter().map(|t| t.pipelines.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            hits: self.tiers.hits,
            misses: self.tiers.misses,
            pipelines_created: self.builder.pipelines_created,
            shader_modules_compiled: self.builder.shader_modules_compiled,
            vertex_layouts_derived: self.builder.vertex_layouts_derived,
            tiers: self.tiers.tiers.len(),
        }
    }
}
