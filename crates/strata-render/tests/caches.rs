//! Pipeline and binding-set caches driven through the mock device.

use std::sync::Arc;

use strata_render::wgpu;
use strata_render::*;
use strata_test_utils::{
    GpuResourceId, GpuSampler, GpuTextureView, MockFailure, MockRenderDevice, RenderCall,
};

const WGSL: &str = "@vertex fn vs_main() {} @fragment fn fs_main() {}";

fn texture(id: u64) -> TextureSource {
    TextureSource::from_parts(
        GpuTextureView::mock(GpuResourceId::new(50_000 + id)),
        GpuSampler::mock(GpuResourceId::new(60_000 + id)),
    )
}

fn layout() -> GeometryLayout {
    GeometryLayout::new()
        .with_attribute("position", 0, wgpu::VertexFormat::Float32x2, 0, 8)
        .with_index_format(wgpu::IndexFormat::Uint16)
}

fn bind_group_resources(device: &MockRenderDevice) -> Vec<Vec<GpuResourceId>> {
    device
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RenderCall::CreateBindGroup { resources, .. } => Some(resources),
            _ => None,
        })
        .collect()
}

#[test]
fn test_pipeline_resolution_is_idempotent_per_key() {
    let device = MockRenderDevice::new();
    let mut cache = PipelineCache::new();
    cache
        .set_global_state(GlobalRenderState::new(wgpu::TextureFormat::Bgra8Unorm))
        .unwrap();

    let geometry = layout();
    let shader = Shader::new("quad", WGSL).with_attribute("position", 0);
    let request = |blend| PipelineRequest {
        geometry: &geometry,
        shader: &shader,
        state: RenderState::empty(),
        blend,
        topology: Topology::TriangleList,
    };

    let a = cache.resolve(&device, &request(BlendMode::Alpha)).unwrap();
    let b = cache.resolve(&device, &request(BlendMode::Alpha)).unwrap();
    let c = cache.resolve(&device, &request(BlendMode::Additive)).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(device.count_render_pipeline_creates(), 2);
    // One module serves both blend variants.
    assert_eq!(device.count_shader_creates(), 1);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 2));
}

#[test]
fn test_global_and_graphics_keys_vary_independently() {
    let device = MockRenderDevice::new();
    let mut cache = PipelineCache::new();
    let geometry = layout();
    let shader = Shader::new("quad", WGSL).with_attribute("position", 0);
    let request = PipelineRequest {
        geometry: &geometry,
        shader: &shader,
        state: RenderState::empty(),
        blend: BlendMode::Alpha,
        topology: Topology::TriangleList,
    };
    let graphics = cache.graphics_key(&request).unwrap();

    let plain = GlobalRenderState::new(wgpu::TextureFormat::Bgra8Unorm);
    let mut stenciled = plain;
    stenciled.depth_stencil_format = Some(wgpu::TextureFormat::Stencil8);
    stenciled.stencil_mode = StencilMode::MaskActive;

    let plain_key = cache.set_global_state(plain).unwrap();
    let first = cache.resolve(&device, &request).unwrap();
    let stenciled_key = cache.set_global_state(stenciled).unwrap();
    let second = cache.resolve(&device, &request).unwrap();
    cache.set_global_state(plain).unwrap();
    let again = cache.resolve(&device, &request).unwrap();

    assert_ne!(plain_key, stenciled_key);
    assert!(stenciled_key.has_depth_stencil());
    assert!(!plain_key.has_depth_stencil());
    assert_eq!(cache.graphics_key(&request).unwrap(), graphics);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(cache.stats().tiers, 2);
    assert_eq!(device.count_render_pipeline_creates(), 2);
}

#[test]
fn test_failed_pipeline_is_retried() {
    let device = MockRenderDevice::new();
    let mut cache = PipelineCache::new();
    cache
        .set_global_state(GlobalRenderState::new(wgpu::TextureFormat::Rgba8Unorm))
        .unwrap();
    let geometry = layout();
    let shader = Shader::new("quad", WGSL).with_attribute("position", 0);
    let request = PipelineRequest {
        geometry: &geometry,
        shader: &shader,
        state: RenderState::empty(),
        blend: BlendMode::Alpha,
        topology: Topology::TriangleList,
    };

    device.fail_next(MockFailure::RenderPipeline);
    let err = cache.resolve(&device, &request).unwrap_err();
    assert!(!err.is_protocol());
    assert!(cache.is_empty());

    cache.resolve(&device, &request).unwrap();
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_texture_batch_key_tracks_order_and_versions() {
    let a = texture(1);
    let b = texture(2);

    let ab = BindingSetKey::texture_batch(&[a.clone(), b.clone()]);
    assert_eq!(ab, BindingSetKey::texture_batch(&[a.clone(), b.clone()]));
    assert_ne!(ab, BindingSetKey::texture_batch(&[b.clone(), a.clone()]));

    a.update(texture(3).get());
    assert_ne!(ab, BindingSetKey::texture_batch(&[a, b]));
}

/// The texture-batch key is a bare 32-bit hash, so two different texture
/// lists can share it. Such a collision hands back the first list's set.
#[test]
fn test_texture_batch_hash_collision_returns_first_set() {
    const BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    // FNV-1a multiplies by an odd prime, so equal states before the last
    // word can be forced by choosing that word.
    let (uid_a, version_a) = (7, 0);
    let uid_b = 8;
    let before_a = (BASIS ^ uid_a).wrapping_mul(PRIME);
    let before_b = (BASIS ^ uid_b).wrapping_mul(PRIME);
    let version_b = version_a ^ before_a ^ before_b;
    let hash = fnv1a_32([uid_a, version_a]);
    assert_eq!(hash, fnv1a_32([uid_b, version_b]));

    let device = MockRenderDevice::new();
    let samplers = SamplerCache::new();
    let mut cache = ResourceBindingCache::new(&device, &samplers);
    let layout = cache.texture_batch_layout(&device, 1);
    let key = BindingSetKey::TextureBatch(hash);

    let first = texture(1);
    let second = texture(2);
    let group_a = cache
        .get_or_create(
            &device,
            &key,
            &[
                Some(BindingResource::Texture(first.clone())),
                Some(BindingResource::Sampler(first)),
            ],
            &layout,
        )
        .unwrap();
    let group_b = cache
        .get_or_create(
            &device,
            &key,
            &[
                Some(BindingResource::Texture(second.clone())),
                Some(BindingResource::Sampler(second)),
            ],
            &layout,
        )
        .unwrap();

    assert_eq!(group_a, group_b);
    assert_eq!(device.count_bind_group_creates(), 1);
    assert_eq!(bind_group_resources(&device)[0][0], GpuResourceId::new(50_001));
}

#[test]
fn test_destroyed_texture_is_replaced_by_placeholder() {
    let device = MockRenderDevice::new();
    let samplers = SamplerCache::new();
    let mut cache = ResourceBindingCache::new(&device, &samplers);
    let live = texture(1);
    let doomed = texture(2);
    let textures = [live.clone(), doomed.clone()];

    cache.get_texture_batch(&device, &textures, 2).unwrap();
    doomed.destroy();
    cache.get_texture_batch(&device, &textures, 2).unwrap();

    let created = bind_group_resources(&device);
    assert_eq!(created.len(), 2);
    assert_eq!(created[0][2], GpuResourceId::new(50_002));
    assert_ne!(created[1][2], GpuResourceId::new(50_002));
    assert_eq!(created[1][0], GpuResourceId::new(50_001));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_updated_uniform_buffer_gets_new_binding_set() {
    let device = MockRenderDevice::new();
    let samplers = SamplerCache::new();
    let mut cache = ResourceBindingCache::new(&device, &samplers);
    let layout = BindingLayout::new(
        &device,
        "uniforms",
        vec![BindingSlot::new(
            0,
            BindingKind::UniformBuffer,
            wgpu::ShaderStages::VERTEX,
        )],
    );
    let make_buffer = || {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: 64,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        })
    };
    let uniforms = BufferResource::new(make_buffer());
    let set = BindingSet::new(layout, vec![BindingResource::UniformBuffer(uniforms.clone())]);

    let first = cache.resolve(&device, &set).unwrap();
    assert_eq!(cache.resolve(&device, &set).unwrap(), first);

    uniforms.update(make_buffer());
    let second = cache.resolve(&device, &set).unwrap();
    assert_ne!(first, second);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.len(), 2);
}
