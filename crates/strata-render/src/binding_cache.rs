//! Cache of device binding sets (bind groups).
//!
//! Two kinds of keys reach the cache:
//!
//! - [`BindingSetKey::Composite`]: the ordered per-slot identities of a
//!   [`BindingSet`]. Exact: equal keys mean equal resources in equal slots.
//! - [`BindingSetKey::TextureBatch`]: an FNV-1a hash over the ordered
//!   textures of a batch. Cheap to build for the sprite path, but two
//!   different texture lists can collide and then share one device object.
//!   That collision is not detected.
//!
//! Entries are stored per layout: equal keys under different
//! [`BindingLayout`]s are different device objects.
//!
//! Entries are never patched. A resource update bumps its version, which
//! changes the key and produces a new entry. Every lookup touches the
//! resources of the returned set with the current tick, and
//! [`ResourceBindingCache::reclaim`] drops entries idle for too long.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::alloc::HashMap;
use strata_core::profiling::{profile_function, profile_scope};
use strata_test_utils::{
    BindGroupDescriptor, BindGroupEntry, BindGroupResource, GpuBindGroup, GpuBuffer,
    GpuResourceId, GpuSampler, GpuTextureView, RenderDevice,
};

use crate::error::{DeviceResourceKind, ProtocolError, RenderError, RenderResult, protocol};
use crate::resource::{BindingKind, BindingResource, ResourceKey, TextureSource};
use crate::sampler_cache::{SamplerCache, SamplerKey};
use crate::shader::{BindingLayout, BindingSlot};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over whole words.
pub fn fnv1a_32(words: impl IntoIterator<Item = u32>) -> u32 {
    words.into_iter().fold(FNV_OFFSET_BASIS, |hash, word| {
        (hash ^ word).wrapping_mul(FNV_PRIME)
    })
}

/// Identity of one slot in a composite key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Empty,
    Resource(ResourceKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingSetKey {
    Composite(Box<[SlotKey]>),
    TextureBatch(u32),
}

impl BindingSetKey {
    pub fn composite(resources: &[Option<BindingResource>]) -> Self {
        Self::Composite(
            resources
                .iter()
                .map(|slot| match slot {
                    Some(resource) => SlotKey::Resource(resource.key()),
                    None => SlotKey::Empty,
                })
                .collect(),
        )
    }

    /// Order-sensitive hash of a batch's textures.
    ///
    /// Each texture contributes its uid (low 32 bits) and its version.
    pub fn texture_batch(textures: &[TextureSource]) -> Self {
        Self::TextureBatch(fnv1a_32(textures.iter().flat_map(|texture| {
            let key = texture.key();
            [key.uid.raw() as u32, key.version]
        })))
    }
}

impl fmt::Display for BindingSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Composite(slots) => {
                write!(f, "[")?;
                for (i, slot) in slots.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    match slot {
                        SlotKey::Empty => write!(f, "-")?,
                        SlotKey::Resource(key) => write!(f, "{}v{}", key.uid, key.version)?,
                    }
                }
                write!(f, "]")
            }
            Self::TextureBatch(hash) => write!(f, "tex:{hash:#010x}"),
        }
    }
}

struct BindingSetState {
    resources: Vec<Option<BindingResource>>,
    /// Identities the current key was computed from.
    seen: Vec<Option<ResourceKey>>,
    key: Option<BindingSetKey>,
}

/// Resources for one binding group, laid out by a [`BindingLayout`].
///
/// The key is regenerated lazily: [`BindingSet::key`] polls each resource's
/// version and destroyed flag and rebuilds the key only if something moved.
/// Destroyed resources leave their slot empty.
pub struct BindingSet {
    layout: Arc<BindingLayout>,
    state: Mutex<BindingSetState>,
}

impl BindingSet {
    pub fn new(layout: Arc<BindingLayout>, resources: Vec<BindingResource>) -> Arc<Self> {
        let resources: Vec<_> = resources.into_iter().map(Some).collect();
        let seen = vec![None; resources.len()];
        Arc::new(Self {
            layout,
            state: Mutex::new(BindingSetState {
                resources,
                seen,
                key: None,
            }),
        })
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    /// Replace the resource in `slot`, growing the set if needed.
    pub fn set_resource(&self, slot: usize, resource: BindingResource) {
        let mut state = self.state.lock();
        if state.resources.len() <= slot {
            state.resources.resize(slot + 1, None);
            state.seen.resize(slot + 1, None);
        }
        state.resources[slot] = Some(resource);
        state.key = None;
    }

    pub fn resources(&self) -> Vec<Option<BindingResource>> {
        self.state.lock().resources.clone()
    }

    /// Current key, rebuilt if any resource changed or was destroyed.
    pub fn key(&self) -> BindingSetKey {
        self.snapshot().0
    }

    /// Key and resources, taken under one lock.
    pub(crate) fn snapshot(&self) -> (BindingSetKey, Vec<Option<BindingResource>>) {
        let mut state = self.state.lock();
        let BindingSetState {
            resources,
            seen,
            key,
        } = &mut *state;

        let mut dirty = key.is_none();
        for (slot, seen) in resources.iter_mut().zip(seen.iter_mut()) {
            if slot.as_ref().is_some_and(BindingResource::is_destroyed) {
                tracing::debug!("Dropping destroyed resource from binding set");
                *slot = None;
            }
            let current = slot.as_ref().map(BindingResource::key);
            if current != *seen {
                *seen = current;
                dirty = true;
            }
        }

        if dirty {
            *key = Some(BindingSetKey::composite(resources));
        }
        let key = key.clone().unwrap_or_else(|| BindingSetKey::composite(resources));
        (key, resources.clone())
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("layout", &self.layout.id())
            .field("slots", &self.state.lock().resources.len())
            .finish()
    }
}

/// Fallback objects bound into empty slots.
struct Placeholders {
    view: GpuTextureView,
    sampler: GpuSampler,
    buffer: GpuBuffer,
}

impl Placeholders {
    fn new(device: &dyn RenderDevice, samplers: &SamplerCache) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("placeholder_texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        device.write_texture(&texture, &[255, 255, 255, 255], 4);
        let view = device.create_texture_view(&texture);
        let sampler = samplers.get_or_create(device, SamplerKey::nearest());
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("placeholder_uniform"),
            size: 256,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        Self {
            view,
            sampler,
            buffer,
        }
    }

    fn for_kind(&self, kind: BindingKind) -> BindGroupResource {
        match kind {
            BindingKind::Texture => BindGroupResource::TextureView(self.view.clone()),
            BindingKind::Sampler => BindGroupResource::Sampler(self.sampler.clone()),
            BindingKind::UniformBuffer => BindGroupResource::Buffer(self.buffer.clone()),
        }
    }
}

struct CachedBindingSet {
    group: GpuBindGroup,
    resources: Vec<BindingResource>,
    last_used: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Binding-set cache owned by one renderer.
pub struct ResourceBindingCache {
    entries: HashMap<(GpuResourceId, BindingSetKey), CachedBindingSet>,
    /// Texture-batch layouts by slot count.
    batch_layouts: HashMap<usize, Arc<BindingLayout>>,
    placeholders: Placeholders,
    tick: u64,
    stats: BindingCacheStats,
}

impl ResourceBindingCache {
    pub fn new(device: &dyn RenderDevice, samplers: &SamplerCache) -> Self {
        Self {
            entries: HashMap::default(),
            batch_layouts: HashMap::default(),
            placeholders: Placeholders::new(device, samplers),
            tick: 0,
            stats: BindingCacheStats::default(),
        }
    }

    /// Set the tick used to touch resources on lookup.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> BindingCacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a set is cached under `key` for the layout `layout`.
    pub fn contains(&self, layout: GpuResourceId, key: &BindingSetKey) -> bool {
        self.entries.contains_key(&(layout, key.clone()))
    }

    /// Return the binding set cached under `key` for `layout`, creating it
    /// from `resources` on a miss.
    ///
    /// `resources` holds one entry per layout slot; `None` and destroyed
    /// resources bind the placeholder of the slot's kind. A resource of the
    /// wrong kind is a protocol error.
    pub fn get_or_create(
        &mut self,
        device: &dyn RenderDevice,
        key: &BindingSetKey,
        resources: &[Option<BindingResource>],
        layout: &BindingLayout,
    ) -> RenderResult<GpuBindGroup> {
        profile_function!();
        let tick = self.tick;
        let slot = (layout.id(), key.clone());
        if let Some(entry) = self.entries.get_mut(&slot) {
            self.stats.hits += 1;
            entry.last_used = tick;
            for resource in &entry.resources {
                resource.touch(tick);
            }
            return Ok(entry.group.clone());
        }

        self.stats.misses += 1;
        let entries = self.build_entries(resources, layout.slots())?;
        let group = device
            .create_bind_group(&BindGroupDescriptor {
                label: Some("binding_set"),
                layout: layout.gpu(),
                entries: &entries,
            })
            .map_err(|source| {
                tracing::error!("Failed to create binding set {key}: {source}");
                RenderError::device(DeviceResourceKind::BindingSet, key, source)
            })?;
        tracing::debug!("Created binding set {key} ({} slots)", entries.len());

        let resources: Vec<BindingResource> = resources.iter().flatten().cloned().collect();
        for resource in &resources {
            resource.touch(tick);
        }
        self.entries.insert(
            slot,
            CachedBindingSet {
                group: group.clone(),
                resources,
                last_used: tick,
            },
        );
        Ok(group)
    }

    /// Resolve a [`BindingSet`] through the general (composite key) path.
    pub fn resolve(
        &mut self,
        device: &dyn RenderDevice,
        set: &BindingSet,
    ) -> RenderResult<GpuBindGroup> {
        let (key, resources) = set.snapshot();
        self.get_or_create(device, &key, &resources, set.layout())
    }

    /// The shared layout for texture batches with `max_textures` slots.
    ///
    /// Texture `i` sits at binding `2i`, its sampler at `2i + 1`.
    pub fn texture_batch_layout(
        &mut self,
        device: &dyn RenderDevice,
        max_textures: usize,
    ) -> Arc<BindingLayout> {
        Arc::clone(self.batch_layouts.entry(max_textures).or_insert_with(|| {
            let slots = (0..max_textures as u32)
                .flat_map(|i| {
                    [
                        BindingSlot::new(2 * i, BindingKind::Texture, wgpu::ShaderStages::FRAGMENT),
                        BindingSlot::new(
                            2 * i + 1,
                            BindingKind::Sampler,
                            wgpu::ShaderStages::FRAGMENT,
                        ),
                    ]
                })
                .collect();
            BindingLayout::new(device, "texture_batch_layout", slots)
        }))
    }

    /// Fast path for a batch's texture set.
    ///
    /// Keyed by [`BindingSetKey::texture_batch`]; slots past the live textures
    /// are padded with the placeholder pair so every set for one
    /// `max_textures` shares a layout.
    pub fn get_texture_batch(
        &mut self,
        device: &dyn RenderDevice,
        textures: &[TextureSource],
        max_textures: usize,
    ) -> RenderResult<GpuBindGroup> {
        profile_scope!("texture_batch_binding");
        if textures.len() > max_textures {
            return Err(protocol(ProtocolError::TooManyTextures {
                count: textures.len(),
                max: max_textures,
            }));
        }
        let layout = self.texture_batch_layout(device, max_textures);
        let key = BindingSetKey::texture_batch(textures);
        let slot = (layout.id(), key.clone());
        let stale = self
            .entries
            .get(&slot)
            .is_some_and(|entry| entry.resources.iter().any(BindingResource::is_destroyed));
        if stale {
            tracing::debug!("Rebuilding binding set {key} around a destroyed texture");
            self.entries.remove(&slot);
            self.stats.evictions += 1;
        }
        if !self.entries.contains_key(&slot) {
            let mut resources = Vec::with_capacity(max_textures * 2);
            for i in 0..max_textures {
                match textures.get(i) {
                    Some(texture) => {
                        resources.push(Some(BindingResource::Texture(texture.clone())));
                        resources.push(Some(BindingResource::Sampler(texture.clone())));
                    }
                    None => resources.extend([None, None]),
                }
            }
            return self.get_or_create(device, &key, &resources, &layout);
        }
        self.get_or_create(device, &key, &[], &layout)
    }

    /// Drop entries unused for more than `max_idle` ticks or holding a
    /// destroyed resource. Returns how many were dropped.
    pub fn reclaim(&mut self, max_idle: u64) -> usize {
        let tick = self.tick;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            tick.saturating_sub(entry.last_used) <= max_idle
                && !entry.resources.iter().any(BindingResource::is_destroyed)
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!("Reclaimed {evicted} idle binding sets");
        }
        self.stats.evictions += evicted as u64;
        evicted
    }

    fn build_entries(
        &self,
        resources: &[Option<BindingResource>],
        slots: &[BindingSlot],
    ) -> RenderResult<Vec<BindGroupEntry>> {
        if resources.len() > slots.len() {
            return Err(protocol(ProtocolError::ResourceCountMismatch {
                expected: slots.len(),
                found: resources.len(),
            }));
        }

        slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let resource = match resources.get(i).and_then(Option::as_ref) {
                    Some(resource) if resource.kind() != slot.kind => {
                        return Err(protocol(ProtocolError::ResourceLayoutMismatch {
                            slot: i,
                            expected: slot.kind.name(),
                            found: resource.kind().name(),
                        }));
                    }
                    Some(resource) if !resource.is_destroyed() => resource.to_gpu(),
                    _ => self.placeholders.for_kind(slot.kind),
                };
                Ok(BindGroupEntry {
                    binding: slot.binding,
                    resource,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BufferResource;
    use strata_test_utils::{MockFailure, MockRenderDevice, RenderCall};

    fn texture(id: u64) -> TextureSource {
        TextureSource::from_parts(
            GpuTextureView::mock(GpuResourceId::new(10_000 + id)),
            GpuSampler::mock(GpuResourceId::new(20_000 + id)),
        )
    }

    fn setup() -> (MockRenderDevice, ResourceBindingCache) {
        let device = MockRenderDevice::new();
        let samplers = SamplerCache::new();
        let cache = ResourceBindingCache::new(&device, &samplers);
        (device, cache)
    }

    fn texture_layout(device: &MockRenderDevice) -> Arc<BindingLayout> {
        BindingLayout::new(
            device,
            "material",
            vec![
                BindingSlot::new(0, BindingKind::Texture, wgpu::ShaderStages::FRAGMENT),
                BindingSlot::new(1, BindingKind::Sampler, wgpu::ShaderStages::FRAGMENT),
            ],
        )
    }

    #[test]
    fn test_fnv1a_matches_reference_values() {
        assert_eq!(fnv1a_32([]), FNV_OFFSET_BASIS);
        let expected = (FNV_OFFSET_BASIS ^ 1).wrapping_mul(FNV_PRIME);
        assert_eq!(fnv1a_32([1]), expected);
    }

    #[test]
    fn test_texture_batch_key_is_deterministic_and_order_sensitive() {
        let a = texture(1);
        let b = texture(2);
        let ab = BindingSetKey::texture_batch(&[a.clone(), b.clone()]);
        assert_eq!(ab, BindingSetKey::texture_batch(&[a.clone(), b.clone()]));
        assert_ne!(ab, BindingSetKey::texture_batch(&[b, a]));
    }

    #[test]
    fn test_composite_key_display() {
        let key = BindingSetKey::Composite(vec![SlotKey::Empty].into_boxed_slice());
        assert_eq!(key.to_string(), "[-]");
    }

    #[test]
    fn test_general_path_hits_after_first_create() {
        let (device, mut cache) = setup();
        let layout = texture_layout(&device);
        let t = texture(1);
        let set = BindingSet::new(
            layout,
            vec![BindingResource::Texture(t.clone()), BindingResource::Sampler(t)],
        );

        let first = cache.resolve(&device, &set).unwrap();
        let second = cache.resolve(&device, &set).unwrap();

        assert_eq!(first, second);
        assert_eq!(device.count_bind_group_creates(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_updated_resource_produces_new_key() {
        let (device, mut cache) = setup();
        let layout = texture_layout(&device);
        let t = texture(1);
        let set = BindingSet::new(
            layout,
            vec![BindingResource::Texture(t.clone()), BindingResource::Sampler(t.clone())],
        );

        let before = set.key();
        let first = cache.resolve(&device, &set).unwrap();
        t.update(texture(2).get());
        let after = set.key();
        let second = cache.resolve(&device, &set).unwrap();

        assert_ne!(before, after);
        assert_ne!(first, second);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_destroyed_resource_leaves_slot_empty() {
        let (device, mut cache) = setup();
        let layout = texture_layout(&device);
        let t = texture(1);
        let set = BindingSet::new(
            layout,
            vec![BindingResource::Texture(t.clone()), BindingResource::Sampler(t.clone())],
        );
        cache.resolve(&device, &set).unwrap();

        t.destroy();
        let key = set.key();
        assert_eq!(
            key,
            BindingSetKey::Composite(vec![SlotKey::Empty, SlotKey::Empty].into_boxed_slice())
        );
        assert!(set.resources().iter().all(Option::is_none));
        // Still creatable: placeholders fill the empty slots.
        cache.resolve(&device, &set).unwrap();
        assert_eq!(device.count_bind_group_creates(), 2);
    }

    #[test]
    fn test_wrong_resource_kind_is_protocol_error() {
        let (device, mut cache) = setup();
        let layout = texture_layout(&device);
        let t = texture(1);
        let set = BindingSet::new(
            layout,
            vec![BindingResource::Sampler(t.clone()), BindingResource::Texture(t)],
        );
        let err = cache.resolve(&device, &set).unwrap_err();
        assert!(matches!(
            err.as_protocol(),
            Some(ProtocolError::ResourceLayoutMismatch { slot: 0, .. })
        ));
        assert_eq!(device.count_bind_group_creates(), 0);
    }

    #[test]
    fn test_device_failure_is_not_cached() {
        let (device, mut cache) = setup();
        let layout = texture_layout(&device);
        let t = texture(1);
        let set = BindingSet::new(
            layout,
            vec![BindingResource::Texture(t.clone()), BindingResource::Sampler(t)],
        );
        device.fail_next(MockFailure::BindGroup);
        assert!(matches!(
            cache.resolve(&device, &set),
            Err(RenderError::DeviceResource {
                kind: DeviceResourceKind::BindingSet,
                ..
            })
        ));
        assert!(cache.is_empty());
        assert!(cache.resolve(&device, &set).is_ok());
    }

    #[test]
    fn test_texture_batch_pads_with_placeholders() {
        let (device, mut cache) = setup();
        let textures = [texture(1), texture(2)];
        cache.get_texture_batch(&device, &textures, 4).unwrap();

        let resources = device
            .calls()
            .into_iter()
            .find_map(|call| match call {
                RenderCall::CreateBindGroup { resources, .. } => Some(resources),
                _ => None,
            })
            .unwrap();
        assert_eq!(resources.len(), 8);
        assert_eq!(resources[0], GpuResourceId::new(10_001));
        assert_eq!(resources[3], GpuResourceId::new(20_002));
        // Padding repeats one placeholder pair.
        assert_eq!(resources[4], resources[6]);
        assert_eq!(resources[5], resources[7]);
    }

    #[test]
    fn test_texture_batch_reuses_entry() {
        let (device, mut cache) = setup();
        let textures = [texture(1), texture(2)];
        let a = cache.get_texture_batch(&device, &textures, 4).unwrap();
        let b = cache.get_texture_batch(&device, &textures, 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.count_bind_group_creates(), 1);
    }

    #[test]
    fn test_same_resources_under_different_layouts() {
        let (device, mut cache) = setup();
        let uniforms = BufferResource::new(GpuBuffer::mock(GpuResourceId::new(30_001), 64));
        let layout_for = |stages| {
            BindingLayout::new(
                &device,
                "uniforms",
                vec![BindingSlot::new(0, BindingKind::UniformBuffer, stages)],
            )
        };
        let vertex = layout_for(wgpu::ShaderStages::VERTEX);
        let fragment = layout_for(wgpu::ShaderStages::FRAGMENT);
        let a = BindingSet::new(
            Arc::clone(&vertex),
            vec![BindingResource::UniformBuffer(uniforms.clone())],
        );
        let b = BindingSet::new(
            Arc::clone(&fragment),
            vec![BindingResource::UniformBuffer(uniforms)],
        );
        assert_eq!(a.key(), b.key());

        let group_a = cache.resolve(&device, &a).unwrap();
        let group_b = cache.resolve(&device, &b).unwrap();

        assert_ne!(group_a, group_b);
        assert_eq!(group_a.layout_id(), vertex.id());
        assert_eq!(group_b.layout_id(), fragment.id());
        assert_eq!(device.count_bind_group_creates(), 2);
        assert!(cache.contains(fragment.id(), &b.key()));
    }

    #[test]
    fn test_texture_batch_is_cached_per_slot_count() {
        let (device, mut cache) = setup();
        let t = texture(1);
        let four = cache.get_texture_batch(&device, &[t.clone()], 4).unwrap();
        let eight = cache.get_texture_batch(&device, &[t], 8).unwrap();

        assert_eq!(four.layout_id(), cache.texture_batch_layout(&device, 4).id());
        assert_eq!(eight.layout_id(), cache.texture_batch_layout(&device, 8).id());
        assert_ne!(four.layout_id(), eight.layout_id());
        assert_eq!(device.count_bind_group_creates(), 2);
    }

    #[test]
    fn test_too_many_textures() {
        let (device, mut cache) = setup();
        let textures = [texture(1), texture(2), texture(3)];
        let err = cache.get_texture_batch(&device, &textures, 2).unwrap_err();
        assert_eq!(
            err.as_protocol(),
            Some(&ProtocolError::TooManyTextures { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_lookup_touches_resources() {
        let (device, mut cache) = setup();
        let t = texture(1);
        cache.set_tick(3);
        cache.get_texture_batch(&device, &[t.clone()], 2).unwrap();
        assert_eq!(t.last_touched(), 3);
        cache.set_tick(9);
        cache.get_texture_batch(&device, &[t.clone()], 2).unwrap();
        assert_eq!(t.last_touched(), 9);
    }

    #[test]
    fn test_reclaim_drops_idle_and_destroyed_entries() {
        let (device, mut cache) = setup();
        let idle = texture(1);
        let live = texture(2);
        let doomed = texture(3);

        cache.set_tick(1);
        cache.get_texture_batch(&device, &[idle], 2).unwrap();
        cache.set_tick(10);
        cache.get_texture_batch(&device, &[live], 2).unwrap();
        cache.get_texture_batch(&device, &[doomed.clone()], 2).unwrap();
        doomed.destroy();

        assert_eq!(cache.reclaim(5), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 2);
    }
}
