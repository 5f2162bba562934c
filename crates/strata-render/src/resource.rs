//! Bindable resources with pull-based change tracking.
//!
//! A [`Tracked`] handle wraps a GPU object together with a process-unique
//! id, a version counter, a destroyed flag and the tick it was last used.
//! Binding sets poll these instead of subscribing to change events, so
//! there is nothing to unsubscribe when a set is dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use strata_test_utils::{BindGroupResource, GpuBuffer, GpuSampler, GpuTextureView};

static NEXT_RESOURCE_UID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a tracked resource or shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUid(u64);

impl ResourceUid {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a resource at one version.
///
/// Updating a resource bumps the version, so every key that included the old
/// version stops matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub uid: ResourceUid,
    pub version: u32,
}

struct TrackedInner<T> {
    uid: ResourceUid,
    version: AtomicU32,
    destroyed: AtomicBool,
    last_touched: AtomicU64,
    value: RwLock<T>,
}

/// Shared handle to a bindable resource.
///
/// Clones refer to the same resource.
pub struct Tracked<T> {
    inner: Arc<TrackedInner<T>>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(TrackedInner {
                uid: ResourceUid::next(),
                version: AtomicU32::new(0),
                destroyed: AtomicBool::new(false),
                last_touched: AtomicU64::new(0),
                value: RwLock::new(value),
            }),
        }
    }

    pub fn uid(&self) -> ResourceUid {
        self.inner.uid
    }

    pub fn version(&self) -> u32 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            uid: self.uid(),
            version: self.version(),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Replace the underlying object and bump the version.
    pub fn update(&self, value: T) {
        *self.inner.value.write() = value;
        self.inner.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark the resource destroyed. Binding sets drop it on their next key check.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Record use at `tick`. Ticks only move forward.
    pub fn touch(&self, tick: u64) {
        self.inner.last_touched.fetch_max(tick, Ordering::AcqRel);
    }

    pub fn last_touched(&self) -> u64 {
        self.inner.last_touched.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("uid", &self.inner.uid)
            .field("version", &self.inner.version.load(Ordering::Relaxed))
            .field("destroyed", &self.inner.destroyed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A texture view paired with the sampler it is read through.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub view: GpuTextureView,
    pub sampler: GpuSampler,
}

/// A texture as the batcher sees it. One uid covers the view and its sampler.
pub type TextureSource = Tracked<TextureBinding>;

pub type BufferResource = Tracked<GpuBuffer>;

impl TextureSource {
    pub fn from_parts(view: GpuTextureView, sampler: GpuSampler) -> Self {
        Tracked::new(TextureBinding { view, sampler })
    }
}

/// What kind of object a binding slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Texture,
    Sampler,
    UniformBuffer,
}

impl BindingKind {
    pub fn name(self) -> &'static str {
        match self {
            BindingKind::Texture => "texture",
            BindingKind::Sampler => "sampler",
            BindingKind::UniformBuffer => "uniform buffer",
        }
    }
}

/// A resource placed in one slot of a binding set.
#[derive(Debug, Clone)]
pub enum BindingResource {
    /// The view of a texture source.
    Texture(TextureSource),
    /// The sampler of a texture source.
    Sampler(TextureSource),
    UniformBuffer(BufferResource),
}

impl BindingResource {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingResource::Texture(_) => BindingKind::Texture,
            BindingResource::Sampler(_) => BindingKind::Sampler,
            BindingResource::UniformBuffer(_) => BindingKind::UniformBuffer,
        }
    }

    pub fn key(&self) -> ResourceKey {
        match self {
            BindingResource::Texture(t) | BindingResource::Sampler(t) => t.key(),
            BindingResource::UniformBuffer(b) => b.key(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        match self {
            BindingResource::Texture(t) | BindingResource::Sampler(t) => t.is_destroyed(),
            BindingResource::UniformBuffer(b) => b.is_destroyed(),
        }
    }

    pub fn touch(&self, tick: u64) {
        match self {
            BindingResource::Texture(t) | BindingResource::Sampler(t) => t.touch(tick),
            BindingResource::UniformBuffer(b) => b.touch(tick),
        }
    }

    /// The device object bound for this resource right now.
    pub fn to_gpu(&self) -> BindGroupResource {
        match self {
            BindingResource::Texture(t) => BindGroupResource::TextureView(t.get().view),
            BindingResource::Sampler(t) => BindGroupResource::Sampler(t.get().sampler),
            BindingResource::UniformBuffer(b) => BindGroupResource::Buffer(b.get()),
        }
    }
}
