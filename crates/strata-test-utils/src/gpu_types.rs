//! GPU resource wrappers that can be real or mock.
//!
//! Every wrapper carries a [`GpuResourceId`] assigned by the device that
//! created it. Caches and the state-tracking encoder compare wrappers by that
//! id only.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a GPU object, unique per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuResourceId(u64);

impl GpuResourceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GpuResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source owned by a device implementation.
#[derive(Debug)]
pub struct GpuIdAllocator {
    next: AtomicU64,
}

impl GpuIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id. Ids start at 1.
    pub fn allocate(&self) -> GpuResourceId {
        GpuResourceId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for GpuIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines an opaque handle with no metadata beyond its id.
///
/// # Design Pattern: Opaque Wrapper
///
/// The handle hides whether it contains a real wgpu object or a mock. wgpu
/// objects are reference counted, so cloning a handle is cheap either way.
macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $inner:ident, $wgpu:ty, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            id: GpuResourceId,
            inner: $inner,
        }

        #[derive(Clone, Debug)]
        enum $inner {
            Real($wgpu),
            #[cfg(feature = "mock")]
            Mock,
        }

        impl $name {
            /// Wrap a real wgpu object.
            pub fn from_wgpu(id: GpuResourceId, value: $wgpu) -> Self {
                Self {
                    id,
                    inner: $inner::Real(value),
                }
            }

            /// Create a mock handle (for testing).
            #[cfg(feature = "mock")]
            pub fn mock(id: GpuResourceId) -> Self {
                Self {
                    id,
                    inner: $inner::Mock,
                }
            }

            pub fn id(&self) -> GpuResourceId {
                self.id
            }

            /// Get the underlying wgpu object.
            ///
            /// # Panics
            /// Panics if this is a mock handle (test code should never call this).
            pub fn as_wgpu(&self) -> &$wgpu {
                match &self.inner {
                    $inner::Real(value) => value,
                    #[cfg(feature = "mock")]
                    $inner::Mock => {
                        panic!(concat!("Attempted to get a wgpu ", $what, " from a mock handle"))
                    }
                }
            }

            /// Check if this is a mock (useful in tests).
            #[cfg(feature = "mock")]
            pub fn is_mock(&self) -> bool {
                matches!(self.inner, $inner::Mock)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}
    };
}

gpu_handle!(
    /// Wrapper around a texture view (what binding sets and attachments use).
    GpuTextureView,
    GpuTextureViewInner,
    wgpu::TextureView,
    "texture view"
);

gpu_handle!(
    /// Wrapper around a texture sampler.
    GpuSampler,
    GpuSamplerInner,
    wgpu::Sampler,
    "sampler"
);

gpu_handle!(
    /// Wrapper around a compiled shader module.
    GpuShaderModule,
    GpuShaderModuleInner,
    wgpu::ShaderModule,
    "shader module"
);

gpu_handle!(
    /// Wrapper around a render pipeline.
    GpuRenderPipeline,
    GpuRenderPipelineInner,
    wgpu::RenderPipeline,
    "render pipeline"
);

gpu_handle!(
    /// Wrapper around a bind group layout.
    GpuBindGroupLayout,
    GpuBindGroupLayoutInner,
    wgpu::BindGroupLayout,
    "bind group layout"
);

/// Wrapper around a GPU buffer that can be real or mock.
#[derive(Clone, Debug)]
pub struct GpuBuffer {
    id: GpuResourceId,
    size: u64,
    inner: GpuBufferInner,
}

#[derive(Clone, Debug)]
enum GpuBufferInner {
    Real(wgpu::Buffer),
    #[cfg(feature = "mock")]
    Mock,
}

impl GpuBuffer {
    /// Create from real WGPU buffer
    pub fn from_wgpu(id: GpuResourceId, buffer: wgpu::Buffer) -> Self {
        Self {
            id,
            size: buffer.size(),
            inner: GpuBufferInner::Real(buffer),
        }
    }

    /// Create mock buffer (for testing)
    #[cfg(feature = "mock")]
    pub fn mock(id: GpuResourceId, size: u64) -> Self {
        Self {
            id,
            size,
            inner: GpuBufferInner::Mock,
        }
    }

    pub fn id(&self) -> GpuResourceId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the underlying wgpu::Buffer (if real)
    ///
    /// # Panics
    /// Panics if this is a mock buffer (test code should never call this)
    pub fn as_wgpu(&self) -> &wgpu::Buffer {
        match &self.inner {
            GpuBufferInner::Real(buffer) => buffer,
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock => {
                panic!("Attempted to get wgpu::Buffer from mock buffer - this is a test-only buffer")
            }
        }
    }

    /// Check if this is a mock (useful in tests)
    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuBufferInner::Mock)
    }
}

impl PartialEq for GpuBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GpuBuffer {}

/// Wrapper around a GPU texture that can be real or mock.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    id: GpuResourceId,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    inner: GpuTextureInner,
}

#[derive(Clone, Debug)]
enum GpuTextureInner {
    Real(wgpu::Texture),
    #[cfg(feature = "mock")]
    Mock,
}

impl GpuTexture {
    /// Create from real WGPU texture
    pub fn from_wgpu(id: GpuResourceId, texture: wgpu::Texture) -> Self {
        Self {
            id,
            width: texture.width(),
            height: texture.height(),
            format: texture.format(),
            inner: GpuTextureInner::Real(texture),
        }
    }

    /// Create mock texture (for testing)
    #[cfg(feature = "mock")]
    pub fn mock(id: GpuResourceId, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
            inner: GpuTextureInner::Mock,
        }
    }

    pub fn id(&self) -> GpuResourceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Get the underlying wgpu::Texture (if real)
    ///
    /// # Panics
    /// Panics if this is a mock texture
    pub fn as_wgpu(&self) -> &wgpu::Texture {
        match &self.inner {
            GpuTextureInner::Real(texture) => texture,
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock => panic!("Attempted to get wgpu::Texture from mock texture"),
        }
    }

    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuTextureInner::Mock)
    }
}

/// Wrapper around a bind group.
///
/// Remembers the id of the layout it was created against so the encoder can
/// check it against the active pipeline.
#[derive(Clone, Debug)]
pub struct GpuBindGroup {
    id: GpuResourceId,
    layout: GpuResourceId,
    inner: GpuBindGroupInner,
}

#[derive(Clone, Debug)]
enum GpuBindGroupInner {
    Real(wgpu::BindGroup),
    #[cfg(feature = "mock")]
    Mock,
}

impl GpuBindGroup {
    pub fn from_wgpu(id: GpuResourceId, layout: GpuResourceId, group: wgpu::BindGroup) -> Self {
        Self {
            id,
            layout,
            inner: GpuBindGroupInner::Real(group),
        }
    }

    #[cfg(feature = "mock")]
    pub fn mock(id: GpuResourceId, layout: GpuResourceId) -> Self {
        Self {
            id,
            layout,
            inner: GpuBindGroupInner::Mock,
        }
    }

    pub fn id(&self) -> GpuResourceId {
        self.id
    }

    /// Id of the layout this group was created against.
    pub fn layout_id(&self) -> GpuResourceId {
        self.layout
    }

    /// # Panics
    /// Panics if this is a mock bind group.
    pub fn as_wgpu(&self) -> &wgpu::BindGroup {
        match &self.inner {
            GpuBindGroupInner::Real(group) => group,
            #[cfg(feature = "mock")]
            GpuBindGroupInner::Mock => panic!("Attempted to get wgpu::BindGroup from mock bind group"),
        }
    }

    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuBindGroupInner::Mock)
    }
}

impl PartialEq for GpuBindGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GpuBindGroup {}

/// A finished command buffer, ready for submission. Not cloneable.
#[derive(Debug)]
pub struct GpuCommandBuffer {
    inner: GpuCommandBufferInner,
}

#[derive(Debug)]
enum GpuCommandBufferInner {
    Real(wgpu::CommandBuffer),
    #[cfg(feature = "mock")]
    Mock { commands: usize },
}

impl GpuCommandBuffer {
    pub fn from_wgpu(buffer: wgpu::CommandBuffer) -> Self {
        Self {
            inner: GpuCommandBufferInner::Real(buffer),
        }
    }

    #[cfg(feature = "mock")]
    pub fn mock(commands: usize) -> Self {
        Self {
            inner: GpuCommandBufferInner::Mock { commands },
        }
    }

    /// Take the underlying wgpu command buffer.
    ///
    /// # Panics
    /// Panics if this is a mock command buffer.
    pub fn into_wgpu(self) -> wgpu::CommandBuffer {
        match self.inner {
            GpuCommandBufferInner::Real(buffer) => buffer,
            #[cfg(feature = "mock")]
            GpuCommandBufferInner::Mock { .. } => {
                panic!("Attempted to submit a mock command buffer to a real queue")
            }
        }
    }

    /// Number of commands recorded (mock only).
    #[cfg(feature = "mock")]
    pub fn mock_command_count(&self) -> Option<usize> {
        match self.inner {
            GpuCommandBufferInner::Mock { commands } => Some(commands),
            GpuCommandBufferInner::Real(_) => None,
        }
    }
}
