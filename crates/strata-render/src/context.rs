//! Bringing up a wgpu device for the renderer.

use std::fmt;
use std::sync::Arc;

use strata_test_utils::GpuIdAllocator;

/// Failure to bring up a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    NoAdapter(String),
    DeviceCreation(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter(reason) => write!(f, "no suitable GPU adapter: {reason}"),
            Self::DeviceCreation(reason) => write!(f, "failed to create device: {reason}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// A headless wgpu device and queue implementing
/// [`RenderDevice`](strata_test_utils::RenderDevice).
///
/// Contexts are handed out as `Arc<Self>`, which coerces to the
/// `Arc<dyn RenderDevice>` a [`Renderer`](crate::Renderer) takes:
///
/// ```rust,no_run
/// use strata_render::{GraphicsContext, Renderer, RendererConfig};
///
/// let ctx = GraphicsContext::new_owned_sync().expect("no GPU");
/// let renderer = Renderer::new(ctx.clone(), RendererConfig::default());
/// ```
pub struct GraphicsContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub(crate) ids: GpuIdAllocator,
}

impl GraphicsContext {
    pub async fn new_owned() -> Result<Arc<Self>, GraphicsError> {
        Self::new_owned_with_descriptor(GraphicsContextDescriptor::default()).await
    }

    /// Blocks the current thread until the context is created.
    pub fn new_owned_sync() -> Result<Arc<Self>, GraphicsError> {
        pollster::block_on(Self::new_owned())
    }

    pub async fn new_owned_with_descriptor(
        descriptor: GraphicsContextDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: descriptor.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: descriptor.power_preference,
                compatible_surface: None,
                force_fallback_adapter: descriptor.force_fallback_adapter,
            })
            .await
            .map_err(|e| GraphicsError::NoAdapter(e.to_string()))?;

        let info = adapter.get_info();
        tracing::debug!("Selected adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: descriptor.label,
                required_limits: descriptor.limits,
                ..Default::default()
            })
            .await
            .map_err(|e| GraphicsError::DeviceCreation(e.to_string()))?;

        tracing::info!("Created graphics context on {}", info.name);

        Ok(Arc::new(Self {
            instance,
            adapter,
            device,
            queue,
            ids: GpuIdAllocator::new(),
        }))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Process completed work without blocking, resolving finished
    /// [`SubmitFuture`](strata_test_utils::SubmitFuture)s.
    pub fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            tracing::warn!("Device poll failed: {e}");
        }
    }
}

/// Options for [`GraphicsContext::new_owned_with_descriptor`].
pub struct GraphicsContextDescriptor {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Use a software adapter if one is available.
    pub force_fallback_adapter: bool,
    /// Limits requested from the device. Batch size is bounded by
    /// `max_sampled_textures_per_shader_stage`.
    pub limits: wgpu::Limits,
    pub label: Option<&'static str>,
}

impl Default for GraphicsContextDescriptor {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            limits: wgpu::Limits::default(),
            label: Some("strata device"),
        }
    }
}

impl GraphicsContextDescriptor {
    /// Prefer the low-power adapter and fall back to software rendering,
    /// for headless runs on CI machines.
    pub fn headless() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: true,
            limits: wgpu::Limits::downlevel_defaults(),
            ..Self::default()
        }
    }

    pub fn with_backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }
}
