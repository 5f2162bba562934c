//! Device samplers shared across texture sources.
//!
//! Texture sources carry their own sampler, and nearly all of them ask for
//! one of four configurations. [`SamplerCache`] creates each configuration
//! once per device and hands out clones afterwards.

use parking_lot::RwLock;
use strata_core::alloc::HashMap;
use strata_core::profiling::profile_function;
use strata_test_utils::{GpuSampler, RenderDevice};

/// Identity of a sampler configuration.
///
/// LOD clamps are stored as raw bits so the key can derive `Eq` and `Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub wrap: wgpu::AddressMode,
    pub filter: wgpu::FilterMode,
    pub lod_clamp: (u32, u32),
    pub anisotropy: u16,
}

impl SamplerKey {
    pub const fn new(wrap: wgpu::AddressMode, filter: wgpu::FilterMode) -> Self {
        Self {
            wrap,
            filter,
            lod_clamp: (0.0f32.to_bits(), f32::MAX.to_bits()),
            anisotropy: 1,
        }
    }

    pub const fn linear() -> Self {
        Self::new(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Linear)
    }

    pub const fn nearest() -> Self {
        Self::new(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Nearest)
    }

    pub const fn linear_repeat() -> Self {
        Self::new(wgpu::AddressMode::Repeat, wgpu::FilterMode::Linear)
    }

    pub const fn nearest_repeat() -> Self {
        Self::new(wgpu::AddressMode::Repeat, wgpu::FilterMode::Nearest)
    }

    /// The wgpu descriptor for this key. One address mode and one filter
    /// apply to every axis and every filtering stage.
    pub fn to_descriptor<'a>(&self, label: Option<&'a str>) -> wgpu::SamplerDescriptor<'a> {
        let (lod_min, lod_max) = self.lod_clamp;
        wgpu::SamplerDescriptor {
            label,
            address_mode_u: self.wrap,
            address_mode_v: self.wrap,
            address_mode_w: self.wrap,
            mag_filter: self.filter,
            min_filter: self.filter,
            mipmap_filter: self.filter,
            lod_min_clamp: f32::from_bits(lod_min),
            lod_max_clamp: f32::from_bits(lod_max),
            anisotropy_clamp: self.anisotropy,
            ..Default::default()
        }
    }
}

/// How a texture source is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageSampling {
    #[default]
    Linear,
    /// Pixel art and glyph atlases.
    Nearest,
    LinearRepeat,
    NearestRepeat,
}

impl ImageSampling {
    pub const fn to_sampler_key(self) -> SamplerKey {
        match self {
            Self::Linear => SamplerKey::linear(),
            Self::Nearest => SamplerKey::nearest(),
            Self::LinearRepeat => SamplerKey::linear_repeat(),
            Self::NearestRepeat => SamplerKey::nearest_repeat(),
        }
    }
}

impl From<ImageSampling> for SamplerKey {
    fn from(sampling: ImageSampling) -> Self {
        sampling.to_sampler_key()
    }
}

/// One sampler per [`SamplerKey`], safe to share between threads.
#[derive(Default)]
pub struct SamplerCache {
    samplers: RwLock<HashMap<SamplerKey, GpuSampler>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, device: &dyn RenderDevice, key: SamplerKey) -> GpuSampler {
        profile_function!();
        if let Some(sampler) = self.samplers.read().get(&key) {
            return sampler.clone();
        }

        // The read lock is released before the upgrade, so a racing caller
        // may already have filled the slot.
        self.samplers
            .write()
            .entry(key)
            .or_insert_with(|| {
                tracing::trace!("Creating sampler {key:?}");
                device.create_sampler(&key.to_descriptor(Some("strata sampler")))
            })
            .clone()
    }

    pub fn from_sampling(&self, device: &dyn RenderDevice, sampling: ImageSampling) -> GpuSampler {
        self.get_or_create(device, sampling.into())
    }

    pub fn len(&self) -> usize {
        self.samplers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.read().is_empty()
    }
}
