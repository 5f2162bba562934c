//! Shader programs and the binding layouts they declare.

use std::borrow::Cow;
use std::sync::Arc;

use strata_test_utils::{GpuBindGroupLayout, GpuResourceId, RenderDevice};

use crate::resource::{BindingKind, ResourceUid};

/// A vertex input the shader reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderAttribute {
    /// Matched against [`GeometryAttribute::name`](crate::geometry::GeometryAttribute).
    pub name: Cow<'static, str>,
    pub location: u32,
}

/// One slot of a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: BindingKind,
    pub visibility: wgpu::ShaderStages,
}

impl BindingSlot {
    pub fn new(binding: u32, kind: BindingKind, visibility: wgpu::ShaderStages) -> Self {
        Self {
            binding,
            kind,
            visibility,
        }
    }

    fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: self.visibility,
            ty,
            count: None,
        }
    }
}

/// The slots of one binding group and the device layout created for them.
#[derive(Debug)]
pub struct BindingLayout {
    slots: Vec<BindingSlot>,
    gpu: GpuBindGroupLayout,
}

impl BindingLayout {
    pub fn new(device: &dyn RenderDevice, label: &str, slots: Vec<BindingSlot>) -> Arc<Self> {
        let entries: Vec<_> = slots.iter().map(BindingSlot::layout_entry).collect();
        let gpu = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        Arc::new(Self { slots, gpu })
    }

    pub fn id(&self) -> GpuResourceId {
        self.gpu.id()
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn gpu(&self) -> &GpuBindGroupLayout {
        &self.gpu
    }
}

/// A WGSL program with its vertex inputs and binding groups.
///
/// The source text is the shader-module cache key, so two shaders built from
/// the same source compile once.
#[derive(Debug)]
pub struct Shader {
    uid: ResourceUid,
    label: String,
    source: Arc<str>,
    vertex_entry: Cow<'static, str>,
    fragment_entry: Cow<'static, str>,
    attributes: Vec<ShaderAttribute>,
    groups: Vec<Arc<BindingLayout>>,
}

impl Shader {
    pub fn new(label: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self {
            uid: ResourceUid::next(),
            label: label.into(),
            source: source.into(),
            vertex_entry: Cow::Borrowed("vs_main"),
            fragment_entry: Cow::Borrowed("fs_main"),
            attributes: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_entry_points(
        mut self,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.vertex_entry = vertex.into();
        self.fragment_entry = fragment.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<Cow<'static, str>>, location: u32) -> Self {
        self.attributes.push(ShaderAttribute {
            name: name.into(),
            location,
        });
        self
    }

    /// Append the layout for the next group index.
    pub fn with_group(mut self, layout: Arc<BindingLayout>) -> Self {
        self.groups.push(layout);
        self
    }

    pub fn uid(&self) -> ResourceUid {
        self.uid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    pub fn vertex_entry(&self) -> &str {
        &self.vertex_entry
    }

    pub fn fragment_entry(&self) -> &str {
        &self.fragment_entry
    }

    pub fn attributes(&self) -> &[ShaderAttribute] {
        &self.attributes
    }

    pub fn groups(&self) -> &[Arc<BindingLayout>] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test_utils::MockRenderDevice;

    #[test]
    fn test_binding_layout_creates_device_layout() {
        let device = MockRenderDevice::new();
        let layout = BindingLayout::new(
            &device,
            "globals",
            vec![BindingSlot::new(
                0,
                BindingKind::UniformBuffer,
                wgpu::ShaderStages::VERTEX,
            )],
        );
        assert_eq!(layout.slots().len(), 1);
        assert!(device.calls().iter().any(|call| matches!(
            call,
            strata_test_utils::RenderCall::CreateBindGroupLayout { id, .. } if *id == layout.id()
        )));
    }

    #[test]
    fn test_shaders_get_distinct_uids() {
        let a = Shader::new("a", "@vertex fn vs_main() {}");
        let b = Shader::new("b", "@vertex fn vs_main() {}");
        assert_ne!(a.uid(), b.uid());
        assert_eq!(a.source(), b.source());
        assert_eq!(a.vertex_entry(), "vs_main");
    }
}
