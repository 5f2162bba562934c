//! Vertex data descriptions handed to pipelines and the encoder.

use std::borrow::Cow;

use strata_test_utils::GpuBuffer;

use crate::state::Topology;

/// One logical vertex attribute and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryAttribute {
    pub name: Cow<'static, str>,
    /// Index into [`Geometry::buffers`].
    pub buffer: usize,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
}

/// The shape of a geometry, independent of its buffers.
///
/// Equal layouts share vertex-layout and pipeline cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GeometryLayout {
    attributes: Vec<GeometryAttribute>,
    index_format: Option<wgpu::IndexFormat>,
}

impl GeometryLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a per-vertex attribute.
    pub fn with_attribute(
        mut self,
        name: impl Into<Cow<'static, str>>,
        buffer: usize,
        format: wgpu::VertexFormat,
        offset: u64,
        stride: u64,
    ) -> Self {
        self.attributes.push(GeometryAttribute {
            name: name.into(),
            buffer,
            format,
            offset,
            stride,
            step_mode: wgpu::VertexStepMode::Vertex,
        });
        self
    }

    /// Add a per-instance attribute.
    pub fn with_instance_attribute(
        mut self,
        name: impl Into<Cow<'static, str>>,
        buffer: usize,
        format: wgpu::VertexFormat,
        offset: u64,
        stride: u64,
    ) -> Self {
        self.attributes.push(GeometryAttribute {
            name: name.into(),
            buffer,
            format,
            offset,
            stride,
            step_mode: wgpu::VertexStepMode::Instance,
        });
        self
    }

    pub fn with_index_format(mut self, format: wgpu::IndexFormat) -> Self {
        self.index_format = Some(format);
        self
    }

    pub fn attributes(&self) -> &[GeometryAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&GeometryAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn index_format(&self) -> Option<wgpu::IndexFormat> {
        self.index_format
    }

    /// Number of distinct buffers the attributes refer to.
    pub fn buffer_count(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| a.buffer + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Vertex and index buffers plus the layout that describes them.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub layout: GeometryLayout,
    pub buffers: Vec<GpuBuffer>,
    pub index_buffer: Option<GpuBuffer>,
    pub topology: Topology,
    /// Indices when indexed, vertices otherwise.
    pub element_count: u32,
}

impl Geometry {
    pub fn new(layout: GeometryLayout, buffers: Vec<GpuBuffer>, element_count: u32) -> Self {
        Self {
            layout,
            buffers,
            index_buffer: None,
            topology: Topology::TriangleList,
            element_count,
        }
    }

    pub fn with_index_buffer(mut self, buffer: GpuBuffer) -> Self {
        self.index_buffer = Some(buffer);
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }
}
