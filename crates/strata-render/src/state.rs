//! Render state and the two packed pipeline keys.
//!
//! Pipelines are looked up with two integers: a [`GraphicsStateKey`] that
//! changes per draw and a [`GlobalStateKey`] that changes only when the
//! render target or masking setup changes.

use std::fmt;

use bitflags::bitflags;

use crate::blend::BlendMode;

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Topology {
    PointList = 0,
    LineList = 1,
    LineStrip = 2,
    #[default]
    TriangleList = 3,
    TriangleStrip = 4,
}

impl Topology {
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Strips cannot be concatenated into one draw.
    pub fn is_strip(self) -> bool {
        matches!(self, Topology::LineStrip | Topology::TriangleStrip)
    }

    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::PointList => wgpu::PrimitiveTopology::PointList,
            Topology::LineList => wgpu::PrimitiveTopology::LineList,
            Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

bitflags! {
    /// Per-draw fixed-function flags packed into the graphics key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderState: u8 {
        const DEPTH_TEST = 1 << 0;
        const DEPTH_WRITE = 1 << 1;
        const CULL_BACK = 1 << 2;
        const CLOCKWISE = 1 << 3;
    }
}

impl RenderState {
    pub fn primitive_state(
        self,
        topology: Topology,
        strip_index_format: Option<wgpu::IndexFormat>,
    ) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: topology.to_wgpu(),
            strip_index_format: if topology.is_strip() {
                strip_index_format
            } else {
                None
            },
            front_face: if self.contains(RenderState::CLOCKWISE) {
                wgpu::FrontFace::Cw
            } else {
                wgpu::FrontFace::Ccw
            },
            cull_mode: self
                .contains(RenderState::CULL_BACK)
                .then_some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }

    pub fn depth_compare(self) -> wgpu::CompareFunction {
        if self.contains(RenderState::DEPTH_TEST) {
            wgpu::CompareFunction::LessEqual
        } else {
            wgpu::CompareFunction::Always
        }
    }
}

/// Stencil configuration used for masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StencilMode {
    /// No stencil test configured.
    #[default]
    None = 0,
    /// Stencil attachment present but ignored.
    Disabled = 1,
    /// Drawing a mask: increment where the reference matches.
    RenderingMaskAdd = 2,
    /// Removing a mask: decrement where the reference matches.
    RenderingMaskRemove = 3,
    /// Only draw inside the mask.
    MaskActive = 4,
    /// Only draw outside the mask.
    InverseMaskActive = 5,
}

impl StencilMode {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn stencil_state(self) -> wgpu::StencilState {
        let face = |compare, pass_op| wgpu::StencilFaceState {
            compare,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op,
        };
        let (compare, pass_op) = match self {
            StencilMode::None => return wgpu::StencilState::default(),
            StencilMode::Disabled => (
                wgpu::CompareFunction::Always,
                wgpu::StencilOperation::Keep,
            ),
            StencilMode::RenderingMaskAdd => (
                wgpu::CompareFunction::Equal,
                wgpu::StencilOperation::IncrementClamp,
            ),
            StencilMode::RenderingMaskRemove => (
                wgpu::CompareFunction::Equal,
                wgpu::StencilOperation::DecrementClamp,
            ),
            StencilMode::MaskActive => (
                wgpu::CompareFunction::Equal,
                wgpu::StencilOperation::Keep,
            ),
            StencilMode::InverseMaskActive => (
                wgpu::CompareFunction::NotEqual,
                wgpu::StencilOperation::Keep,
            ),
        };
        wgpu::StencilState {
            front: face(compare, pass_op),
            back: face(compare, pass_op),
            read_mask: 0xff,
            write_mask: 0xff,
        }
    }
}

/// Render-target level state shared by every draw in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRenderState {
    pub color_format: wgpu::TextureFormat,
    pub color_target_count: u8,
    pub sample_count: u32,
    pub depth_stencil_format: Option<wgpu::TextureFormat>,
    pub stencil_mode: StencilMode,
    pub color_mask: wgpu::ColorWrites,
}

impl GlobalRenderState {
    pub fn new(color_format: wgpu::TextureFormat) -> Self {
        Self {
            color_format,
            color_target_count: 1,
            sample_count: 1,
            depth_stencil_format: None,
            stencil_mode: StencilMode::None,
            color_mask: wgpu::ColorWrites::ALL,
        }
    }

    pub fn depth_stencil_state(&self, state: RenderState) -> Option<wgpu::DepthStencilState> {
        self.depth_stencil_format
            .map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: format.has_depth_aspect()
                    && state.contains(RenderState::DEPTH_WRITE),
                depth_compare: if format.has_depth_aspect() {
                    state.depth_compare()
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: if format.has_stencil_aspect() {
                    self.stencil_mode.stencil_state()
                } else {
                    wgpu::StencilState::default()
                },
                bias: wgpu::DepthBiasState::default(),
            })
    }

    pub fn multisample_state(&self) -> wgpu::MultisampleState {
        wgpu::MultisampleState {
            count: self.sample_count,
            mask: !0,
            alpha_to_coverage_enabled: false,
        }
    }
}

/// Packed key of per-draw pipeline state.
///
/// Layout: `geometry_layout:16 << 32 | shader_layout:16 << 16 | state:8 << 8 | blend:5 << 3 | topology:3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphicsStateKey(u64);

impl GraphicsStateKey {
    pub fn pack(
        geometry_layout: u16,
        shader_layout: u16,
        state: RenderState,
        blend: BlendMode,
        topology: Topology,
    ) -> Self {
        Self(
            (geometry_layout as u64) << 32
                | (shader_layout as u64) << 16
                | (state.bits() as u64) << 8
                | ((blend.index() & 0x1f) as u64) << 3
                | (topology.index() & 0x7) as u64,
        )
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn geometry_layout(self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub fn shader_layout(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for GraphicsStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014x}", self.0)
    }
}

/// Packed key of render-target level state.
///
/// Layout: `format_id:8 << 20 | sample_count_log2:3 << 17 | color_targets:4 << 13 |
/// depth_stencil_format_id:5 << 8 | stencil_mode:4 << 4 | color_mask:4`.
/// A zero depth-stencil format id means no depth-stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalStateKey(u32);

impl GlobalStateKey {
    /// Pack a key from compact format ids handed out by the pipeline cache.
    pub fn pack(format_id: u8, depth_stencil_format_id: u8, state: &GlobalRenderState) -> Self {
        let samples_log2 = state.sample_count.max(1).trailing_zeros();
        Self(
            (format_id as u32) << 20
                | (samples_log2 & 0x7) << 17
                | (state.color_target_count as u32 & 0xf) << 13
                | (depth_stencil_format_id as u32 & 0x1f) << 8
                | (state.stencil_mode.index() as u32 & 0xf) << 4
                | state.color_mask.bits() & 0xf,
        )
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn has_depth_stencil(self) -> bool {
        (self.0 >> 8) & 0x1f != 0
    }
}

impl fmt::Display for GlobalStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#09x}", self.0)
    }
}
