//! Blend modes used by batches and pipelines.
//!
//! Each mode has a small stable index so it can be packed into a
//! [`GraphicsStateKey`](crate::state::GraphicsStateKey).

/// Predefined blend modes.
///
/// Two adjacent elements with different blend modes can never share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BlendMode {
    /// No blending - source completely replaces destination.
    Replace = 0,

    /// Standard alpha blending for straight-alpha content.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb * (1 - src.a)`
    #[default]
    Alpha = 1,

    /// Premultiplied alpha blending.
    ///
    /// Formula: `src.rgb + dst.rgb * (1 - src.a)`
    PremultipliedAlpha = 2,

    /// Additive blending.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb`
    Additive = 3,

    /// Multiplicative blending.
    ///
    /// Formula: `src.rgb * dst.rgb`
    Multiply = 4,

    /// Screen blending.
    ///
    /// Formula: `src.rgb + dst.rgb * (1 - src.rgb)`
    Screen = 5,

    /// Erase the destination where the source is opaque.
    ///
    /// Formula: `dst * (1 - src.a)`
    Erase = 6,

    /// Component-wise minimum.
    Min = 7,

    /// Component-wise maximum.
    Max = 8,
}

impl BlendMode {
    /// Number of modes; indices are `0..COUNT`.
    pub const COUNT: u8 = 9;

    pub const ALL: [BlendMode; Self::COUNT as usize] = [
        BlendMode::Replace,
        BlendMode::Alpha,
        BlendMode::PremultipliedAlpha,
        BlendMode::Additive,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Erase,
        BlendMode::Min,
        BlendMode::Max,
    ];

    /// Stable index packed into pipeline keys. Always below 32.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Convert to wgpu BlendState.
    pub fn to_blend_state(self) -> Option<wgpu::BlendState> {
        use wgpu::BlendFactor as F;
        use wgpu::BlendOperation as Op;

        let component = |src_factor, dst_factor, operation| wgpu::BlendComponent {
            src_factor,
            dst_factor,
            operation,
        };

        match self {
            BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::PremultipliedAlpha => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: component(F::SrcAlpha, F::One, Op::Add),
                alpha: component(F::One, F::One, Op::Add),
            }),
            BlendMode::Multiply => Some(wgpu::BlendState {
                color: component(F::Dst, F::OneMinusSrcAlpha, Op::Add),
                alpha: component(F::One, F::OneMinusSrcAlpha, Op::Add),
            }),
            BlendMode::Screen => Some(wgpu::BlendState {
                color: component(F::One, F::OneMinusSrc, Op::Add),
                alpha: component(F::One, F::OneMinusSrcAlpha, Op::Add),
            }),
            BlendMode::Erase => Some(wgpu::BlendState {
                color: component(F::Zero, F::OneMinusSrcAlpha, Op::Add),
                alpha: component(F::Zero, F::OneMinusSrcAlpha, Op::Add),
            }),
            BlendMode::Min => Some(wgpu::BlendState {
                color: component(F::One, F::One, Op::Min),
                alpha: component(F::One, F::One, Op::Min),
            }),
            BlendMode::Max => Some(wgpu::BlendState {
                color: component(F::One, F::One, Op::Max),
                alpha: component(F::One, F::One, Op::Max),
            }),
        }
    }

    /// Create a color target state with this blend mode.
    pub fn to_color_target_state(
        self,
        format: wgpu::TextureFormat,
        write_mask: wgpu::ColorWrites,
    ) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format,
            blend: self.to_blend_state(),
            write_mask,
        }
    }
}

impl From<BlendMode> for Option<wgpu::BlendState> {
    fn from(mode: BlendMode) -> Self {
        mode.to_blend_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_unique_and_fit_five_bits() {
        for (i, mode) in BlendMode::ALL.iter().enumerate() {
            assert_eq!(mode.index() as usize, i);
            assert!(mode.index() < 32);
        }
    }

    #[test]
    fn test_replace_is_replace_state() {
        assert_eq!(
            BlendMode::Replace.to_blend_state(),
            Some(wgpu::BlendState::REPLACE)
        );
    }

    #[test]
    fn test_color_target_keeps_mask() {
        let target = BlendMode::Additive
            .to_color_target_state(wgpu::TextureFormat::Bgra8Unorm, wgpu::ColorWrites::RED);
        assert_eq!(target.write_mask, wgpu::ColorWrites::RED);
        assert!(target.blend.is_some());
    }
}
