//! Error types for the draw-submission core.
//!
//! Two kinds of failure escape this crate:
//!
//! - [`RenderError::DeviceResource`]: the device refused to create a shader
//!   module, binding set or pipeline. The failed object is not cached, so the
//!   same request will try again next time.
//! - [`RenderError::Protocol`]: the caller broke an encoder or cache rule
//!   (drawing outside a pass, a binding set shaped for another layout). These
//!   are bugs and are logged at `error` level when raised.

use std::fmt;

use strata_test_utils::{DeviceError, GpuResourceId};

use crate::encoder::EncoderPhase;

/// Which kind of device object failed to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResourceKind {
    ShaderModule,
    BindingSet,
    Pipeline,
}

impl fmt::Display for DeviceResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShaderModule => write!(f, "shader module"),
            Self::BindingSet => write!(f, "binding set"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Misuse of the encoder state machine or of a cache contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A draw was issued while no render pass was open.
    DrawOutsidePass { phase: EncoderPhase },
    /// A state-set call was issued while no render pass was open.
    BindOutsidePass { phase: EncoderPhase, operation: &'static str },
    /// An encoder operation was called from a phase that does not allow it.
    InvalidTransition { from: EncoderPhase, operation: &'static str },
    /// A draw was issued before any pipeline was set.
    MissingPipeline,
    /// The bound binding set was created for another layout than the
    /// active pipeline expects at this group.
    BindingLayoutMismatch {
        group: u32,
        expected: Option<GpuResourceId>,
        found: GpuResourceId,
    },
    /// The active pipeline expects a binding set at this group but none is bound.
    MissingBindingSet { group: u32 },
    /// A resource does not fit the slot it was given.
    ResourceLayoutMismatch {
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// More resources were supplied than the layout has slots.
    ResourceCountMismatch { expected: usize, found: usize },
    /// A texture batch needs more slots than the binding layout provides.
    TooManyTextures { count: usize, max: usize },
    /// The shader reads an attribute the geometry does not provide.
    MissingVertexAttribute { name: String },
    /// The geometry lacks a buffer that its layout references.
    MissingVertexBuffer { index: usize },
    /// `get_pipeline` was given a global key never set through `set_global_state`.
    UnknownGlobalState { key: u32 },
    /// No global state has been set yet.
    NoGlobalState,
    /// A layout registry ran out of compact ids.
    LayoutRegistryFull { registry: &'static str },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DrawOutsidePass { phase } => {
                write!(f, "draw issued outside a render pass (encoder is {phase:?})")
            }
            Self::BindOutsidePass { phase, operation } => {
                write!(f, "{operation} called outside a render pass (encoder is {phase:?})")
            }
            Self::InvalidTransition { from, operation } => {
                write!(f, "{operation} is not valid while the encoder is {from:?}")
            }
            Self::MissingPipeline => write!(f, "draw issued before a pipeline was set"),
            Self::BindingLayoutMismatch {
                group,
                expected,
                found,
            } => match expected {
                Some(expected) => write!(
                    f,
                    "binding set at group {group} uses layout {found}, pipeline expects {expected}"
                ),
                None => write!(
                    f,
                    "binding set at group {group} uses layout {found}, pipeline has no such group"
                ),
            },
            Self::MissingBindingSet { group } => {
                write!(f, "pipeline expects a binding set at group {group}, none bound")
            }
            Self::ResourceLayoutMismatch {
                slot,
                expected,
                found,
            } => write!(f, "slot {slot} expects a {expected}, got a {found}"),
            Self::ResourceCountMismatch { expected, found } => {
                write!(f, "layout has {expected} slots, {found} resources supplied")
            }
            Self::TooManyTextures { count, max } => {
                write!(f, "texture batch has {count} textures, layout holds {max}")
            }
            Self::MissingVertexAttribute { name } => {
                write!(f, "shader attribute `{name}` is not provided by the geometry")
            }
            Self::MissingVertexBuffer { index } => {
                write!(f, "geometry has no vertex buffer at index {index}")
            }
            Self::UnknownGlobalState { key } => {
                write!(f, "global state key {key:#010x} was never set")
            }
            Self::NoGlobalState => write!(f, "no global state set"),
            Self::LayoutRegistryFull { registry } => {
                write!(f, "{registry} registry has no free ids")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors returned by the caches, encoder and renderer.
#[derive(Debug, Clone)]
pub enum RenderError {
    /// The device failed to create an object.
    DeviceResource {
        kind: DeviceResourceKind,
        /// The cache key that was being resolved.
        key: String,
        source: DeviceError,
    },
    /// Caller misuse.
    Protocol(ProtocolError),
}

impl RenderError {
    pub fn device(kind: DeviceResourceKind, key: impl fmt::Display, source: DeviceError) -> Self {
        Self::DeviceResource {
            kind,
            key: key.to_string(),
            source,
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::DeviceResource { .. } => None,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceResource { kind, key, source } => {
                write!(f, "failed to create {kind} for key {key}: {source}")
            }
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeviceResource { source, .. } => Some(source),
            Self::Protocol(err) => Some(err),
        }
    }
}

impl From<ProtocolError> for RenderError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// Log a protocol error and wrap it.
pub(crate) fn protocol(err: ProtocolError) -> RenderError {
    tracing::error!("{err}");
    RenderError::Protocol(err)
}

pub type RenderResult<T> = Result<T, RenderError>;
