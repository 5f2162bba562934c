//! Device abstraction and test utilities for Strata.
//!
//! This crate provides the seam between the draw-submission core and the GPU:
//!
//! - [`RenderDevice`] - trait abstracting resource creation and submission
//! - [`CommandRecorder`] - trait abstracting command recording for one frame
//! - GPU wrapper types (`GpuBuffer`, `GpuBindGroup`, ...) - real or mock,
//!   each carrying a device-assigned [`GpuResourceId`]
//! - [`SubmitFuture`] - resolves once submitted work has completed
//! - `MockRenderDevice` - records every call for assertions (requires `mock`)
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use strata_test_utils::{MockRenderDevice, RenderDevice};
//!
//! let mock = MockRenderDevice::new();
//! let buffer = mock.create_buffer(&wgpu::BufferDescriptor {
//!     label: Some("test_buffer"),
//!     size: 1024,
//!     usage: wgpu::BufferUsages::VERTEX,
//!     mapped_at_creation: false,
//! });
//!
//! assert_eq!(mock.count_buffer_creates(), 1);
//! assert!(buffer.is_mock());
//! # }
//! ```
//!
//! # Design
//!
//! All GPU wrapper types are owned and cheap to clone, so no lifetime
//! parameters leak into the caches that hold them. Identity comparisons go
//! through [`GpuResourceId`], never through pointer equality of the
//! underlying objects.

pub mod error;
pub mod gpu_types;
#[cfg(feature = "mock")]
pub mod mock_render;
pub mod render_device;
pub mod submit;

pub use error::*;
pub use gpu_types::*;
#[cfg(feature = "mock")]
pub use mock_render::*;
pub use render_device::*;
pub use submit::*;
