//! Batched draw submission for wgpu.
//!
//! Elements go into a [`Batcher`], which cuts them into [`Batch`]es by
//! texture slots, blend mode and topology. A [`Renderer`] resolves each batch
//! against its [`PipelineCache`] and [`ResourceBindingCache`] and records it
//! through a [`StateTrackingEncoder`], which drops redundant state changes.
//!
//! Everything talks to the GPU through
//! [`RenderDevice`](strata_test_utils::RenderDevice): [`GraphicsContext`] for
//! a real device, `MockRenderDevice` in tests.
//!
//! [`Renderer::render_end`] returns a [`SubmitFuture`]. On a [`GraphicsContext`]
//! awaiting it polls the device until the frame's submission has finished.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_render::*;
//!
//! # fn frame(ctx: Arc<GraphicsContext>, target: RenderTarget, texture: TextureSource) -> RenderResult<()> {
//! let mut renderer = Renderer::new(ctx, RendererConfig::default());
//! let mut batcher = renderer.create_batcher();
//! batcher.add(DrawableElement::textured(
//!     Arc::new(ElementMesh::quad(0.0, 0.0, 32.0, 32.0)),
//!     texture,
//! ));
//!
//! renderer.render_start(&target)?;
//! renderer.render_batches(&batcher.break_into_batches())?;
//! pollster::block_on(renderer.render_end()?);
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod binding_cache;
pub mod blend;
pub mod context;
mod context_impl;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod pipeline_cache;
pub mod renderer;
pub mod resource;
pub mod sampler_cache;
pub mod shader;
pub mod state;

pub use batcher::*;
pub use binding_cache::*;
pub use blend::*;
pub use context::*;
pub use context_impl::WgpuCommandRecorder;
pub use encoder::*;
pub use error::*;
pub use executor::*;
pub use geometry::*;
pub use pipeline_cache::*;
pub use renderer::*;
pub use resource::*;
pub use sampler_cache::*;
pub use shader::*;
pub use state::*;

// Re-export the device seam so users need only this crate.
pub use strata_test_utils::{
    DeviceError, DeviceLimits, GpuBindGroup, GpuBuffer, GpuResourceId, GpuSampler, GpuTexture,
    GpuTextureView, RenderDevice, SubmitFuture,
};
pub use wgpu;
