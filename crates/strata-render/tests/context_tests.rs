//! Graphics context lifecycle and real-device rendering tests.

use std::sync::Arc;

use strata_render::wgpu;
use strata_render::*;

#[test]
#[ignore] // Requires GPU - run with: cargo test --test context_tests -- --ignored
fn test_context_creation_sync() {
    match GraphicsContext::new_owned_sync() {
        Ok(ctx) => {
            assert_eq!(Arc::strong_count(&ctx), 1);
            assert!(ctx.limits().max_texture_dimension_2d > 0);
            assert!(RenderDevice::limits(ctx.as_ref()).max_bind_groups >= 2);
        }
        Err(e) => {
            // Allow test to pass if no GPU (CI environments)
            println!("GPU not available: {e}");
        }
    }
}

#[test]
#[ignore] // Requires GPU
fn test_context_arc_cloning() {
    if let Ok(ctx) = GraphicsContext::new_owned_sync() {
        let ctx2 = ctx.clone();
        assert_eq!(Arc::strong_count(&ctx), 2);
        assert_eq!(
            ctx.limits().max_texture_dimension_2d,
            ctx2.limits().max_texture_dimension_2d
        );

        drop(ctx2);
        assert_eq!(Arc::strong_count(&ctx), 1);
    }
}

#[test]
#[ignore] // Requires GPU
fn test_context_cleanup() {
    if let Ok(ctx) = GraphicsContext::new_owned_sync() {
        let weak = Arc::downgrade(&ctx);
        assert!(weak.upgrade().is_some());

        drop(ctx);
        assert!(weak.upgrade().is_none());
    }
}

#[test]
#[ignore] // Requires GPU
fn test_headless_descriptor() {
    let descriptor = GraphicsContextDescriptor::headless().with_backends(wgpu::Backends::PRIMARY);
    let Ok(ctx) = pollster::block_on(GraphicsContext::new_owned_with_descriptor(descriptor)) else {
        return;
    };
    assert!(RenderDevice::limits(ctx.as_ref()).max_sampled_textures_per_shader_stage >= 1);
    ctx.poll();
}

#[test]
#[ignore] // Requires GPU
fn test_offscreen_frame() {
    let Ok(ctx) = GraphicsContext::new_owned_sync() else {
        return;
    };
    let device: Arc<dyn RenderDevice> = ctx.clone();

    let format = wgpu::TextureFormat::Rgba8Unorm;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen"),
        size: wgpu::Extent3d {
            width: 64,
            height: 64,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let sprite = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("sprite"),
        size: wgpu::Extent3d {
            width: 2,
            height: 2,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    device.write_texture(&sprite, &[255; 16], 8);

    let mut renderer = Renderer::new(device.clone(), RendererConfig::default());
    let target = RenderTarget::new(device.create_texture_view(&texture), format)
        .with_clear_color(wgpu::Color::BLACK);
    let source = renderer.texture_source(device.create_texture_view(&sprite), ImageSampling::Nearest);

    let mut batcher = renderer.create_batcher();
    for i in 0..8 {
        batcher.add(DrawableElement::textured(
            Arc::new(ElementMesh::quad(i as f32 * 4.0, 0.0, 4.0, 4.0)),
            source.clone(),
        ));
    }
    let batches = batcher.break_into_batches();

    renderer.set_projection(glam::Mat4::orthographic_rh(0.0, 64.0, 64.0, 0.0, -1.0, 1.0));
    renderer.render_start(&target).unwrap();
    renderer.render_batches(&batches).unwrap();
    let done = renderer.render_end().unwrap();

    pollster::block_on(done.clone());
    assert!(done.is_complete());
    assert_eq!(renderer.encoder_stats().draw_calls, 1);
}

#[test]
#[ignore] // Requires GPU
fn test_invalid_shader_is_reported() {
    let Ok(ctx) = GraphicsContext::new_owned_sync() else {
        return;
    };
    let result = ctx.create_shader_module(&wgpu::ShaderModuleDescriptor {
        label: Some("broken"),
        source: wgpu::ShaderSource::Wgsl("fn main( {".into()),
    });
    assert!(matches!(result, Err(DeviceError::Validation(_))));
}

#[test]
fn test_graphics_error_display() {
    let err = GraphicsError::NoAdapter("no backends enabled".into());
    let display = err.to_string();
    assert!(display.contains("adapter"));
    assert!(display.contains("no backends enabled"));

    let err = GraphicsError::DeviceCreation("limits exceeded".into());
    assert!(format!("{err:?}").contains("DeviceCreation"));
}
