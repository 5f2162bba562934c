//! Whole frames through `Renderer` against the mock device.

use std::sync::Arc;

use strata_render::wgpu;
use strata_render::*;
use strata_test_utils::{GpuResourceId, GpuTextureView, MockRenderDevice, RenderCall};

const CUSTOM_WGSL: &str = "
@group(0) @binding(0) var<uniform> tint: vec4<f32>;
@vertex fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
@fragment fn fs_main() -> @location(0) vec4<f32> { return tint; }
";

fn setup() -> (Arc<MockRenderDevice>, Renderer, RenderTarget) {
    strata_core::logging::try_init();
    let device = Arc::new(MockRenderDevice::new());
    let renderer = Renderer::new(device.clone(), RendererConfig::default().max_textures(4));
    let target = RenderTarget::new(
        GpuTextureView::mock(GpuResourceId::new(70_000)),
        wgpu::TextureFormat::Bgra8Unorm,
    )
    .with_clear_color(wgpu::Color::TRANSPARENT);
    (device, renderer, target)
}

fn texture(renderer: &Renderer, view: u64) -> TextureSource {
    renderer.texture_source(
        GpuTextureView::mock(GpuResourceId::new(71_000 + view)),
        ImageSampling::Linear,
    )
}

fn quad(texture: &TextureSource) -> DrawableElement {
    DrawableElement::textured(
        Arc::new(ElementMesh::quad(0.0, 0.0, 16.0, 16.0)),
        texture.clone(),
    )
}

fn batches(elements: impl IntoIterator<Item = DrawableElement>, renderer: &Renderer) -> Vec<Batch> {
    let mut batcher = renderer.create_batcher();
    for element in elements {
        batcher.add(element);
    }
    batcher.break_into_batches()
}

fn custom_draw(device: &MockRenderDevice) -> Arc<CustomDraw> {
    let positions = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("triangle"),
        size: 24,
        usage: wgpu::BufferUsages::VERTEX,
        mapped_at_creation: false,
    });
    let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tint"),
        size: 16,
        usage: wgpu::BufferUsages::UNIFORM,
        mapped_at_creation: false,
    });
    let layout = BindingLayout::new(
        device,
        "tint",
        vec![BindingSlot::new(
            0,
            BindingKind::UniformBuffer,
            wgpu::ShaderStages::FRAGMENT,
        )],
    );
    let set = BindingSet::new(
        Arc::clone(&layout),
        vec![BindingResource::UniformBuffer(BufferResource::new(uniforms))],
    );
    let shader = Shader::new("tinted", CUSTOM_WGSL)
        .with_attribute("position", 0)
        .with_group(layout);
    let geometry = Geometry::new(
        GeometryLayout::new().with_attribute("position", 0, wgpu::VertexFormat::Float32x2, 0, 8),
        vec![positions],
        3,
    );
    Arc::new(CustomDraw::new(Arc::new(shader), Arc::new(geometry), vec![set]))
}

fn draws(device: &MockRenderDevice) -> Vec<RenderCall> {
    device
        .commands()
        .into_iter()
        .filter(|call| matches!(call, RenderCall::Draw { .. } | RenderCall::DrawIndexed { .. }))
        .collect()
}

#[test]
fn test_custom_draw_between_batches() {
    let (device, mut renderer, target) = setup();
    let texture = texture(&renderer, 1);
    let mut batches = batches(
        [
            quad(&texture),
            DrawableElement::custom(custom_draw(&device)),
            quad(&texture),
        ],
        &renderer,
    );
    assert_eq!(batches.len(), 3);

    renderer.render_start(&target).unwrap();
    renderer.resolve_batches(&mut batches).unwrap();
    assert!(batches.iter().all(Batch::is_resolved));
    device.clear_calls();
    renderer.render_batches(&batches).unwrap();
    pollster::block_on(renderer.render_end().unwrap());

    assert_eq!(
        draws(&device),
        vec![
            RenderCall::DrawIndexed {
                indices: 0..6,
                base_vertex: 0,
                instances: 0..1,
            },
            RenderCall::Draw {
                vertices: 0..3,
                instances: 0..1,
            },
            RenderCall::DrawIndexed {
                indices: 6..12,
                base_vertex: 0,
                instances: 0..1,
            },
        ]
    );
    assert_eq!(device.count_set_pipeline(), 3);
    // Globals, textures, tint, then globals again. The texture set at
    // group 1 survives the custom draw.
    assert_eq!(device.count_set_bind_group(), 4);
    assert_eq!(device.count_set_vertex_buffer(), 3);
}

#[test]
fn test_second_frame_hits_every_cache() {
    let (device, mut renderer, target) = setup();
    let textures = [texture(&renderer, 1), texture(&renderer, 2)];
    let frame = |renderer: &mut Renderer| {
        let batches = batches(textures.iter().map(quad), renderer);
        renderer.render_start(&target).unwrap();
        renderer.render_batches(&batches).unwrap();
        pollster::block_on(renderer.render_end().unwrap());
    };

    frame(&mut renderer);
    let pipelines = device.count_render_pipeline_creates();
    let groups = device.count_bind_group_creates();
    let writes = device.count_buffer_writes();
    assert_eq!(pipelines, 1);

    frame(&mut renderer);
    assert_eq!(device.count_render_pipeline_creates(), pipelines);
    assert_eq!(device.count_bind_group_creates(), groups);
    // Vertices and indices are uploaded again each frame.
    assert_eq!(device.count_buffer_writes(), writes + 2);
    assert_eq!(device.count_submits(), 2);
    assert_eq!(renderer.tick(), 2);
    assert_eq!(renderer.encoder_stats().passes, 1);
    assert!(renderer.binding_stats().hits >= 2);
}

#[test]
fn test_interrupted_pass_resumes_without_clearing() {
    let (device, mut renderer, target) = setup();
    let texture = texture(&renderer, 1);

    renderer.render_start(&target).unwrap();
    renderer.render_batches(&batches([quad(&texture)], &renderer)).unwrap();
    device.clear_calls();

    renderer
        .encoder_mut()
        .interrupt_render_pass(|recorder| recorder.insert_debug_marker("copy_pass"))
        .unwrap();
    renderer.render_batches(&batches([quad(&texture)], &renderer)).unwrap();
    pollster::block_on(renderer.render_end().unwrap());

    let commands = device.commands();
    assert_eq!(commands[0], RenderCall::EndRenderPass);
    assert_eq!(
        commands[1],
        RenderCall::DebugMarker {
            label: "copy_pass".into()
        }
    );
    assert!(matches!(
        commands[2],
        RenderCall::BeginRenderPass { clears: false, .. }
    ));
    // Only the replay binds; the second batch finds everything in place.
    assert_eq!(device.count_set_pipeline(), 1);
    assert_eq!(device.count_set_bind_group(), 2);
    assert_eq!(
        draws(&device),
        vec![RenderCall::DrawIndexed {
            indices: 6..12,
            base_vertex: 4,
            instances: 0..1,
        }]
    );
    assert_eq!(renderer.encoder_stats().passes, 2);
}

#[test]
fn test_stencil_mode_reaches_pipeline_state() {
    let (device, mut renderer, target) = setup();
    let target = target.with_depth_stencil(DepthStencilTarget {
        view: GpuTextureView::mock(GpuResourceId::new(70_001)),
        format: wgpu::TextureFormat::Stencil8,
        clear_depth: None,
        clear_stencil: Some(0),
    });
    let texture = texture(&renderer, 1);

    renderer.set_stencil_mode(StencilMode::MaskActive).unwrap();
    renderer.render_start(&target).unwrap();
    assert!(renderer.pipelines().global_key().unwrap().has_depth_stencil());
    assert_eq!(
        renderer.pipelines().global_state().unwrap().stencil_mode,
        StencilMode::MaskActive
    );

    assert!(renderer.set_stencil_reference(1).unwrap());
    assert!(!renderer.set_stencil_reference(1).unwrap());
    renderer.render_batches(&batches([quad(&texture)], &renderer)).unwrap();
    pollster::block_on(renderer.render_end().unwrap());

    assert!(device.commands().contains(&RenderCall::SetStencilReference { reference: 1 }));
    assert_eq!(device.count_draws(), 1);
}

#[test]
fn test_stencil_change_after_resolve_rebuilds_pipeline() {
    let (device, mut renderer, target) = setup();
    let target = target.with_depth_stencil(DepthStencilTarget {
        view: GpuTextureView::mock(GpuResourceId::new(70_002)),
        format: wgpu::TextureFormat::Stencil8,
        clear_depth: None,
        clear_stencil: Some(0),
    });
    let texture = texture(&renderer, 1);
    let mut batches = batches([quad(&texture)], &renderer);

    renderer.render_start(&target).unwrap();
    renderer.resolve_batches(&mut batches).unwrap();
    let unmasked = batches[0].pipeline.as_ref().unwrap().id();
    renderer.set_stencil_mode(StencilMode::MaskActive).unwrap();
    assert!(batches[0].pipeline_for(renderer.pipelines().global_key()).is_none());

    device.clear_calls();
    renderer.render_batches(&batches).unwrap();
    pollster::block_on(renderer.render_end().unwrap());

    let stats = renderer.pipeline_stats();
    assert_eq!(stats.tiers, 2);
    assert_eq!(stats.pipelines_created, 2);
    let bound: Vec<GpuResourceId> = device
        .commands()
        .into_iter()
        .filter_map(|call| match call {
            RenderCall::SetPipeline { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(bound.len(), 1);
    assert_ne!(bound[0], unmasked);
}

#[test]
fn test_direct_draw_without_batcher() {
    let (device, mut renderer, target) = setup();
    let draw = custom_draw(&device);

    renderer.render_start(&target).unwrap();
    let request = DrawRequest::from_custom(&draw, BlendMode::Replace);
    renderer.draw(&request).unwrap();
    renderer.draw(&request).unwrap();
    pollster::block_on(renderer.render_end().unwrap());

    assert_eq!(device.count_draws(), 2);
    assert_eq!(device.count_set_pipeline(), 1);
    assert_eq!(device.count_set_bind_group(), 1);
    assert_eq!(renderer.pipeline_stats().hits, 1);
}
