//! Batch partitioning properties over randomized element streams.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use strata_render::wgpu;
use strata_render::*;
use strata_test_utils::{GpuResourceId, GpuSampler, GpuTextureView};

fn texture(id: u64) -> TextureSource {
    TextureSource::from_parts(
        GpuTextureView::mock(GpuResourceId::new(id)),
        GpuSampler::mock(GpuResourceId::new(10_000 + id)),
    )
}

fn quad() -> Arc<ElementMesh> {
    Arc::new(ElementMesh::quad(0.0, 0.0, 4.0, 4.0))
}

fn batcher(max_textures: usize) -> Batcher {
    Batcher::new(BatcherOptions {
        max_textures,
        ..BatcherOptions::default()
    })
}

/// What was submitted, kept beside the batcher for checking.
#[derive(Clone, Copy)]
struct Submitted {
    texture: usize,
    blend: BlendMode,
    topology: Topology,
}

fn random_stream(rng: &mut SmallRng, pool: &[TextureSource]) -> Vec<Submitted> {
    let len = rng.gen_range(0..200);
    (0..len)
        .map(|_| Submitted {
            texture: rng.gen_range(0..pool.len()),
            blend: if rng.gen_bool(0.2) {
                BlendMode::Additive
            } else {
                BlendMode::Alpha
            },
            topology: match rng.gen_range(0..20) {
                0 => Topology::TriangleStrip,
                1 | 2 => Topology::LineList,
                _ => Topology::TriangleList,
            },
        })
        .collect()
}

fn submit(batcher: &mut Batcher, pool: &[TextureSource], stream: &[Submitted]) {
    for s in stream {
        batcher.add(
            DrawableElement::textured(quad(), pool[s.texture].clone())
                .with_blend_mode(s.blend)
                .with_topology(s.topology),
        );
    }
}

#[test]
fn test_random_streams_respect_batching_rules() {
    let pool: Vec<TextureSource> = (0..12).map(texture).collect();

    for seed in 0..64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let max_textures = rng.gen_range(1..=8);
        let stream = random_stream(&mut rng, &pool);

        let mut batcher = batcher(max_textures);
        submit(&mut batcher, &pool, &stream);
        let batches = batcher.break_into_batches();

        // Batches cover the stream in order with no gaps.
        let mut next = 0;
        for batch in &batches {
            assert_eq!(batch.elements.start, next, "seed {seed}");
            assert!(batch.elements.end > batch.elements.start);
            next = batch.elements.end;
        }
        assert_eq!(next, stream.len(), "seed {seed}");

        for (b, batch) in batches.iter().enumerate() {
            assert!(batch.textures().len() <= max_textures, "seed {seed}");

            for i in batch.elements.clone() {
                let s = stream[i];
                assert_eq!(s.blend, batch.blend_mode, "seed {seed}");
                assert_eq!(s.topology, batch.topology, "seed {seed}");
                assert!(
                    batch.textures().iter().any(|t| t.ptr_eq(&pool[s.texture])),
                    "seed {seed}"
                );
                // Each quad is four vertices, packed in submission order.
                for v in 4 * i..4 * i + 4 {
                    let slot = batch.geometry.vertices[v].texture_slot as usize;
                    assert!(batch.textures()[slot].ptr_eq(&pool[s.texture]));
                }
            }

            if stream[batch.elements.start].topology.is_strip() {
                assert!(!batch.batched);
                assert_eq!(batch.elements.len(), 1);
            }

            // A batch only ends when the next element could not join it.
            if let Some(following) = batches.get(b + 1) {
                let first = stream[following.elements.start];
                let fits = batch.batched
                    && following.batched
                    && first.blend == batch.blend_mode
                    && first.topology == batch.topology
                    && (batch.textures().len() < max_textures
                        || batch
                            .textures()
                            .iter()
                            .any(|t| t.ptr_eq(&pool[first.texture])));
                assert!(!fits, "seed {seed}: batch {b} was cut early");
            }
        }

        let indices: u32 = batches.iter().map(|b| b.size).sum();
        assert_eq!(indices as usize, stream.len() * 6);
    }
}

#[test]
fn test_thousand_elements_four_textures_one_batch() {
    let textures: Vec<TextureSource> = (0..4).map(texture).collect();
    let mut batcher = batcher(8);
    for i in 0..1000 {
        batcher.add(DrawableElement::textured(quad(), textures[i % 4].clone()));
    }

    let batches = batcher.break_into_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].textures().len(), 4);
    assert_eq!(batches[0].size, 6000);
    assert_eq!(batches[0].geometry.indices.len(), 6000);
    assert_eq!(batches[0].geometry.vertices.len(), 4000);
}

#[test]
fn test_alternating_blend_modes_break_every_element() {
    let tex = texture(1);
    let mut batcher = batcher(8);
    for i in 0..10 {
        let blend = if i % 2 == 0 {
            BlendMode::Alpha
        } else {
            BlendMode::Additive
        };
        batcher.add(DrawableElement::textured(quad(), tex.clone()).with_blend_mode(blend));
    }

    let batches = batcher.break_into_batches();
    assert_eq!(batches.len(), 10);
    assert_eq!(batcher.stats().blend_breaks, 9);
    for (i, batch) in batches.iter().enumerate() {
        assert_eq!(batch.elements, i..i + 1);
        assert_eq!(batch.start, 6 * i as u32);
    }
}

#[test]
fn test_texture_overflow_starts_new_batch_with_one_slot() {
    let textures: Vec<TextureSource> = (0..5).map(texture).collect();
    let mut batcher = batcher(2);
    for tex in &textures {
        batcher.add(DrawableElement::textured(quad(), tex.clone()));
    }

    let batches = batcher.break_into_batches();
    let sizes: Vec<usize> = batches.iter().map(|b| b.textures().len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(batcher.stats().texture_breaks, 2);
    // Slots restart in each batch.
    assert_eq!(batches[1].geometry.vertices[8].texture_slot, 0);
}

#[test]
fn test_custom_draw_is_isolated() {
    let device = strata_test_utils::MockRenderDevice::new();
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: None,
        size: 256,
        usage: wgpu::BufferUsages::VERTEX,
        mapped_at_creation: false,
    });
    let geometry = Arc::new(Geometry::new(
        GeometryLayout::new().with_attribute(
            "position",
            0,
            wgpu::VertexFormat::Float32x2,
            0,
            8,
        ),
        vec![buffer],
        3,
    ));
    let shader = Arc::new(
        Shader::new("custom", "@vertex fn vs_main() {}").with_attribute("position", 0),
    );
    let custom = Arc::new(CustomDraw::new(shader, geometry, Vec::new()));

    let tex = texture(1);
    let mut batcher = batcher(4);
    batcher.add(DrawableElement::textured(quad(), tex.clone()));
    batcher.add(DrawableElement::custom(custom));
    batcher.add(DrawableElement::textured(quad(), tex));

    let batches = batcher.break_into_batches();
    assert_eq!(batches.len(), 3);
    assert!(matches!(batches[1].kind, BatchKind::Custom(_)));
    assert!(!batches[1].batched);
    assert_eq!((batches[1].start, batches[1].size), (0, 3));
    assert_eq!(batches[2].start, 6);
    assert_eq!(batcher.stats().singletons, 1);
}

#[test]
fn test_batcher_is_reusable_across_frames() {
    let tex = texture(1);
    let mut batcher = batcher(4);
    for frame in 1..=3 {
        for _ in 0..frame {
            batcher.add(DrawableElement::textured(quad(), tex.clone()));
        }
        let batches = batcher.break_into_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].size, 6 * frame);
        assert!(batcher.is_empty());
    }
}
