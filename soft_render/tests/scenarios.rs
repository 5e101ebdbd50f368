//! End-to-end pipeline scenarios: clear, rasterization coverage, depth,
//! blending, perspective correction, and thread-count determinism.

use glam::{Vec3, Vec4};
use soft_render::buffer::{IndexBuffer, VertexArray, VertexAttribute, VertexBuffer, VertexDataType};
use soft_render::color::{pack_rgb9e5, unpack_rgb9e5, ColorFormat};
use soft_render::framebuffer::Framebuffer;
use soft_render::mesh::{Mesh, RenderMode};
use soft_render::pipeline::{BlendMode, CullMode, DepthTest, PipelineState};
use soft_render::shader::{FragmentParams, VertexParams};
use soft_render::{Context, FramebufferId, TextureId, VertexArrayId};

/// A context with one color attachment, one depth attachment, and a vertex
/// array of interleaved `position: vec4, uv: vec2` vertices.
struct Scene {
    ctx: Context,
    color: TextureId,
    depth: TextureId,
    fbo: FramebufferId,
    vao: VertexArrayId,
}

const VERTEX_STRIDE: u32 = 24;

fn scene(
    threads: usize,
    size: u16,
    color_format: ColorFormat,
    depth_format: ColorFormat,
    vertices: &[f32],
) -> Scene {
    let mut ctx = Context::with_threads(threads);

    let color = ctx.create_texture(color_format, size, size, 1).unwrap();
    let depth = ctx.create_texture(depth_format, size, size, 1).unwrap();

    let mut framebuffer = Framebuffer::new();
    framebuffer.attach_color(0, Some(color));
    framebuffer.attach_depth(Some(depth));
    let fbo = ctx.create_framebuffer(framebuffer).unwrap();

    let vbo = ctx.create_vertex_buffer(VertexBuffer::from_slice(vertices));
    let vao = ctx
        .create_vertex_array(VertexArray {
            vertex_buffer: vbo,
            index_buffer: None,
            attributes: vec![
                VertexAttribute {
                    offset: 0,
                    stride: VERTEX_STRIDE,
                    dimension: 4,
                    data_type: VertexDataType::F32,
                },
                VertexAttribute {
                    offset: 16,
                    stride: VERTEX_STRIDE,
                    dimension: 2,
                    data_type: VertexDataType::F32,
                },
            ],
        })
        .unwrap();

    Scene {
        ctx,
        color,
        depth,
        fbo,
        vao,
    }
}

fn mesh(vao: VertexArrayId, mode: RenderMode, count: u32) -> Mesh {
    Mesh {
        mode,
        indexed: false,
        elements: 0..count,
        vao,
    }
}

fn position_vs(params: &mut VertexParams<'_>) -> Vec4 {
    let uv = params.attribute(1);
    params.varyings[0] = uv;
    params.attribute(0)
}

fn pos_only_vs(params: &mut VertexParams<'_>) -> Vec4 {
    params.attribute(0)
}

fn green_fs(params: &mut FragmentParams<'_>) -> bool {
    params.outputs[0] = Vec4::new(0.0, 1.0, 0.0, 1.0);
    true
}

fn red_fs(params: &mut FragmentParams<'_>) -> bool {
    params.outputs[0] = Vec4::new(1.0, 0.0, 0.0, 1.0);
    true
}

fn translucent_red_fs(params: &mut FragmentParams<'_>) -> bool {
    params.outputs[0] = Vec4::new(0.5, 0.0, 0.0, 0.5);
    true
}

fn translucent_green_fs(params: &mut FragmentParams<'_>) -> bool {
    params.outputs[0] = Vec4::new(0.0, 0.5, 0.0, 0.5);
    true
}

fn uv_fs(params: &mut FragmentParams<'_>) -> bool {
    let uv = params.varyings[0];
    params.outputs[0] = Vec4::new(uv.x, uv.y, 0.0, 1.0);
    true
}

fn uv_blend_fs(params: &mut FragmentParams<'_>) -> bool {
    let uv = params.varyings[0];
    params.outputs[0] = Vec4::new(uv.x, uv.y, 0.25, 0.5);
    true
}

fn discard_left_fs(params: &mut FragmentParams<'_>) -> bool {
    if params.coord.x < 8 {
        return false;
    }
    params.outputs[0] = Vec4::new(0.0, 1.0, 0.0, 1.0);
    true
}

fn uniform_color_fs(params: &mut FragmentParams<'_>) -> bool {
    let rgba: [f32; 4] = bytemuck::pod_read_unaligned(params.uniforms);
    params.outputs[0] = Vec4::from_array(rgba);
    true
}

fn two_target_fs(params: &mut FragmentParams<'_>) -> bool {
    params.outputs[0] = Vec4::new(1.0, 0.0, 0.0, 1.0);
    params.outputs[1] = Vec4::new(0.0, 0.0, 1.0, 1.0);
    true
}

/// position + uv for one vertex
fn vertex(pos: [f32; 4], uv: [f32; 2]) -> [f32; 6] {
    [pos[0], pos[1], pos[2], pos[3], uv[0], uv[1]]
}

fn triangle_vertices(positions: [[f32; 4]; 3]) -> Vec<f32> {
    positions
        .iter()
        .flat_map(|&p| vertex(p, [0.0, 0.0]))
        .collect()
}

/// A single triangle covering all of NDC, at window depth `z`.
fn fullscreen_triangle(z_window: f32) -> Vec<f32> {
    let z = z_window * 2.0 - 1.0;
    triangle_vertices([
        [-1.0, -1.0, z, 1.0],
        [3.0, -1.0, z, 1.0],
        [-1.0, 3.0, z, 1.0],
    ])
}

fn no_depth_state() -> PipelineState {
    let mut state = PipelineState::new();
    state
        .set_depth_test(DepthTest::Off)
        .set_depth_mask(false)
        .set_num_varyings(1);
    state
}

#[test]
fn clear_fills_color_and_depth_completely() {
    let mut scene = scene(4, 4, ColorFormat::Rgba8, ColorFormat::R16, &[]);
    scene
        .ctx
        .clear_framebuffer(scene.fbo, Vec4::new(1.0, 0.5, 0.25, 1.0), 0.75)
        .unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    for texel in color.as_bytes().chunks(4) {
        assert_eq!(texel, [255, 128, 64, 255]);
    }

    let depth = scene.ctx.texture(scene.depth).unwrap();
    for texel in depth.as_bytes().chunks(2) {
        assert_eq!(u16::from_ne_bytes([texel[0], texel[1]]), 49151);
    }
}

#[test]
fn single_triangle_covers_expected_pixels() {
    let vertices = triangle_vertices([
        [-1.0, -1.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
    ]);
    let mut scene = scene(4, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);
    let shader = scene
        .ctx
        .create_shader(position_vs, green_fs, no_depth_state(), None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    // Screen-space triangle (0,0) (16,0) (8,16): row y spans
    // [ceil(y/2), ceil(16 - y/2)) under the top-left fill convention.
    let color = scene.ctx.texture(scene.color).unwrap();
    for y in 0..16u16 {
        let left = (y as f32 / 2.0).ceil() as u16;
        let right = (16.0 - y as f32 / 2.0).ceil() as u16;
        for x in 0..16u16 {
            let expected = if x >= left && x < right {
                Vec4::new(0.0, 1.0, 0.0, 1.0)
            } else {
                Vec4::ZERO
            };
            assert_eq!(color.read(x, y, 0), expected, "pixel ({x}, {y})");
        }
    }
}

#[test]
fn depth_test_orders_triangles() {
    for near_first in [false, true] {
        let near = fullscreen_triangle(0.2);
        let far = fullscreen_triangle(0.8);

        let mut vertices = Vec::new();
        let (first, second, first_fs, second_fs): (_, _, fn(&mut FragmentParams<'_>) -> bool, fn(&mut FragmentParams<'_>) -> bool) =
            if near_first {
                (&near, &far, red_fs, green_fs)
            } else {
                (&far, &near, green_fs, red_fs)
            };
        vertices.extend_from_slice(first);
        vertices.extend_from_slice(second);

        let mut scene = scene(4, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);
        let mut state = PipelineState::new();
        state.set_cull_mode(CullMode::Off);

        let shader_a = scene.ctx.create_shader(position_vs, first_fs, state, None).unwrap();
        let shader_b = scene.ctx.create_shader(position_vs, second_fs, state, None).unwrap();

        scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
        let a = mesh(scene.vao, RenderMode::Triangles, 3);
        let mut b = mesh(scene.vao, RenderMode::Triangles, 3);
        b.elements = 3..6;
        scene.ctx.draw(&a, shader_a, scene.fbo).unwrap();
        scene.ctx.draw(&b, shader_b, scene.fbo).unwrap();

        let color = scene.ctx.texture(scene.color).unwrap();
        let depth = scene.ctx.texture(scene.depth).unwrap();
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(
                    color.read(x, y, 0),
                    Vec4::new(1.0, 0.0, 0.0, 1.0),
                    "near_first={near_first} pixel ({x}, {y})"
                );
                assert!((depth.read(x, y, 0).x - 0.2).abs() < 1e-5);
            }
        }
    }
}

#[test]
fn premultiplied_alpha_layers_compose() {
    let vertices: Vec<f32> = [fullscreen_triangle(0.5), fullscreen_triangle(0.5)].concat();
    let mut scene = scene(4, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let mut state = no_depth_state();
    state.set_blend_mode(BlendMode::PremultipliedAlpha);

    let shader_red = scene
        .ctx
        .create_shader(position_vs, translucent_red_fs, state, None)
        .unwrap();
    let shader_green = scene
        .ctx
        .create_shader(position_vs, translucent_green_fs, state, None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader_red, scene.fbo)
        .unwrap();

    let first = scene.ctx.texture(scene.color).unwrap().read(8, 8, 0);
    assert!((first - Vec4::new(0.5, 0.0, 0.0, 0.5)).abs().max_element() <= 1.0 / 255.0);

    let mut second_mesh = mesh(scene.vao, RenderMode::Triangles, 6);
    second_mesh.elements = 3..6;
    scene.ctx.draw(&second_mesh, shader_green, scene.fbo).unwrap();

    let second = scene.ctx.texture(scene.color).unwrap().read(8, 8, 0);
    assert!(
        (second - Vec4::new(0.25, 0.5, 0.0, 0.75)).abs().max_element() <= 2.0 / 255.0,
        "{second:?}"
    );
}

#[test]
fn perspective_correct_interpolation() {
    // screen triangle (0,0) (16,0) (0,16) with vertex w = (1, 1, 4) and a
    // uv varying of (0,0) (1,0) (0,1)
    let vertices: Vec<f32> = [
        vertex([-1.0, -1.0, 0.0, 1.0], [0.0, 0.0]),
        vertex([1.0, -1.0, 0.0, 1.0], [1.0, 0.0]),
        vertex([-4.0, 4.0, 0.0, 4.0], [0.0, 1.0]),
    ]
    .concat();
    let mut scene = scene(1, 16, ColorFormat::Rgba32Float, ColorFormat::R32Float, &vertices);
    let shader = scene
        .ctx
        .create_shader(position_vs, uv_fs, no_depth_state(), None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    // Pixel (4, 8) has affine barycentric (0.25, 0.25, 0.5); scaling by
    // 1/w = (1, 1, 0.25) and renormalizing gives (0.4, 0.4, 0.2), so the
    // varying is (0.4, 0.2) rather than the naive (0.25, 0.5).
    let sampled = scene.ctx.texture(scene.color).unwrap().read(4, 8, 0);
    assert!((sampled.x - 0.4).abs() < 1e-4, "{sampled:?}");
    assert!((sampled.y - 0.2).abs() < 1e-4, "{sampled:?}");
}

#[test]
fn rgb9e5_round_trip() {
    let c = Vec3::new(0.165053, 0.301649, 0.756863);
    let out = unpack_rgb9e5(pack_rgb9e5(c));
    let bound = c.max_element() / 512.0;
    for i in 0..3 {
        assert!((out[i] - c[i]).abs() <= bound);
    }
}

#[test]
fn depth_mask_off_preserves_depth_buffer() {
    let vertices = fullscreen_triangle(0.1);
    let mut scene = scene(4, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let mut state = PipelineState::new();
    state.set_depth_test(DepthTest::Less).set_depth_mask(false);
    let shader = scene.ctx.create_shader(position_vs, green_fs, state, None).unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 0.33).unwrap();
    let before = scene.ctx.texture(scene.depth).unwrap().as_bytes().to_vec();

    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    let depth = scene.ctx.texture(scene.depth).unwrap();
    assert_eq!(depth.as_bytes(), &before[..]);
    // but color did render
    assert_eq!(
        scene.ctx.texture(scene.color).unwrap().read(8, 8, 0),
        Vec4::new(0.0, 1.0, 0.0, 1.0)
    );
}

#[test]
fn discarded_fragments_write_nothing() {
    let vertices = fullscreen_triangle(0.1);
    let mut scene = scene(2, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let mut state = PipelineState::new();
    state.set_depth_test(DepthTest::Less);
    let shader = scene
        .ctx
        .create_shader(position_vs, discard_left_fs, state, None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    let depth = scene.ctx.texture(scene.depth).unwrap();
    assert_eq!(color.read(2, 8, 0), Vec4::ZERO);
    assert_eq!(depth.read(2, 8, 0).x, 1.0, "discard must skip the depth write");
    assert_eq!(color.read(12, 8, 0), Vec4::new(0.0, 1.0, 0.0, 1.0));
    assert!((depth.read(12, 8, 0).x - 0.1).abs() < 1e-5);
}

fn render_overlapping(threads: usize, blend: bool) -> Vec<u8> {
    // eight overlapping triangles with distinct uv "colors"
    let mut vertices = Vec::new();
    for i in 0..8 {
        let t = i as f32 / 8.0;
        let z = 0.1 + 0.1 * t;
        let shift = t - 0.5;
        let positions = [
            [-0.9 + shift, -0.9, z * 2.0 - 1.0, 1.0],
            [0.9, -0.5 + shift, z * 2.0 - 1.0, 1.0],
            [shift, 0.9, z * 2.0 - 1.0, 1.0],
        ];
        let uv = [t, 1.0 - t];
        for p in positions {
            vertices.extend_from_slice(&vertex(p, uv));
        }
    }

    let mut scene = scene(threads, 32, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let mut state = PipelineState::new();
    state
        .set_cull_mode(CullMode::Off)
        .set_num_varyings(1)
        .set_depth_test(DepthTest::Less);
    if blend {
        state
            .set_blend_mode(BlendMode::Alpha)
            .set_depth_test(DepthTest::Off)
            .set_depth_mask(false);
    }

    let fragment = if blend { uv_blend_fs } else { uv_fs };
    let shader = scene.ctx.create_shader(position_vs, fragment, state, None).unwrap();

    scene
        .ctx
        .clear_framebuffer(scene.fbo, Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0)
        .unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 24), shader, scene.fbo)
        .unwrap();

    scene.ctx.texture(scene.color).unwrap().as_bytes().to_vec()
}

#[test]
fn thread_count_does_not_change_opaque_output() {
    let single = render_overlapping(1, false);
    for threads in [2, 4, 7] {
        assert_eq!(single, render_overlapping(threads, false), "threads={threads}");
    }
}

#[test]
fn thread_count_does_not_change_blended_output() {
    let single = render_overlapping(1, true);
    for threads in [2, 4, 7] {
        assert_eq!(single, render_overlapping(threads, true), "threads={threads}");
    }
}

#[test]
fn lines_and_points_rasterize() {
    let vertices: Vec<f32> = [
        vertex([-1.0, 0.0, 0.0, 1.0], [0.0, 0.0]),
        vertex([1.0, 0.0, 0.0, 1.0], [0.0, 0.0]),
        vertex([0.0, 0.0, 0.0, 1.0], [0.0, 0.0]),
        vertex([1.5, 0.5, 0.0, 1.0], [0.0, 0.0]),
    ]
    .concat();
    let mut scene = scene(3, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);
    let shader = scene
        .ctx
        .create_shader(position_vs, green_fs, no_depth_state(), None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Lines, 2), shader, scene.fbo)
        .unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    for x in 0..16 {
        assert_eq!(color.read(x, 8, 0), Vec4::new(0.0, 1.0, 0.0, 1.0), "x={x}");
        assert_eq!(color.read(x, 9, 0), Vec4::ZERO);
    }

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    let mut point = mesh(scene.vao, RenderMode::Points, 4);
    point.elements = 2..3;
    scene.ctx.draw(&point, shader, scene.fbo).unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    assert_eq!(color.read(8, 8, 0), Vec4::new(0.0, 1.0, 0.0, 1.0));
    assert_eq!(color.read(7, 8, 0), Vec4::ZERO);

    // a point with |x| > w falls outside the clip volume entirely
    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    point.elements = 3..4;
    scene.ctx.draw(&point, shader, scene.fbo).unwrap();
    let color = scene.ctx.texture(scene.color).unwrap();
    assert!(color.as_bytes().iter().all(|&b| b == 0));
}

#[test]
fn wireframe_emits_only_edges() {
    let vertices = triangle_vertices([
        [-1.0, -1.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
    ]);
    let mut scene = scene(2, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);
    let shader = scene
        .ctx
        .create_shader(position_vs, green_fs, no_depth_state(), None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::TriangleWire, 3), shader, scene.fbo)
        .unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
    assert_eq!(color.read(2, 4, 0), green, "left edge");
    assert_eq!(color.read(13, 4, 0), green, "right edge");
    assert_eq!(color.read(8, 4, 0), Vec4::ZERO, "interior stays empty");
}

#[test]
fn uniform_block_feeds_the_fragment_shader() {
    let vertices = fullscreen_triangle(0.5);
    let mut scene = scene(2, 8, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let ubo = scene.ctx.create_uniform_buffer(16);
    scene
        .ctx
        .set_uniforms(ubo, &[0.2f32, 0.4, 0.6, 1.0])
        .unwrap();
    let shader = scene
        .ctx
        .create_shader(position_vs, uniform_color_fs, no_depth_state(), Some(ubo))
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    let out = scene.ctx.texture(scene.color).unwrap().read(4, 4, 0);
    assert!((out - Vec4::new(0.2, 0.4, 0.6, 1.0)).abs().max_element() <= 1.0 / 255.0);
}

#[test]
fn scissor_limits_rendering() {
    let vertices = fullscreen_triangle(0.5);
    let mut scene = scene(2, 16, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);
    let shader = scene
        .ctx
        .create_shader(position_vs, green_fs, no_depth_state(), None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    scene.ctx.set_scissor(4, 4, 8, 8);
    scene
        .ctx
        .draw(&mesh(scene.vao, RenderMode::Triangles, 3), shader, scene.fbo)
        .unwrap();

    let color = scene.ctx.texture(scene.color).unwrap();
    let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
    assert_eq!(color.read(8, 8, 0), green);
    assert_eq!(color.read(11, 11, 0), green);
    assert_eq!(color.read(2, 8, 0), Vec4::ZERO);
    assert_eq!(color.read(8, 2, 0), Vec4::ZERO);
    assert_eq!(color.read(12, 8, 0), Vec4::ZERO);
}

#[test]
fn multiple_render_targets() {
    let vertices = fullscreen_triangle(0.5);
    let mut ctx = Context::with_threads(2);

    let color0 = ctx.create_texture(ColorFormat::Rgba8, 8, 8, 1).unwrap();
    let color1 = ctx.create_texture(ColorFormat::Rgba8, 8, 8, 1).unwrap();
    let depth = ctx.create_texture(ColorFormat::R32Float, 8, 8, 1).unwrap();

    let mut framebuffer = Framebuffer::new();
    framebuffer.attach_color(0, Some(color0));
    framebuffer.attach_color(1, Some(color1));
    framebuffer.attach_depth(Some(depth));
    let fbo = ctx.create_framebuffer(framebuffer).unwrap();

    let vbo = ctx.create_vertex_buffer(VertexBuffer::from_slice(&vertices));
    let vao = ctx
        .create_vertex_array(VertexArray {
            vertex_buffer: vbo,
            index_buffer: None,
            attributes: vec![VertexAttribute {
                offset: 0,
                stride: VERTEX_STRIDE,
                dimension: 4,
                data_type: VertexDataType::F32,
            }],
        })
        .unwrap();

    let mut state = PipelineState::new();
    state
        .set_depth_test(DepthTest::Off)
        .set_depth_mask(false)
        .set_num_targets(2);
    let shader = ctx.create_shader(pos_only_vs, two_target_fs, state, None).unwrap();

    ctx.clear_framebuffer(fbo, Vec4::ZERO, 1.0).unwrap();
    ctx.draw(&mesh(vao, RenderMode::Triangles, 3), shader, fbo).unwrap();

    assert_eq!(
        ctx.texture(color0).unwrap().read(4, 4, 0),
        Vec4::new(1.0, 0.0, 0.0, 1.0)
    );
    assert_eq!(
        ctx.texture(color1).unwrap().read(4, 4, 0),
        Vec4::new(0.0, 0.0, 1.0, 1.0)
    );
}

#[test]
fn indexed_draws_match_direct() {
    let vertices = triangle_vertices([
        [-1.0, -1.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
    ]);

    let render = |indexed: bool| -> Vec<u8> {
        let mut ctx = Context::with_threads(2);
        let color = ctx.create_texture(ColorFormat::Rgba8, 16, 16, 1).unwrap();
        let depth = ctx.create_texture(ColorFormat::R32Float, 16, 16, 1).unwrap();

        let mut framebuffer = Framebuffer::new();
        framebuffer.attach_color(0, Some(color));
        framebuffer.attach_depth(Some(depth));
        let fbo = ctx.create_framebuffer(framebuffer).unwrap();

        let vbo = ctx.create_vertex_buffer(VertexBuffer::from_slice(&vertices));
        let ibo = ctx.create_index_buffer(IndexBuffer::U16(vec![0, 1, 2]));
        let vao = ctx
            .create_vertex_array(VertexArray {
                vertex_buffer: vbo,
                index_buffer: Some(ibo),
                attributes: vec![
                    VertexAttribute {
                        offset: 0,
                        stride: VERTEX_STRIDE,
                        dimension: 4,
                        data_type: VertexDataType::F32,
                    },
                    VertexAttribute {
                        offset: 16,
                        stride: VERTEX_STRIDE,
                        dimension: 2,
                        data_type: VertexDataType::F32,
                    },
                ],
            })
            .unwrap();

        let shader = ctx
            .create_shader(position_vs, green_fs, no_depth_state(), None)
            .unwrap();
        ctx.clear_framebuffer(fbo, Vec4::ZERO, 1.0).unwrap();

        let mut draw = mesh(vao, RenderMode::Triangles, 3);
        draw.indexed = indexed;
        ctx.draw(&draw, shader, fbo).unwrap();

        ctx.texture(color).unwrap().as_bytes().to_vec()
    };

    let direct = render(false);
    assert_eq!(direct, render(true));
    assert!(direct.iter().any(|&b| b != 0));
}

#[test]
fn draw_multiple_preserves_submission_order() {
    // two blended full-screen layers submitted as one batch
    let vertices: Vec<f32> = [fullscreen_triangle(0.5), fullscreen_triangle(0.5)].concat();
    let mut scene = scene(4, 8, ColorFormat::Rgba8, ColorFormat::R32Float, &vertices);

    let mut state = no_depth_state();
    state.set_blend_mode(BlendMode::PremultipliedAlpha);
    let shader = scene
        .ctx
        .create_shader(position_vs, translucent_red_fs, state, None)
        .unwrap();

    scene.ctx.clear_framebuffer(scene.fbo, Vec4::ZERO, 1.0).unwrap();
    let mut a = mesh(scene.vao, RenderMode::Triangles, 3);
    let mut b = mesh(scene.vao, RenderMode::Triangles, 3);
    a.elements = 0..3;
    b.elements = 3..6;
    scene
        .ctx
        .draw_multiple(&[a, b], shader, scene.fbo)
        .unwrap();

    // two premultiplied layers of (0.5, 0, 0, 0.5): 0.5 + 0.5 * 0.5
    let out = scene.ctx.texture(scene.color).unwrap().read(4, 4, 0);
    assert!((out - Vec4::new(0.75, 0.0, 0.0, 0.75)).abs().max_element() <= 2.0 / 255.0);
}

#[test]
fn invalid_handles_are_rejected() {
    let mut ctx = Context::with_threads(1);
    let color = ctx.create_texture(ColorFormat::Rgba8, 4, 4, 1).unwrap();

    // framebuffer without depth cannot be drawn into
    let mut framebuffer = Framebuffer::new();
    framebuffer.attach_color(0, Some(color));
    let fbo = ctx.create_framebuffer(framebuffer).unwrap();

    let vbo = ctx.create_vertex_buffer(VertexBuffer::from_slice::<f32>(&[0.0; 24]));
    let vao = ctx
        .create_vertex_array(VertexArray {
            vertex_buffer: vbo,
            index_buffer: None,
            attributes: vec![VertexAttribute {
                offset: 0,
                stride: 16,
                dimension: 4,
                data_type: VertexDataType::F32,
            }],
        })
        .unwrap();
    let shader = ctx
        .create_shader(pos_only_vs, green_fs, PipelineState::new(), None)
        .unwrap();

    let result = ctx.draw(&mesh(vao, RenderMode::Triangles, 3), shader, fbo);
    assert!(matches!(result, Err(soft_render::Error::InvalidFramebuffer(_))));

    ctx.destroy_shader(shader);
    let result = ctx.draw(&mesh(vao, RenderMode::Triangles, 3), shader, fbo);
    assert_eq!(result, Err(soft_render::Error::InvalidHandle));
}
