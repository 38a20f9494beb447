use dial::compositor::Compositor;
use dial::error::ShaderError;
use dial::gpu::wgpu_backend::{GpuContext, WgpuBackend};
use dial::gpu::GpuBackend;
use dial::program::{ProgramSource, ShaderProgram, STANDARD_FRAGMENT_SHADER, STANDARD_VERTEX_SHADER};
use tiny_skia::Color;

fn backend(width: u32, height: u32) -> Option<WgpuBackend> {
    let context = match pollster::block_on(GpuContext::request()) {
        Ok(context) => context,
        Err(e) => {
            let err_str = e.to_string();
            if err_str.contains("no suitable GPU adapter found") {
                eprintln!("Skipping test: no GPU adapter found");
                return None;
            }
            panic!("gpu context failed to initialize: {e:?}");
        }
    };
    Some(WgpuBackend::new(context, width, height).expect("backend should initialize"))
}

#[test]
fn filled_layer_reaches_the_render_target() {
    let Some(gpu) = backend(64, 64) else {
        return;
    };
    let mut compositor = Compositor::new(gpu, 64, 64);
    assert!(compositor.standard_program().handle().is_some());

    let id = compositor.create_layer(64, 64).expect("layer should create");
    compositor
        .layer_mut(id)
        .and_then(|layer| layer.pixmap_mut())
        .expect("layer should allocate pixels")
        .fill(Color::from_rgba8(255, 0, 0, 255));
    compositor.invalidate_layer(id).expect("upload should fit");

    let stats = compositor.draw();
    assert_eq!(stats.layers_drawn, 1);

    let rgba = compositor
        .gpu_mut()
        .read_rgba()
        .expect("read_rgba should succeed");
    assert_eq!(rgba.len(), 64 * 64 * 4);
    assert!(
        rgba.chunks_exact(4).any(|px| px[0] > 200 && px[3] == 255),
        "expected at least one opaque red pixel"
    );
}

#[test]
fn empty_frame_is_transparent() {
    let Some(gpu) = backend(16, 16) else {
        return;
    };
    let mut compositor = Compositor::new(gpu, 16, 16);
    compositor.draw();

    let rgba = compositor
        .gpu_mut()
        .read_rgba()
        .expect("read_rgba should succeed");
    assert!(rgba.iter().all(|byte| *byte == 0));
}

#[test]
fn invalid_wgsl_reports_the_failing_stage() {
    let Some(mut gpu) = backend(4, 4) else {
        return;
    };
    let source = ProgramSource::new("broken", STANDARD_VERTEX_SHADER, "fn fs_main( {");

    let err = gpu
        .create_program(&source)
        .expect_err("invalid WGSL must not compile");
    assert!(
        matches!(
            err,
            ShaderError::Compile {
                stage: dial::error::ShaderStage::Fragment,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn declared_params_resolve_to_uniform_locations() {
    let Some(mut gpu) = backend(4, 4) else {
        return;
    };
    let source = ProgramSource::new("params", STANDARD_VERTEX_SHADER, STANDARD_FRAGMENT_SHADER)
        .with_param("u_Time");

    let program = gpu
        .create_program(&source)
        .expect("standard shaders should compile");
    assert!(gpu.uniform_location(program, "u_MVPMatrix").is_some());
    assert!(gpu.uniform_location(program, "u_Time").is_some());
    assert!(gpu.uniform_location(program, "u_Unknown").is_none());
    gpu.delete_program(program);
}
