use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use dial::program::{STANDARD_FRAGMENT_SHADER, STANDARD_VERTEX_SHADER};
use tempfile::tempdir;

fn run_dial(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dial"))
        .current_dir(cwd)
        .args(args)
        .env("DIAL_LOG", "warn")
        .output()
        .expect("dial command should run")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn gpu_missing(output: &Output) -> bool {
    if stderr(output).contains("no suitable GPU adapter found") {
        eprintln!("Skipping test: no GPU adapter found");
        return true;
    }
    false
}

#[test]
fn help_lists_both_commands() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dial(dir.path(), &["--help"]);
    assert!(output.status.success(), "--help should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("render"));
    assert!(stdout.contains("check-shader"));

    let output = run_dial(dir.path(), &["render", "--help"]);
    assert!(output.status.success(), "render --help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--24-hour"), "stdout: {stdout}");
}

#[test]
fn render_rejects_unknown_config_fields_with_location() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("face.yaml"),
        "surface:\n  width: 64\n  height: 64\nscheduler:\n  rate: 5\n",
    )
    .expect("config should write");

    let output = run_dial(
        dir.path(),
        &["render", "--config", "face.yaml", "--out", "frames"],
    );
    assert!(!output.status.success(), "unknown field should fail");
    let stderr = stderr(&output);
    assert!(stderr.contains("failed to parse yaml"), "stderr: {stderr}");
    assert!(stderr.contains("at line"), "stderr: {stderr}");
    assert!(!dir.path().join("frames").exists());
}

#[test]
fn render_rejects_invalid_values_before_touching_the_gpu() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("face.yaml"),
        "demo:\n  background_tint: [1.0, 1.0, 2.0, 1.0]\n",
    )
    .expect("config should write");

    let output = run_dial(
        dir.path(),
        &["render", "--config", "face.yaml", "--out", "frames"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("background_tint[2]"));

    let output = run_dial(dir.path(), &["render", "--frames", "0", "--out", "frames"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--frames must be > 0"));

    let output = run_dial(dir.path(), &["render", "--width", "0", "--out", "frames"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("surface must be positive"));

    let output = run_dial(
        dir.path(),
        &["render", "--start", "yesterday", "--out", "frames"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid --start time"));
}

#[test]
fn render_writes_one_png_per_frame() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dial(
        dir.path(),
        &[
            "render",
            "--width",
            "48",
            "--height",
            "48",
            "--frames",
            "2",
            "--start",
            "2024-06-15T10:08:30+00:00",
            "--out",
            "frames",
        ],
    );
    if gpu_missing(&output) {
        return;
    }
    assert!(output.status.success(), "render failed: {}", stderr(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wrote 2 frame(s)"), "stdout: {stdout}");
    for name in ["frame_0000.png", "frame_0001.png"] {
        let frame = image::open(dir.path().join("frames").join(name))
            .expect("frame should decode")
            .to_rgba8();
        assert_eq!(frame.dimensions(), (48, 48));
        assert!(frame.pixels().any(|px| px[3] > 0), "{name} is empty");
    }
}

#[test]
fn check_shader_accepts_the_standard_program() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("quad.vert.wgsl"), STANDARD_VERTEX_SHADER)
        .expect("shader should write");
    fs::write(dir.path().join("quad.frag.wgsl"), STANDARD_FRAGMENT_SHADER)
        .expect("shader should write");

    let output = run_dial(
        dir.path(),
        &[
            "check-shader",
            "--vertex",
            "quad.vert.wgsl",
            "--fragment",
            "quad.frag.wgsl",
            "--param",
            "u_Time",
        ],
    );
    if gpu_missing(&output) {
        return;
    }
    assert!(output.status.success(), "check failed: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK: quad.frag (1 uniform(s))"), "stdout: {stdout}");
}

#[test]
fn check_shader_reports_compile_errors() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("quad.vert.wgsl"), STANDARD_VERTEX_SHADER)
        .expect("shader should write");
    fs::write(dir.path().join("bad.wgsl"), "fn fs_main( {").expect("shader should write");

    let output = run_dial(
        dir.path(),
        &[
            "check-shader",
            "--vertex",
            "quad.vert.wgsl",
            "--fragment",
            "bad.wgsl",
        ],
    );
    if gpu_missing(&output) {
        return;
    }
    assert!(!output.status.success());
    assert!(stderr(&output).contains("fragment shader of program 'bad' failed to compile"));
}

#[test]
fn check_shader_reports_missing_files() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dial(
        dir.path(),
        &[
            "check-shader",
            "--vertex",
            "missing.wgsl",
            "--fragment",
            "missing.wgsl",
        ],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("failed to read vertex shader missing.wgsl"));
}
