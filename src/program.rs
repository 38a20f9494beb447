//! Shader programs: compile/link state shared by every program variant and
//! the built-in textured-quad program.

use tracing::{debug, error};

use crate::error::ShaderError;
use crate::gpu::{
    GpuBackend, ProgramId, UniformLocation, UniformValue, COLOR_UNIFORM, MVP_UNIFORM,
};
use crate::layer::Tint;
use crate::math::Mat4;

/// Vertex stage of [`StandardProgram`]: places the unit quad with the MVP
/// matrix and passes texture coordinates through.
pub const STANDARD_VERTEX_SHADER: &str = r#"
struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
  var out: VertexOutput;
  out.position = uniforms.u_MVPMatrix * vec4<f32>(input.position, 1.0);
  out.uv = input.uv;
  return out;
}
"#;

/// Fragment stage of [`StandardProgram`]: the texel scaled by the tint.
/// Texels are premultiplied, so the tint is premultiplied as well.
pub const STANDARD_FRAGMENT_SHADER: &str = r#"
struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
  let texel = textureSample(s_Texture, s_Sampler, input.uv);
  let tint = uniforms.u_Color;
  return texel * vec4<f32>(tint.rgb * tint.a, tint.a);
}
"#;

/// Source text of a vertex/fragment pair plus the extra scalar uniforms it
/// reads besides `u_MVPMatrix` and `u_Color`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
    pub params: Vec<String>,
}

impl ProgramSource {
    pub fn new(
        label: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct ProgramState {
    handle: Option<ProgramId>,
    linked: bool,
    failure: Option<ShaderError>,
}

/// A compiled GPU program that knows how to feed its own uniforms.
///
/// Implementors hold a [`ProgramSource`] and a [`ProgramState`]; the
/// provided methods take care of the build lifecycle. `on_linked` runs once
/// after a successful link and is the place to resolve uniform locations.
/// `on_frame` runs for every layer drawn with the program, right before
/// the quad is issued.
pub trait ShaderProgram: Send {
    fn source(&self) -> &ProgramSource;

    fn state(&self) -> &ProgramState;

    fn state_mut(&mut self) -> &mut ProgramState;

    fn on_linked(&mut self, handle: ProgramId, gpu: &dyn GpuBackend);

    fn on_frame(&mut self, gpu: &mut dyn GpuBackend, mvp: &Mat4, tint: Tint);

    /// Builds the program once. A failed build leaves the program without a
    /// handle; the failure is logged and kept for [`ShaderProgram::link_error`],
    /// and later calls do not retry.
    fn compile_and_link(&mut self, gpu: &mut dyn GpuBackend) {
        if self.state().linked {
            return;
        }

        let result = gpu.create_program(self.source());
        self.state_mut().linked = true;
        match result {
            Ok(handle) => {
                debug!(program = %self.source().label, %handle, "program linked");
                self.state_mut().handle = Some(handle);
                self.on_linked(handle, &*gpu);
            }
            Err(err) => {
                error!(program = %self.source().label, error = %err, "program build failed");
                self.state_mut().failure = Some(err);
            }
        }
    }

    /// Releases the GPU program.
    ///
    /// # Panics
    ///
    /// Panics if the program was never successfully linked.
    fn dispose(&mut self, gpu: &mut dyn GpuBackend) {
        let Some(handle) = self.state_mut().handle.take() else {
            panic!(
                "dispose before create: program '{}' has no GPU handle",
                self.source().label
            );
        };
        gpu.delete_program(handle);
        self.state_mut().linked = false;
        debug!(program = %self.source().label, %handle, "program disposed");
    }

    fn handle(&self) -> Option<ProgramId> {
        self.state().handle
    }

    fn is_loaded(&self) -> bool {
        self.state().handle.is_some()
    }

    fn link_error(&self) -> Option<&ShaderError> {
        self.state().failure.as_ref()
    }
}

/// Cached locations of the two uniforms every program exposes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardUniforms {
    mvp: Option<UniformLocation>,
    color: Option<UniformLocation>,
}

impl StandardUniforms {
    pub fn resolve(gpu: &dyn GpuBackend, handle: ProgramId) -> Self {
        Self {
            mvp: gpu.uniform_location(handle, MVP_UNIFORM),
            color: gpu.uniform_location(handle, COLOR_UNIFORM),
        }
    }

    pub fn upload(&self, gpu: &mut dyn GpuBackend, mvp: &Mat4, tint: Tint) {
        if let Some(location) = self.mvp {
            gpu.set_uniform(location, UniformValue::Mat4(*mvp));
        }
        if let Some(location) = self.color {
            gpu.set_uniform(location, UniformValue::Vec4(tint.to_array()));
        }
    }
}

/// Samples the layer texture and multiplies it by the layer tint. Used for
/// every layer without a program of its own.
#[derive(Debug)]
pub struct StandardProgram {
    source: ProgramSource,
    state: ProgramState,
    uniforms: StandardUniforms,
}

impl Default for StandardProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardProgram {
    pub fn new() -> Self {
        Self {
            source: ProgramSource::new(
                "standard",
                STANDARD_VERTEX_SHADER,
                STANDARD_FRAGMENT_SHADER,
            ),
            state: ProgramState::default(),
            uniforms: StandardUniforms::default(),
        }
    }
}

impl ShaderProgram for StandardProgram {
    fn source(&self) -> &ProgramSource {
        &self.source
    }

    fn state(&self) -> &ProgramState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProgramState {
        &mut self.state
    }

    fn on_linked(&mut self, handle: ProgramId, gpu: &dyn GpuBackend) {
        self.uniforms = StandardUniforms::resolve(gpu, handle);
    }

    fn on_frame(&mut self, gpu: &mut dyn GpuBackend, mvp: &Mat4, tint: Tint) {
        self.uniforms.upload(gpu, mvp, tint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{GpuCommand, RecordingBackend};

    #[test]
    fn compile_and_link_is_idempotent() {
        let mut gpu = RecordingBackend::new();
        let mut program = StandardProgram::new();
        program.compile_and_link(&mut gpu);
        program.compile_and_link(&mut gpu);

        assert!(program.is_loaded());
        let creates = gpu
            .commands()
            .iter()
            .filter(|command| matches!(command, GpuCommand::CreateProgram { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn failed_build_degrades_without_retry() {
        let mut gpu = RecordingBackend::new().with_failing_marker("textureSample");
        let mut program = StandardProgram::new();
        program.compile_and_link(&mut gpu);
        program.compile_and_link(&mut gpu);

        assert!(!program.is_loaded());
        assert_eq!(program.handle(), None);
        assert!(matches!(
            program.link_error(),
            Some(ShaderError::Compile { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "dispose before create")]
    fn dispose_without_link_panics() {
        let mut gpu = RecordingBackend::new();
        StandardProgram::new().dispose(&mut gpu);
    }

    #[test]
    fn dispose_releases_program_and_allows_relink() {
        let mut gpu = RecordingBackend::new();
        let mut program = StandardProgram::new();
        program.compile_and_link(&mut gpu);
        program.dispose(&mut gpu);
        assert_eq!(gpu.live_programs(), 0);
        assert!(!program.is_loaded());

        program.compile_and_link(&mut gpu);
        assert!(program.is_loaded());
    }

    #[test]
    fn on_frame_uploads_matrix_and_tint() {
        let mut gpu = RecordingBackend::new();
        let mut program = StandardProgram::new();
        program.compile_and_link(&mut gpu);
        gpu.clear_commands();

        let mvp = Mat4::from_scale(2.0, 3.0, 1.0);
        program.on_frame(&mut gpu, &mvp, Tint::new(1.0, 0.5, 0.25, 1.0));

        let values: Vec<UniformValue> = gpu
            .commands()
            .iter()
            .filter_map(|command| match command {
                GpuCommand::SetUniform { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                UniformValue::Mat4(mvp),
                UniformValue::Vec4([1.0, 0.5, 0.25, 1.0]),
            ]
        );
    }
}
