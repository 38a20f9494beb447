//! The GPU capability surface driven by the compositor and shader programs.
//!
//! Calls are immediate-mode and mirror a classic textured-quad pipeline:
//! bind a program, bind a texture, set uniforms, draw the shared unit quad.
//! [`wgpu_backend::WgpuBackend`] renders for real, [`recording::RecordingBackend`]
//! only records what it was asked to do.

pub mod recording;
pub mod wgpu_backend;

use std::fmt;

use crate::error::ShaderError;
use crate::math::Mat4;
use crate::program::ProgramSource;

/// Unit quad corners, shared by every layer.
pub const QUAD_POSITIONS: [[f32; 3]; 4] = [
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
];

pub const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];

/// Two counter-clockwise triangles over [`QUAD_POSITIONS`].
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub const MVP_UNIFORM: &str = "u_MVPMatrix";
pub const COLOR_UNIFORM: &str = "u_Color";

/// Upper bound on the scalar uniforms a custom program may declare.
pub const MAX_PARAMS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

/// Backend-specific handle for a uniform of the currently bound program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Replaces the whole texture.
    Full,
    /// Overwrites the top-left `width x height` region only.
    Partial,
}

/// Region of a texture written by one upload. Always anchored at (0, 0);
/// pixel data is tightly packed premultiplied RGBA8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRegion {
    pub kind: UploadKind,
    pub width: u32,
    pub height: u32,
}

impl UploadRegion {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

pub trait GpuBackend {
    /// Largest texture side the device accepts.
    fn max_texture_dimension(&self) -> u32;

    /// Allocates a `width x height` RGBA8 texture sampled with linear
    /// filtering and clamp-to-edge wrapping.
    fn create_texture(&mut self, width: u32, height: u32) -> TextureId;

    fn upload_texture(&mut self, texture: TextureId, region: UploadRegion, rgba: &[u8]);

    fn delete_texture(&mut self, texture: TextureId);

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn delete_program(&mut self, program: ProgramId);

    /// Starts a frame cleared to transparent black.
    fn begin_frame(&mut self);

    fn use_program(&mut self, program: ProgramId);

    fn bind_texture(&mut self, texture: TextureId);

    /// Sets a uniform on the program bound with [`GpuBackend::use_program`].
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    /// Draws [`QUAD_INDICES`] with the bound program, texture and uniforms.
    fn draw_quad(&mut self);

    fn end_frame(&mut self);
}

/// Checks the custom uniform names a program declares.
pub fn validate_params(source: &ProgramSource) -> Result<(), ShaderError> {
    if source.params.len() > MAX_PARAMS {
        return Err(ShaderError::TooManyUniforms {
            label: source.label.clone(),
            count: source.params.len(),
            max: MAX_PARAMS,
        });
    }

    for (index, name) in source.params.iter().enumerate() {
        let duplicate = source.params[..index].contains(name);
        let reserved = name == MVP_UNIFORM || name == COLOR_UNIFORM;
        if duplicate || reserved || !is_identifier(name) {
            return Err(ShaderError::InvalidUniformName {
                label: source.label.clone(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if name == "_" || name.starts_with("__") {
        return false;
    }
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
