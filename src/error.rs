use thiserror::Error;

use crate::compositor::LayerId;

/// Which half of a program pair failed to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShaderError {
    #[error("{stage} shader of program '{label}' failed to compile: {message}")]
    Compile {
        label: String,
        stage: ShaderStage,
        message: String,
    },
    #[error("program '{label}' failed to link: {message}")]
    Link { label: String, message: String },
    #[error("program '{label}' declares invalid uniform name '{name}'")]
    InvalidUniformName { label: String, name: String },
    #[error("program '{label}' declares {count} uniforms, at most {max} are supported")]
    TooManyUniforms {
        label: String,
        count: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositorError {
    /// The texture of a layer is sized once at creation and never grows.
    #[error(
        "pixels for layer {layer} must fit the texture allocated at creation: \
         allocated {allocated_width}x{allocated_height}, got {width}x{height}"
    )]
    TextureOverflow {
        layer: LayerId,
        allocated_width: u32,
        allocated_height: u32,
        width: u32,
        height: u32,
    },
    #[error("invalid layer size {width}x{height} (each side must be within 1..={max})")]
    InvalidLayerSize { width: u32, height: u32, max: u32 },
}
