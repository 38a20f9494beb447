use std::collections::HashMap;

use super::{
    validate_params, GpuBackend, ProgramId, TextureId, UniformLocation, UniformValue, UploadKind,
    UploadRegion, COLOR_UNIFORM, MVP_UNIFORM,
};
use crate::error::{ShaderError, ShaderStage};
use crate::program::ProgramSource;

const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateTexture {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    UploadTexture {
        texture: TextureId,
        kind: UploadKind,
        width: u32,
        height: u32,
    },
    DeleteTexture(TextureId),
    CreateProgram {
        program: ProgramId,
        label: String,
    },
    DeleteProgram(ProgramId),
    BeginFrame,
    UseProgram(ProgramId),
    BindTexture(TextureId),
    SetUniform {
        program: Option<ProgramId>,
        location: UniformLocation,
        value: UniformValue,
    },
    DrawQuad {
        program: Option<ProgramId>,
        texture: Option<TextureId>,
    },
    EndFrame,
}

/// A backend that touches no GPU and keeps a log of every call.
#[derive(Debug)]
pub struct RecordingBackend {
    commands: Vec<GpuCommand>,
    textures: HashMap<TextureId, (u32, u32)>,
    programs: HashMap<ProgramId, Vec<String>>,
    next_texture: u32,
    next_program: u32,
    bound_program: Option<ProgramId>,
    bound_texture: Option<TextureId>,
    max_texture_dimension: u32,
    failing_marker: Option<String>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_texture: 1,
            next_program: 1,
            bound_program: None,
            bound_texture: None,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            failing_marker: None,
        }
    }

    /// Any program whose vertex or fragment source contains `marker` fails
    /// to compile in that stage.
    pub fn with_failing_marker(mut self, marker: impl Into<String>) -> Self {
        self.failing_marker = Some(marker.into());
        self
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// `(program, texture)` of every quad drawn so far.
    pub fn draws(&self) -> Vec<(Option<ProgramId>, Option<TextureId>)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::DrawQuad { program, texture } => Some((*program, *texture)),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<(TextureId, UploadKind, u32, u32)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::UploadTexture {
                    texture,
                    kind,
                    width,
                    height,
                } => Some((*texture, *kind, *width, *height)),
                _ => None,
            })
            .collect()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied()
    }

    fn failing_stage(&self, source: &ProgramSource) -> Option<ShaderStage> {
        let marker = self.failing_marker.as_deref()?;
        if source.vertex.contains(marker) {
            Some(ShaderStage::Vertex)
        } else if source.fragment.contains(marker) {
            Some(ShaderStage::Fragment)
        } else {
            None
        }
    }
}

impl GpuBackend for RecordingBackend {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        let texture = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(texture, (width, height));
        self.commands.push(GpuCommand::CreateTexture {
            texture,
            width,
            height,
        });
        texture
    }

    fn upload_texture(&mut self, texture: TextureId, region: UploadRegion, rgba: &[u8]) {
        let (width, height) = self
            .textures
            .get(&texture)
            .copied()
            .unwrap_or_else(|| panic!("upload to unknown texture {texture:?}"));
        assert!(
            region.width <= width && region.height <= height,
            "upload {}x{} exceeds texture {}x{}",
            region.width,
            region.height,
            width,
            height
        );
        assert_eq!(rgba.len(), region.byte_len(), "pixel data length mismatch");
        if region.kind == UploadKind::Full {
            assert_eq!((region.width, region.height), (width, height));
        }
        self.commands.push(GpuCommand::UploadTexture {
            texture,
            kind: region.kind,
            width: region.width,
            height: region.height,
        });
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        self.commands.push(GpuCommand::DeleteTexture(texture));
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError> {
        validate_params(source)?;
        if let Some(stage) = self.failing_stage(source) {
            return Err(ShaderError::Compile {
                label: source.label.clone(),
                stage,
                message: "rejected by recording backend".to_owned(),
            });
        }

        let program = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(program, source.params.clone());
        self.commands.push(GpuCommand::CreateProgram {
            program,
            label: source.label.clone(),
        });
        Ok(program)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let params = self.programs.get(&program)?;
        match name {
            MVP_UNIFORM => Some(UniformLocation(0)),
            COLOR_UNIFORM => Some(UniformLocation(1)),
            _ => params
                .iter()
                .position(|param| param == name)
                .map(|index| UniformLocation(2 + index as u32)),
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
        self.commands.push(GpuCommand::DeleteProgram(program));
    }

    fn begin_frame(&mut self) {
        self.commands.push(GpuCommand::BeginFrame);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.bound_program = Some(program);
        self.commands.push(GpuCommand::UseProgram(program));
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.bound_texture = Some(texture);
        self.commands.push(GpuCommand::BindTexture(texture));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        self.commands.push(GpuCommand::SetUniform {
            program: self.bound_program,
            location,
            value,
        });
    }

    fn draw_quad(&mut self) {
        self.commands.push(GpuCommand::DrawQuad {
            program: self.bound_program,
            texture: self.bound_texture,
        });
    }

    fn end_frame(&mut self) {
        self.commands.push(GpuCommand::EndFrame);
    }
}
