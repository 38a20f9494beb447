use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use tracing::{debug, error, trace};
use wgpu::util::DeviceExt;

use super::{
    validate_params, GpuBackend, ProgramId, TextureId, UniformLocation, UniformValue, UploadKind,
    UploadRegion, COLOR_UNIFORM, MVP_UNIFORM, QUAD_INDICES, QUAD_POSITIONS, QUAD_UVS,
};
use crate::error::{ShaderError, ShaderStage};
use crate::program::ProgramSource;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Floats per uniform block: mvp (16) + color (4) + params (3 x vec4).
const UNIFORM_FLOATS: usize = 32;
const UNIFORM_BLOCK_SIZE: u64 = (UNIFORM_FLOATS * std::mem::size_of::<f32>()) as u64;
const COLOR_OFFSET: u32 = 16;
const PARAMS_OFFSET: u32 = 20;

/// Declarations every program source is compiled against.
const PRELUDE: &str = r#"
struct LayerUniforms {
  u_MVPMatrix: mat4x4<f32>,
  u_Color: vec4<f32>,
  u_Params: array<vec4<f32>, 3>,
}

@group(0) @binding(0) var<uniform> uniforms: LayerUniforms;
@group(1) @binding(0) var s_Texture: texture_2d<f32>;
@group(1) @binding(1) var s_Sampler: sampler;

struct VertexInput {
  @location(0) position: vec3<f32>,
  @location(1) uv: vec2<f32>,
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

type UniformBlock = [f32; UNIFORM_FLOATS];

struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    params: Vec<String>,
    uniforms: UniformBlock,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct DrawCall {
    program: ProgramId,
    texture: Option<TextureId>,
    uniforms: UniformBlock,
}

/// An adapter/device pair with no presentation surface.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("dial-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Ok(Self { device, queue })
    }
}

/// Renders layers into an offscreen RGBA8 target the size of the surface.
///
/// Calls between `begin_frame` and `end_frame` are recorded and encoded into
/// a single render pass on `end_frame`. Each draw gets its own slot in a
/// dynamic-offset uniform buffer, so uniform state set for one quad never
/// leaks into an earlier one.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    output_texture: wgpu::Texture,
    output_view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    uniform_stride: u64,
    uniform_capacity: usize,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    blank_bind_group: wgpu::BindGroup,
    _blank_texture: wgpu::Texture,
    textures: HashMap<TextureId, WgpuTexture>,
    programs: HashMap<ProgramId, WgpuProgram>,
    next_texture: u32,
    next_program: u32,
    current_program: Option<ProgramId>,
    current_texture: Option<TextureId>,
    frame: Vec<DrawCall>,
}

impl WgpuBackend {
    pub fn new(context: GpuContext, width: u32, height: u32) -> Result<Self> {
        let GpuContext { device, queue } = context;

        let output_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("dial-render-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("surface width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dial-readback-buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("dial-uniform-bind-group-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("dial-texture-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("dial-pipeline-layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("dial-layer-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let vertices: Vec<Vertex> = QUAD_POSITIONS
            .iter()
            .zip(QUAD_UVS.iter())
            .map(|(position, uv)| Vertex {
                position: *position,
                uv: *uv,
            })
            .collect();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dial-quad-vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        // Index data is padded to a multiple of 4 bytes.
        let indices: [u16; 8] = [
            QUAD_INDICES[0],
            QUAD_INDICES[1],
            QUAD_INDICES[2],
            QUAD_INDICES[3],
            QUAD_INDICES[4],
            QUAD_INDICES[5],
            0,
            0,
        ];
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dial-quad-indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let uniform_stride = UNIFORM_BLOCK_SIZE.div_ceil(alignment) * alignment;
        let uniform_capacity = 8;
        let (uniform_buffer, uniform_bind_group) = create_uniform_slots(
            &device,
            &uniform_layout,
            uniform_stride,
            uniform_capacity,
        );

        let blank_texture = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("dial-blank-texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0, 0, 0, 0],
        );
        let blank_bind_group = create_texture_bind_group(
            &device,
            &texture_layout,
            &sampler,
            &blank_texture,
            "dial-blank-bind-group",
        );

        Ok(Self {
            device,
            queue,
            width,
            height,
            output_texture,
            output_view,
            readback_buffer,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
            uniform_layout,
            pipeline_layout,
            texture_layout,
            sampler,
            vertex_buffer,
            index_buffer,
            uniform_stride,
            uniform_capacity,
            uniform_buffer,
            uniform_bind_group,
            blank_bind_group,
            _blank_texture: blank_texture,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_texture: 1,
            next_program: 1,
            current_program: None,
            current_texture: None,
            frame: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Copies the last rendered frame back to the CPU as tightly packed,
    /// premultiplied RGBA8 rows, top row first.
    pub fn read_rgba(&mut self) -> Result<Vec<u8>> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dial-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = self.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let row_bytes = self.unpadded_bytes_per_row as usize;
        let mut frame = vec![0_u8; row_bytes * self.height as usize];
        for (row_index, chunk) in mapped
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.height as usize)
            .enumerate()
        {
            let dst_start = row_index * row_bytes;
            frame[dst_start..dst_start + row_bytes].copy_from_slice(&chunk[..row_bytes]);
        }

        drop(mapped);
        self.readback_buffer.unmap();
        Ok(frame)
    }

    fn compile_stage(
        &self,
        source: &ProgramSource,
        stage: ShaderStage,
        body: &str,
        accessors: &str,
    ) -> Result<wgpu::ShaderModule, ShaderError> {
        let code = format!("{PRELUDE}{accessors}\n{body}");
        let label = format!("dial-{}-{}", source.label, stage);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(code.into()),
            });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(ShaderError::Compile {
                label: source.label.clone(),
                stage,
                message: error.to_string(),
            }),
            None => Ok(module),
        }
    }

    fn ensure_uniform_capacity(&mut self, draws: usize) {
        if draws <= self.uniform_capacity {
            return;
        }
        let capacity = draws.next_power_of_two();
        let (buffer, bind_group) = create_uniform_slots(
            &self.device,
            &self.uniform_layout,
            self.uniform_stride,
            capacity,
        );
        debug!(slots = capacity, "grew uniform buffer");
        self.uniform_buffer = buffer;
        self.uniform_bind_group = bind_group;
        self.uniform_capacity = capacity;
    }
}

impl GpuBackend for WgpuBackend {
    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("dial-layer-texture-{}", id.0)),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let bind_group = create_texture_bind_group(
            &self.device,
            &self.texture_layout,
            &self.sampler,
            &texture,
            &format!("dial-layer-bind-group-{}", id.0),
        );
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                bind_group,
                width,
                height,
            },
        );
        id
    }

    fn upload_texture(&mut self, texture: TextureId, region: UploadRegion, rgba: &[u8]) {
        let Some(target) = self.textures.get(&texture) else {
            error!(texture = texture.0, "upload to unknown texture");
            return;
        };
        if !upload_fits(&region, target.width, target.height, rgba.len()) {
            error!(
                texture = texture.0,
                kind = ?region.kind,
                region_width = region.width,
                region_height = region.height,
                texture_width = target.width,
                texture_height = target.height,
                bytes = rgba.len(),
                "upload does not match texture, skipped"
            );
            return;
        }
        let (width, height) = (region.width, region.height);
        trace!(
            texture = texture.0,
            kind = ?region.kind,
            width,
            height,
            "uploading texture"
        );
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.width * 4),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
        if self.current_texture == Some(texture) {
            self.current_texture = None;
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError> {
        validate_params(source)?;

        let mut accessors = String::new();
        for (index, name) in source.params.iter().enumerate() {
            let component = ["x", "y", "z", "w"][index % 4];
            let _ = writeln!(
                accessors,
                "fn {name}() -> f32 {{ return uniforms.u_Params[{}].{component}; }}",
                index / 4
            );
        }

        let vertex_module =
            self.compile_stage(source, ShaderStage::Vertex, &source.vertex, &accessors)?;
        let fragment_module =
            self.compile_stage(source, ShaderStage::Fragment, &source.fragment, &accessors)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("dial-{}-pipeline", source.label)),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShaderError::Link {
                label: source.label.clone(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(
            id,
            WgpuProgram {
                pipeline,
                params: source.params.clone(),
                uniforms: [0.0; UNIFORM_FLOATS],
            },
        );
        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let entry = self.programs.get(&program)?;
        match name {
            MVP_UNIFORM => Some(UniformLocation(0)),
            COLOR_UNIFORM => Some(UniformLocation(COLOR_OFFSET)),
            _ => entry
                .params
                .iter()
                .position(|param| param == name)
                .map(|index| UniformLocation(PARAMS_OFFSET + index as u32)),
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.frame.retain(|draw| draw.program != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn begin_frame(&mut self) {
        self.frame.clear();
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.current_texture = Some(texture);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(program) = self
            .current_program
            .and_then(|id| self.programs.get_mut(&id))
        else {
            return;
        };
        let offset = location.0 as usize;
        let values: Vec<f32> = match value {
            UniformValue::Float(value) => vec![value],
            UniformValue::Vec4(value) => value.to_vec(),
            UniformValue::Mat4(value) => value.to_cols_array().to_vec(),
        };
        if let Some(slots) = program.uniforms.get_mut(offset..offset + values.len()) {
            slots.copy_from_slice(&values);
        }
    }

    fn draw_quad(&mut self) {
        let Some(program_id) = self.current_program else {
            return;
        };
        let Some(program) = self.programs.get(&program_id) else {
            return;
        };
        self.frame.push(DrawCall {
            program: program_id,
            texture: self.current_texture,
            uniforms: program.uniforms,
        });
    }

    fn end_frame(&mut self) {
        let draws = std::mem::take(&mut self.frame);
        self.ensure_uniform_capacity(draws.len());

        if !draws.is_empty() {
            let stride = self.uniform_stride as usize;
            let mut bytes = vec![0_u8; stride * draws.len()];
            for (index, draw) in draws.iter().enumerate() {
                let start = index * stride;
                bytes[start..start + UNIFORM_BLOCK_SIZE as usize]
                    .copy_from_slice(bytemuck::cast_slice(&draw.uniforms));
            }
            self.queue.write_buffer(&self.uniform_buffer, 0, &bytes);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dial-frame-encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("dial-frame-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            for (index, draw) in draws.iter().enumerate() {
                let Some(program) = self.programs.get(&draw.program) else {
                    continue;
                };
                let texture_bind_group = draw
                    .texture
                    .and_then(|texture| self.textures.get(&texture))
                    .map_or(&self.blank_bind_group, |entry| &entry.bind_group);
                let offset = (index as u64 * self.uniform_stride) as wgpu::DynamicOffset;

                render_pass.set_pipeline(&program.pipeline);
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[offset]);
                render_pass.set_bind_group(1, texture_bind_group, &[]);
                render_pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

fn create_uniform_slots(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    slots: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("dial-uniform-buffer"),
        size: stride * slots as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("dial-uniform-bind-group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE),
            }),
        }],
    });
    (buffer, bind_group)
}

fn create_texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    texture: &wgpu::Texture,
    label: &str,
) -> wgpu::BindGroup {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

/// An upload must carry exactly `region` worth of pixels and stay inside the
/// texture. A full upload covers the whole texture.
fn upload_fits(region: &UploadRegion, width: u32, height: u32, len: usize) -> bool {
    let inside = region.width <= width && region.height <= height;
    let covers =
        region.kind != UploadKind::Full || (region.width, region.height) == (width, height);
    inside && covers && len == region.byte_len()
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up_to_power_of_two() {
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
    }

    #[test]
    fn oversized_or_short_uploads_are_refused() {
        let region = |kind, width, height| UploadRegion {
            kind,
            width,
            height,
        };

        assert!(upload_fits(&region(UploadKind::Full, 8, 8), 8, 8, 256));
        assert!(upload_fits(&region(UploadKind::Partial, 4, 8), 8, 8, 128));

        assert!(!upload_fits(&region(UploadKind::Partial, 9, 8), 8, 8, 288));
        assert!(!upload_fits(&region(UploadKind::Partial, 8, 9), 8, 8, 288));
        assert!(!upload_fits(&region(UploadKind::Partial, 4, 8), 8, 8, 64));
        assert!(!upload_fits(&region(UploadKind::Full, 4, 4), 8, 8, 64));
    }

    #[test]
    fn uniform_block_matches_wgsl_layout() {
        // mat4x4 (64) + vec4 (16) + array<vec4, 3> (48)
        assert_eq!(UNIFORM_BLOCK_SIZE, 128);
        assert_eq!(PARAMS_OFFSET as usize + super::super::MAX_PARAMS, UNIFORM_FLOATS);
    }
}
