//! Ordered layer compositing on a single GPU thread.
//!
//! The compositor owns every [`RenderLayer`], the programs layers are drawn
//! with and a queue of tasks other threads hand over for the next frame.
//! Anything that touches GPU objects checks that it runs on the thread the
//! compositor was created on.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tiny_skia::PixmapRef;
use tracing::{debug, trace, warn};

use crate::error::CompositorError;
use crate::gpu::{GpuBackend, ProgramId, TextureId, UploadKind, UploadRegion};
use crate::layer::RenderLayer;
use crate::math::Mat4;
use crate::program::{ShaderProgram, StandardProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Index of a program registered with [`Compositor::register_program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOptions {
    /// Draw-order key; `None` appends after every existing layer.
    pub order: Option<i32>,
    pub allocate_pixels: bool,
    /// A CPU-only layer has no texture and is never drawn.
    pub use_gpu: bool,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            order: None,
            allocate_pixels: true,
            use_gpu: true,
        }
    }
}

impl LayerOptions {
    pub fn with_order(order: i32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub layers_drawn: usize,
    pub program_binds: usize,
    pub texture_binds: usize,
    pub tasks_run: usize,
}

/// The thread allowed to touch GPU state, captured when the compositor is
/// created.
#[derive(Debug, Clone, Copy)]
struct GpuThread(ThreadId);

impl GpuThread {
    fn current() -> Self {
        Self(thread::current().id())
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.0
    }

    fn check(&self, operation: &str) {
        if !self.is_current() {
            let current = thread::current();
            panic!(
                "{operation} must be called on the GPU thread {:?}, not {:?} ({})",
                self.0,
                current.id(),
                current.name().unwrap_or("unnamed")
            );
        }
    }
}

type Task<G> = Box<dyn FnOnce(&mut Compositor<G>) + Send>;

/// Hands work to the GPU thread. Cloneable and usable from any thread;
/// tasks run in enqueue order at the start of the next [`Compositor::draw`].
pub struct TaskQueue<G> {
    tasks: Arc<Mutex<Vec<Task<G>>>>,
}

impl<G> Clone for TaskQueue<G> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<G> TaskQueue<G> {
    fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&mut Compositor<G>) + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.push(Box::new(task));
        trace!(pending = tasks.len(), "task enqueued");
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self) -> Vec<Task<G>> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

pub struct Compositor<G> {
    gpu: G,
    thread: GpuThread,
    surface_width: u32,
    surface_height: u32,
    view_projection: Mat4,
    layers: Vec<RenderLayer>,
    next_layer_id: u64,
    standard: StandardProgram,
    programs: Vec<Box<dyn ShaderProgram>>,
    queue: TaskQueue<G>,
    finishing: bool,
}

impl<G: GpuBackend> Compositor<G> {
    /// Creates a compositor bound to the calling thread and builds the
    /// standard program.
    pub fn new(mut gpu: G, surface_width: u32, surface_height: u32) -> Self {
        let mut standard = StandardProgram::new();
        standard.compile_and_link(&mut gpu);

        let view_projection = Mat4::orthographic(
            0.0,
            surface_width as f32,
            0.0,
            surface_height as f32,
            -1.0,
            1.0,
        );
        debug!(surface_width, surface_height, "compositor created");

        Self {
            gpu,
            thread: GpuThread::current(),
            surface_width,
            surface_height,
            view_projection,
            layers: Vec::new(),
            next_layer_id: 1,
            standard,
            programs: Vec::new(),
            queue: TaskQueue::new(),
            finishing: false,
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn surface_width(&self) -> u32 {
        self.surface_width
    }

    pub fn surface_height(&self) -> u32 {
        self.surface_height
    }

    pub fn view_projection(&self) -> &Mat4 {
        &self.view_projection
    }

    pub fn is_gpu_thread(&self) -> bool {
        self.thread.is_current()
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    pub fn create_layer(&mut self, width: u32, height: u32) -> Result<LayerId, CompositorError> {
        self.create_layer_with(width, height, LayerOptions::default())
    }

    /// Adds a layer of fixed size. Equal orders keep creation order.
    ///
    /// # Panics
    ///
    /// Panics when called off the GPU thread.
    pub fn create_layer_with(
        &mut self,
        width: u32,
        height: u32,
        options: LayerOptions,
    ) -> Result<LayerId, CompositorError> {
        self.thread.check("create_layer");

        let max = self.gpu.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(CompositorError::InvalidLayerSize { width, height, max });
        }

        let order = options
            .order
            .unwrap_or_else(|| i32::try_from(self.layers.len()).unwrap_or(i32::MAX));
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;

        let texture = options
            .use_gpu
            .then(|| self.gpu.create_texture(width, height));
        self.layers.push(RenderLayer::new(
            id,
            order,
            width,
            height,
            self.surface_height,
            texture,
            options.allocate_pixels,
        ));
        self.layers.sort_by_key(RenderLayer::order);

        debug!(layer = %id, width, height, order, gpu = options.use_gpu, "layer created");
        Ok(id)
    }

    /// Removes a layer and frees its texture and canvas.
    ///
    /// # Panics
    ///
    /// Panics off the GPU thread or if the layer is not managed here.
    pub fn destroy_layer(&mut self, id: LayerId) {
        self.thread.check("destroy_layer");
        let index = self.index_of(id);
        let mut layer = self.layers.remove(index);
        layer.dispose(&mut self.gpu);
        debug!(layer = %id, "layer destroyed");
    }

    pub fn layer(&self, id: LayerId) -> Option<&RenderLayer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut RenderLayer> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }

    /// Layers in draw order.
    pub fn layers(&self) -> impl Iterator<Item = &RenderLayer> {
        self.layers.iter()
    }

    pub fn draw_order(&self) -> Vec<LayerId> {
        self.layers.iter().map(RenderLayer::id).collect()
    }

    pub fn set_layer_order(&mut self, id: LayerId, order: i32) {
        self.thread.check("set_layer_order");
        let index = self.index_of(id);
        self.layers[index].set_order(order);
        self.layers.sort_by_key(RenderLayer::order);
    }

    /// Builds `program` on the GPU thread. One program may serve any number
    /// of layers.
    pub fn register_program<P>(&mut self, program: P) -> ProgramKey
    where
        P: ShaderProgram + 'static,
    {
        self.thread.check("register_program");
        let mut program: Box<dyn ShaderProgram> = Box::new(program);
        program.compile_and_link(&mut self.gpu);
        self.programs.push(program);
        ProgramKey(self.programs.len() - 1)
    }

    pub fn program(&self, key: ProgramKey) -> &dyn ShaderProgram {
        self.programs
            .get(key.0)
            .map(|program| &**program)
            .unwrap_or_else(|| panic!("{key:?} is not registered"))
    }

    pub fn program_mut(&mut self, key: ProgramKey) -> &mut (dyn ShaderProgram + 'static) {
        self.programs
            .get_mut(key.0)
            .map(|program| &mut **program)
            .unwrap_or_else(|| panic!("{key:?} is not registered"))
    }

    pub fn standard_program(&self) -> &StandardProgram {
        &self.standard
    }

    /// Draws `layer` with `program`, or with the standard program for `None`.
    pub fn attach_program(&mut self, layer: LayerId, program: Option<ProgramKey>) {
        self.thread.check("attach_program");
        if let Some(key) = program {
            assert!(key.0 < self.programs.len(), "{key:?} is not registered");
        }
        let index = self.index_of(layer);
        self.layers[index].set_program(program);
    }

    /// Uploads the layer's own canvas to its texture.
    pub fn invalidate_layer(&mut self, id: LayerId) -> Result<(), CompositorError> {
        self.thread.check("invalidate_layer");
        let index = self.index_of(id);
        let layer = &mut self.layers[index];
        if !layer.uses_gpu() {
            warn!(layer = %id, "ignoring invalidate on a layer without GPU presence");
            return Ok(());
        }
        let Some(pixmap) = layer.pixmap() else {
            warn!(layer = %id, "ignoring invalidate on a layer without pixels");
            return Ok(());
        };
        let (width, height) = (pixmap.width(), pixmap.height());
        let kind = layer.plan_upload(width, height)?;
        let Some(texture) = layer.texture() else {
            return Ok(());
        };
        upload(
            &mut self.gpu,
            texture,
            (layer.width(), layer.height()),
            kind,
            (width, height),
            pixmap.data(),
        );
        layer.mark_texture_initialized();
        Ok(())
    }

    /// Uploads external pixels to the layer's texture.
    pub fn invalidate_layer_with(
        &mut self,
        id: LayerId,
        pixels: PixmapRef<'_>,
    ) -> Result<(), CompositorError> {
        self.thread.check("invalidate_layer");
        let index = self.index_of(id);
        let layer = &mut self.layers[index];
        let Some(texture) = layer.texture().filter(|_| layer.uses_gpu()) else {
            warn!(layer = %id, "ignoring invalidate on a layer without GPU presence");
            return Ok(());
        };
        if pixels.data().is_empty() {
            warn!(layer = %id, "ignoring invalidate with empty pixels");
            return Ok(());
        }
        let (width, height) = (pixels.width(), pixels.height());
        let kind = layer.plan_upload(width, height)?;
        upload(
            &mut self.gpu,
            texture,
            (layer.width(), layer.height()),
            kind,
            (width, height),
            pixels.data(),
        );
        layer.mark_texture_initialized();
        Ok(())
    }

    /// Queues `task` for the start of the next frame. Callable from any
    /// thread through [`Compositor::task_queue`].
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&mut Compositor<G>) + Send + 'static,
    {
        self.queue.enqueue(task);
    }

    pub fn task_queue(&self) -> TaskQueue<G> {
        self.queue.clone()
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Renders one frame: clear, run queued tasks, then draw every visible
    /// GPU layer in order. Program and texture binds are skipped when the
    /// previous layer already bound the same one.
    pub fn draw(&mut self) -> FrameStats {
        self.thread.check("draw");
        let mut stats = FrameStats::default();

        self.gpu.begin_frame();
        stats.tasks_run = self.run_pending_tasks();

        if self.finishing || self.layers.is_empty() {
            self.gpu.end_frame();
            return stats;
        }

        let mut bound_program: Option<ProgramId> = None;
        let mut bound_texture: Option<TextureId> = None;
        for layer in &self.layers {
            if !layer.is_visible() || !layer.uses_gpu() {
                continue;
            }
            let Some(texture) = layer.texture() else {
                continue;
            };

            let program: &mut dyn ShaderProgram = match layer.program() {
                Some(key) => self.programs[key.0].as_mut(),
                None => &mut self.standard,
            };
            let Some(handle) = program.handle() else {
                trace!(layer = %layer.id(), "skipping layer with unusable program");
                continue;
            };

            if bound_program != Some(handle) {
                self.gpu.use_program(handle);
                bound_program = Some(handle);
                stats.program_binds += 1;
            }

            let mvp = self.view_projection * *layer.model_matrix();

            if bound_texture != Some(texture) {
                self.gpu.bind_texture(texture);
                bound_texture = Some(texture);
                stats.texture_binds += 1;
            }

            program.on_frame(&mut self.gpu, &mvp, layer.tint());
            self.gpu.draw_quad();
            stats.layers_drawn += 1;
        }

        self.gpu.end_frame();
        trace!(?stats, "frame drawn");
        stats
    }

    /// Releases every texture, canvas and linked program. Later draws only
    /// clear the frame and run queued tasks. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.thread.check("dispose");
        if self.finishing {
            return;
        }
        self.finishing = true;

        for layer in &mut self.layers {
            layer.dispose(&mut self.gpu);
        }
        for program in &mut self.programs {
            if program.is_loaded() {
                program.dispose(&mut self.gpu);
            }
        }
        if self.standard.is_loaded() {
            self.standard.dispose(&mut self.gpu);
        }
        debug!(layers = self.layers.len(), "compositor disposed");
    }

    fn run_pending_tasks(&mut self) -> usize {
        let tasks = self.queue.take();
        let count = tasks.len();
        for task in tasks {
            task(&mut *self);
        }
        count
    }

    fn index_of(&self, id: LayerId) -> usize {
        self.layers
            .iter()
            .position(|layer| layer.id() == id)
            .unwrap_or_else(|| panic!("{id} is not managed by this compositor"))
    }
}

fn upload(
    gpu: &mut dyn GpuBackend,
    texture: TextureId,
    (allocated_width, allocated_height): (u32, u32),
    kind: UploadKind,
    (width, height): (u32, u32),
    rgba: &[u8],
) {
    if kind == UploadKind::Full && (width, height) != (allocated_width, allocated_height) {
        // A full upload always covers the whole texture; pad with transparent.
        let row = width as usize * 4;
        let allocated_row = allocated_width as usize * 4;
        let mut padded = vec![0_u8; allocated_row * allocated_height as usize];
        for (y, src) in rgba.chunks_exact(row).take(height as usize).enumerate() {
            padded[y * allocated_row..y * allocated_row + row].copy_from_slice(src);
        }
        let region = UploadRegion {
            kind,
            width: allocated_width,
            height: allocated_height,
        };
        gpu.upload_texture(texture, region, &padded);
    } else {
        let region = UploadRegion {
            kind,
            width,
            height,
        };
        gpu.upload_texture(texture, region, rgba);
    }
    debug!(texture = texture.0, ?kind, width, height, "texture uploaded");
}
