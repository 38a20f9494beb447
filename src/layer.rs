use std::fmt;

use tiny_skia::{Color, Pixmap};
use tracing::debug;

use crate::compositor::{LayerId, ProgramKey};
use crate::error::CompositorError;
use crate::gpu::{GpuBackend, TextureId, UploadKind};
use crate::math::Mat4;

/// RGBA multiplier applied to a layer when it is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tint {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Tint {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Tint {
    fn default() -> Self {
        Self::WHITE
    }
}

/// The placement last passed to [`RenderLayer::set_transform`].
///
/// The anchor position is in surface pixels with the origin at the top
/// left; the offset is the point of the scaled layer (from its bottom-left
/// corner) that lands on the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerTransform {
    pub angle_degrees: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl LayerTransform {
    fn model_matrix(&self, width: u32, height: u32, surface_height: u32) -> Mat4 {
        Mat4::from_translation(self.anchor_x, surface_height as f32 - self.anchor_y, 0.0)
            * Mat4::from_rotation_z(-self.angle_degrees.to_radians())
            * Mat4::from_translation(-self.offset_x, -self.offset_y, 0.0)
            * Mat4::from_scale(
                width as f32 * self.scale_x,
                height as f32 * self.scale_y,
                1.0,
            )
    }
}

/// One drawable unit of the compositor: a fixed-size pixel canvas, its GPU
/// texture, placement, tint and visibility.
pub struct RenderLayer {
    id: LayerId,
    order: i32,
    width: u32,
    height: u32,
    surface_height: u32,
    pixels: Option<Pixmap>,
    texture: Option<TextureId>,
    texture_initialized: bool,
    use_gpu: bool,
    transform: Option<LayerTransform>,
    model_matrix: Mat4,
    tint: Tint,
    visible: bool,
    program: Option<ProgramKey>,
}

impl fmt::Debug for RenderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLayer")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("size", &(self.width, self.height))
            .field("texture", &self.texture)
            .field("has_pixels", &self.pixels.is_some())
            .field("visible", &self.visible)
            .field("use_gpu", &self.use_gpu)
            .finish_non_exhaustive()
    }
}

impl RenderLayer {
    pub(crate) fn new(
        id: LayerId,
        order: i32,
        width: u32,
        height: u32,
        surface_height: u32,
        texture: Option<TextureId>,
        allocate_pixels: bool,
    ) -> Self {
        let mut layer = Self {
            id,
            order,
            width,
            height,
            surface_height,
            pixels: None,
            use_gpu: texture.is_some(),
            texture,
            texture_initialized: false,
            transform: None,
            model_matrix: Mat4::from_scale(width as f32, height as f32, 1.0),
            tint: Tint::WHITE,
            visible: true,
            program: None,
        };
        if allocate_pixels {
            layer.allocate_pixels();
        }
        layer
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub(crate) fn set_order(&mut self, order: i32) {
        self.order = order;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn is_texture_initialized(&self) -> bool {
        self.texture_initialized
    }

    pub fn uses_gpu(&self) -> bool {
        self.use_gpu
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn tint(&self) -> Tint {
        self.tint
    }

    pub fn set_color_tint(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.tint = Tint::new(r, g, b, a);
    }

    /// Changes only the alpha of the tint.
    pub fn set_alpha(&mut self, alpha: f32) {
        self.tint.a = alpha;
    }

    pub fn program(&self) -> Option<ProgramKey> {
        self.program
    }

    pub(crate) fn set_program(&mut self, program: Option<ProgramKey>) {
        self.program = program;
    }

    pub fn model_matrix(&self) -> &Mat4 {
        &self.model_matrix
    }

    pub fn transform(&self) -> Option<&LayerTransform> {
        self.transform.as_ref()
    }

    /// Places the layer: scale by `scale_x/scale_y`, move the point
    /// `(offset_x, offset_y)` of the scaled layer to the origin, rotate
    /// clockwise on screen by `angle_degrees`, then move to the anchor.
    /// The anchor is given in top-left-origin surface pixels.
    pub fn set_transform(
        &mut self,
        angle_degrees: f32,
        scale_x: f32,
        scale_y: f32,
        anchor_x: f32,
        anchor_y: f32,
        offset_x: f32,
        offset_y: f32,
    ) {
        let transform = LayerTransform {
            angle_degrees,
            scale_x,
            scale_y,
            anchor_x,
            anchor_y,
            offset_x,
            offset_y,
        };
        self.model_matrix = transform.model_matrix(self.width, self.height, self.surface_height);
        self.transform = Some(transform);
    }

    /// [`RenderLayer::set_transform`] pivoting about the scaled layer's center.
    pub fn set_transform_about_center(
        &mut self,
        angle_degrees: f32,
        scale_x: f32,
        scale_y: f32,
        anchor_x: f32,
        anchor_y: f32,
    ) {
        let offset_x = self.width as f32 * scale_x / 2.0;
        let offset_y = self.height as f32 * scale_y / 2.0;
        self.set_transform(
            angle_degrees,
            scale_x,
            scale_y,
            anchor_x,
            anchor_y,
            offset_x,
            offset_y,
        );
    }

    /// The CPU canvas, if one is allocated.
    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixels.as_ref()
    }

    pub fn pixmap_mut(&mut self) -> Option<&mut Pixmap> {
        self.pixels.as_mut()
    }

    /// Erases the canvas to transparent.
    pub fn clear(&mut self) {
        if let Some(pixmap) = self.pixels.as_mut() {
            pixmap.fill(Color::TRANSPARENT);
        }
    }

    /// Allocates a transparent canvas of the layer's size if there is none.
    pub fn allocate_pixels(&mut self) {
        if self.pixels.is_none() {
            self.pixels = Pixmap::new(self.width, self.height);
        }
    }

    pub fn release_pixels(&mut self) {
        self.pixels = None;
    }

    /// Replaces the canvas. It may be smaller than the layer but not larger.
    pub fn set_pixels(&mut self, pixmap: Pixmap) -> Result<(), CompositorError> {
        self.check_fits(pixmap.width(), pixmap.height())?;
        self.pixels = Some(pixmap);
        Ok(())
    }

    fn check_fits(&self, width: u32, height: u32) -> Result<(), CompositorError> {
        if width > self.width || height > self.height {
            return Err(CompositorError::TextureOverflow {
                layer: self.id,
                allocated_width: self.width,
                allocated_height: self.height,
                width,
                height,
            });
        }
        Ok(())
    }

    /// Decides how `width x height` pixels go to the texture: a full upload
    /// the first time, partial afterwards. Pixels larger than the texture
    /// allocated at creation are rejected.
    pub(crate) fn plan_upload(
        &self,
        width: u32,
        height: u32,
    ) -> Result<UploadKind, CompositorError> {
        self.check_fits(width, height)?;
        Ok(if self.texture_initialized {
            UploadKind::Partial
        } else {
            UploadKind::Full
        })
    }

    pub(crate) fn mark_texture_initialized(&mut self) {
        self.texture_initialized = true;
    }

    /// Frees the canvas and the GPU texture.
    pub(crate) fn dispose(&mut self, gpu: &mut dyn GpuBackend) {
        self.pixels = None;
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
            debug!(layer = %self.id, texture = texture.0, "layer texture released");
        }
        self.texture_initialized = false;
    }
}
