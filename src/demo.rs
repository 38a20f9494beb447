//! A small analog face used by the `dial render` command: an animated
//! GPU-only background and a CPU-drawn hands layer.

use std::f32::consts::{FRAC_PI_2, TAU};
use std::sync::Arc;

use chrono::{DateTime, Local, Timelike};
use parking_lot::Mutex;
use tiny_skia::{FillRule, LineCap, Paint, PathBuilder, Pixmap, Stroke, Transform};
use tracing::{debug, error};

use crate::compositor::{Compositor, LayerId, LayerOptions};
use crate::config::DemoConfig;
use crate::gpu::{GpuBackend, ProgramId, UniformLocation, UniformValue};
use crate::layer::Tint;
use crate::math::Mat4;
use crate::program::{
    ProgramSource, ProgramState, ShaderProgram, StandardUniforms, STANDARD_VERTEX_SHADER,
};
use crate::scheduler::FaceHandler;

const BACKGROUND_FRAGMENT_SHADER: &str = r#"
struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
  let p = input.uv * 2.0 - vec2<f32>(1.0, 1.0);
  let radius = length(p);
  let angle = atan2(-p.y, p.x);
  let hour_glow = pow(max(cos(angle - u_HourRads()), 0.0), 8.0);
  let minute_glow = pow(max(cos(angle - u_MinRads()), 0.0), 24.0);
  let ripple = 0.5 + 0.5 * sin(radius * 18.0 - u_Time() * 3.0);
  let base = vec3<f32>(0.05, 0.07, 0.12) + vec3<f32>(0.04, 0.06, 0.10) * ripple;
  let rgb = base
    + vec3<f32>(0.35, 0.18, 0.05) * hour_glow
    + vec3<f32>(0.05, 0.20, 0.35) * minute_glow;
  let alpha = 1.0 - smoothstep(0.98, 1.0, radius);
  let tint = uniforms.u_Color;
  return vec4<f32>(rgb * tint.rgb, 1.0) * alpha * tint.a;
}
"#;

const TIME_STEP: f32 = 0.02;

/// Hand angles in radians, measured counter-clockwise from 3 o'clock.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClockAngles {
    pub hour_rads: f32,
    pub minute_rads: f32,
}

impl ClockAngles {
    pub fn at(time: &DateTime<Local>, twenty_four_hour: bool) -> Self {
        let (hour, minute) = hand_fractions(time, twenty_four_hour);
        Self {
            hour_rads: FRAC_PI_2 - hour * TAU,
            minute_rads: FRAC_PI_2 - minute * TAU,
        }
    }
}

/// Fractions of a full turn for the hour and minute hands. A 24-hour dial
/// turns the hour hand once a day, with midnight at the top.
fn hand_fractions(time: &DateTime<Local>, twenty_four_hour: bool) -> (f32, f32) {
    let minute = (time.minute() as f32 + time.second() as f32 / 60.0) / 60.0;
    let hours_per_turn = if twenty_four_hour { 24 } else { 12 };
    let hour = ((time.hour() % hours_per_turn) as f32 + minute) / hours_per_turn as f32;
    (hour, minute)
}

/// Procedural background reading `u_Time`, `u_HourRads` and `u_MinRads`.
pub struct BackgroundProgram {
    source: ProgramSource,
    state: ProgramState,
    uniforms: StandardUniforms,
    time_location: Option<UniformLocation>,
    hour_location: Option<UniformLocation>,
    minute_location: Option<UniformLocation>,
    time: f32,
    angles: Arc<Mutex<ClockAngles>>,
}

impl BackgroundProgram {
    pub fn new(angles: Arc<Mutex<ClockAngles>>) -> Self {
        Self {
            source: ProgramSource::new(
                "background",
                STANDARD_VERTEX_SHADER,
                BACKGROUND_FRAGMENT_SHADER,
            )
            .with_param("u_Time")
            .with_param("u_HourRads")
            .with_param("u_MinRads"),
            state: ProgramState::default(),
            uniforms: StandardUniforms::default(),
            time_location: None,
            hour_location: None,
            minute_location: None,
            time: 0.0,
            angles,
        }
    }
}

impl ShaderProgram for BackgroundProgram {
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
        self.time_location = gpu.uniform_location(handle, "u_Time");
        self.hour_location = gpu.uniform_location(handle, "u_HourRads");
        self.minute_location = gpu.uniform_location(handle, "u_MinRads");
    }

    fn on_frame(&mut self, gpu: &mut dyn GpuBackend, mvp: &Mat4, tint: Tint) {
        self.time += TIME_STEP;
        if self.time > TAU {
            self.time -= TAU;
        }
        let angles = *self.angles.lock();

        self.uniforms.upload(gpu, mvp, tint);
        for (location, value) in [
            (self.time_location, self.time),
            (self.hour_location, angles.hour_rads),
            (self.minute_location, angles.minute_rads),
        ] {
            if let Some(location) = location {
                gpu.set_uniform(location, UniformValue::Float(value));
            }
        }
    }
}

pub struct DemoFace {
    config: DemoConfig,
    angles: Arc<Mutex<ClockAngles>>,
    background: Option<LayerId>,
    hands: Option<LayerId>,
    shown_time: Option<DateTime<Local>>,
    hands_redraws: usize,
    twenty_four_hour: bool,
}

impl DemoFace {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            angles: Arc::new(Mutex::new(ClockAngles::default())),
            background: None,
            hands: None,
            shown_time: None,
            hands_redraws: 0,
            twenty_four_hour: false,
        }
    }

    pub fn background_layer(&self) -> Option<LayerId> {
        self.background
    }

    /// How many times the hands canvas was repainted and uploaded.
    pub fn hands_redraws(&self) -> usize {
        self.hands_redraws
    }

    pub fn angles(&self) -> ClockAngles {
        *self.angles.lock()
    }

    pub fn is_24_hour(&self) -> bool {
        self.twenty_four_hour
    }

    fn redraw_hands<G: GpuBackend>(
        &mut self,
        compositor: &mut Compositor<G>,
        time: &DateTime<Local>,
    ) {
        let Some(id) = self.hands else {
            return;
        };
        let Some(pixmap) = compositor.layer_mut(id).and_then(|layer| layer.pixmap_mut()) else {
            return;
        };
        paint_hands(pixmap, time, self.twenty_four_hour, self.config.hand_color);

        if let Err(err) = compositor.invalidate_layer(id) {
            error!(error = %err, "failed to upload hands");
            return;
        }
        self.hands_redraws += 1;
    }
}

fn paint_hands(
    pixmap: &mut Pixmap,
    time: &DateTime<Local>,
    twenty_four_hour: bool,
    color: [u8; 4],
) {
    pixmap.fill(tiny_skia::Color::TRANSPARENT);

    let (hour, minute) = hand_fractions(time, twenty_four_hour);
    let cx = pixmap.width() as f32 / 2.0;
    let cy = pixmap.height() as f32 / 2.0;
    let radius = cx.min(cy);

    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;

    for (fraction, length, width) in [(hour, 0.5, radius * 0.06), (minute, 0.8, radius * 0.035)] {
        let angle = fraction * TAU;
        let mut builder = PathBuilder::new();
        builder.move_to(cx, cy);
        builder.line_to(
            cx + radius * length * angle.sin(),
            cy - radius * length * angle.cos(),
        );
        let Some(path) = builder.finish() else {
            continue;
        };
        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    if let Some(hub) = PathBuilder::from_circle(cx, cy, radius * 0.05) {
        pixmap.fill_path(&hub, &paint, FillRule::Winding, Transform::identity(), None);
    }
}

impl<G: GpuBackend> FaceHandler<G> for DemoFace {
    fn on_renderer_ready(&mut self, compositor: &mut Compositor<G>) {
        let width = compositor.surface_width();
        let height = compositor.surface_height();
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);

        let background = compositor.create_layer_with(
            width,
            height,
            LayerOptions {
                order: Some(0),
                allocate_pixels: false,
                use_gpu: true,
            },
        );
        let hands = compositor.create_layer_with(width, height, LayerOptions::with_order(1));
        let (background, hands) = match (background, hands) {
            (Ok(background), Ok(hands)) => (background, hands),
            (Err(err), _) | (_, Err(err)) => {
                error!(error = %err, "failed to create face layers");
                return;
            }
        };

        let program =
            compositor.register_program(BackgroundProgram::new(Arc::clone(&self.angles)));
        compositor.attach_program(background, Some(program));

        let [r, g, b, a] = self.config.background_tint;
        if let Some(layer) = compositor.layer_mut(background) {
            layer.set_color_tint(r, g, b, a);
            layer.set_transform_about_center(0.0, 1.0, 1.0, cx, cy);
        }
        if let Some(layer) = compositor.layer_mut(hands) {
            layer.set_transform_about_center(0.0, 1.0, 1.0, cx, cy);
        }

        self.background = Some(background);
        self.hands = Some(hands);
        self.shown_time = None;
        debug!(%background, %hands, "demo face ready");
    }

    fn on_renderer_destroyed(&mut self, compositor: &mut Compositor<G>) {
        for id in [self.background.take(), self.hands.take()].into_iter().flatten() {
            compositor.destroy_layer(id);
        }
    }

    fn on_time_changed(
        &mut self,
        compositor: &mut Compositor<G>,
        _previous: &DateTime<Local>,
        latest: &DateTime<Local>,
    ) {
        *self.angles.lock() = ClockAngles::at(latest, self.twenty_four_hour);

        let minute = |time: &DateTime<Local>| (time.hour(), time.minute());
        if self.shown_time.as_ref().map(minute) != Some(minute(latest)) {
            self.redraw_hands(compositor, latest);
        }
        self.shown_time = Some(*latest);
    }

    fn on_24_hour_format_changed(&mut self, compositor: &mut Compositor<G>, is_24_hour: bool) {
        self.twenty_four_hour = is_24_hour;
        let Some(time) = self.shown_time else {
            return;
        };
        debug!(is_24_hour, "switching dial format");
        *self.angles.lock() = ClockAngles::at(&time, is_24_hour);
        self.redraw_hands(compositor, &time);
    }

    fn on_ambient_mode_changed(&mut self, compositor: &mut Compositor<G>, ambient: bool) {
        if let Some(layer) = self.background.and_then(|id| compositor.layer_mut(id)) {
            layer.set_visible(!ambient);
        }
        if let Some(layer) = self.hands.and_then(|id| compositor.layer_mut(id)) {
            let level = if ambient { 0.6 } else { 1.0 };
            layer.set_color_tint(level, level, level, 1.0);
        }
    }
}
