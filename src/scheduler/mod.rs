//! Decides when a face redraws and keeps every GPU call on the GPU thread.
//!
//! The scheduler owns the [`Compositor`] once the surface exists and runs in
//! one of three cadences:
//!
//! * continuous: each draw immediately schedules the next time update,
//! * periodic: a [`PeriodicTimer`] fires at the interactive update rate,
//! * tick only: ambient or hidden faces update on host time ticks.
//!
//! Host events may be applied directly on the GPU thread or sent from any
//! thread through a [`SchedulerHandle`] and applied by [`Scheduler::pump`].
//! The periodic timer goes through the same channel, so its thread never
//! touches the compositor.

pub mod clock;
pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::compositor::{Compositor, FrameStats};
use crate::config::SchedulerConfig;
use crate::gpu::GpuBackend;

pub use clock::{delay_until_whole_second, Clock, ManualClock, SystemClock};
pub use timer::PeriodicTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Continuous,
    Periodic { period: Duration },
    TickOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No surface yet.
    Uninitialized,
    InteractiveContinuous,
    InteractivePeriodic,
    Ambient,
    /// Interactive but not on screen; updates on ticks only.
    Hidden,
    Destroyed,
}

/// Informational display capabilities reported by the host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceProperties {
    pub low_bit_ambient: bool,
    pub burn_in_protection: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Insets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Screen shape and system insets, forwarded to the face once the renderer
/// exists.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaceLayout {
    pub is_round: bool,
    pub insets: Insets,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    AmbientModeChanged(bool),
    VisibilityChanged(bool),
    TimeTick,
    /// Date, time or time zone changed.
    SystemTimeChanged,
    TwentyFourHourPreferenceChanged(bool),
    PropertiesChanged(SurfaceProperties),
    LocaleChanged,
    LayoutChanged(FaceLayout),
    TimerFired { generation: u64 },
}

/// Callbacks a face implements. All of them run on the GPU thread, and those
/// taking a compositor only run once the renderer exists.
pub trait FaceHandler<G: GpuBackend> {
    /// The compositor was just created; build layers and programs here.
    fn on_renderer_ready(&mut self, compositor: &mut Compositor<G>);

    /// The compositor is about to release every GPU resource.
    fn on_renderer_destroyed(&mut self, _compositor: &mut Compositor<G>) {}

    fn on_time_changed(
        &mut self,
        _compositor: &mut Compositor<G>,
        _previous: &DateTime<Local>,
        _latest: &DateTime<Local>,
    ) {
    }

    fn on_24_hour_format_changed(&mut self, _compositor: &mut Compositor<G>, _is_24_hour: bool) {}

    /// Runs right before each timer-driven time update.
    fn on_interactive_tick(&mut self, _compositor: &mut Compositor<G>) {}

    fn on_ambient_mode_changed(&mut self, _compositor: &mut Compositor<G>, _ambient: bool) {}

    fn on_locale_changed(&mut self) {}

    fn on_layout(&mut self, _compositor: &mut Compositor<G>, _layout: &FaceLayout) {}
}

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Sends host events to a [`Scheduler`] from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    events: Sender<HostEvent>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl SchedulerHandle {
    /// Queues `event` and wakes the GPU thread. Returns `false` once the
    /// scheduler is gone.
    pub fn send(&self, event: HostEvent) -> bool {
        if self.events.send(event).is_err() {
            return false;
        }
        self.wake();
        true
    }

    fn wake(&self) {
        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

pub struct Scheduler<G: GpuBackend, H: FaceHandler<G>> {
    config: SchedulerConfig,
    handler: H,
    clock: Arc<dyn Clock>,
    compositor: Option<Compositor<G>>,
    events: Receiver<HostEvent>,
    handle: SchedulerHandle,
    previous_time: DateTime<Local>,
    latest_time: DateTime<Local>,
    ambient: bool,
    visible: bool,
    twenty_four_hour_preference: bool,
    twenty_four_hour_format: bool,
    continuous: bool,
    timer: Option<PeriodicTimer>,
    timer_generation: u64,
    properties: SurfaceProperties,
    layout: Option<FaceLayout>,
    layout_pending: bool,
    redraw_requested: bool,
    destroyed: bool,
}

impl<G: GpuBackend, H: FaceHandler<G>> Scheduler<G, H> {
    /// A scheduler starts invisible, interactive and without a renderer.
    pub fn new(config: SchedulerConfig, handler: H, clock: Arc<dyn Clock>) -> Self {
        let (sender, events) = unbounded();
        let now = clock.now();
        Self {
            config,
            handler,
            clock,
            compositor: None,
            events,
            handle: SchedulerHandle {
                events: sender,
                waker: Arc::new(Mutex::new(None)),
            },
            previous_time: now,
            latest_time: now,
            ambient: false,
            visible: false,
            twenty_four_hour_preference: false,
            twenty_four_hour_format: false,
            continuous: false,
            timer: None,
            timer_generation: 0,
            properties: SurfaceProperties::default(),
            layout: None,
            layout_pending: false,
            redraw_requested: false,
            destroyed: false,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Installs the closure called whenever a redraw is requested or an
    /// event is sent through a handle. It may run on any thread.
    pub fn set_waker<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.handle.waker.lock() = Some(Arc::new(waker));
    }

    /// Creates the compositor on the calling thread, which becomes the GPU
    /// thread. Only the first call with a non-empty surface has an effect.
    pub fn on_surface_created(&mut self, gpu: G, width: u32, height: u32) {
        if self.destroyed || self.compositor.is_some() {
            return;
        }
        if width == 0 || height == 0 {
            warn!(width, height, "ignoring empty surface");
            return;
        }

        let mut compositor = Compositor::new(gpu, width, height);
        self.handler.on_renderer_ready(&mut compositor);
        if self.ambient {
            self.handler.on_ambient_mode_changed(&mut compositor, true);
        }
        if let Some(layout) = self.layout {
            self.handler.on_layout(&mut compositor, &layout);
            self.layout_pending = false;
        }
        self.compositor = Some(compositor);
        info!(width, height, "renderer ready");

        self.update_time_and_invalidate();
        if self.visible {
            self.check_time_updater();
        }
    }

    /// Draws a frame. In continuous cadence the next time update is requested
    /// right away.
    pub fn on_draw(&mut self) -> Option<FrameStats> {
        if self.destroyed {
            return None;
        }
        let compositor = self.compositor.as_mut()?;

        let mut relayout = false;
        if self.layout_pending {
            if let Some(layout) = self.layout {
                self.handler.on_layout(compositor, &layout);
                relayout = true;
            }
            self.layout_pending = false;
        }
        let stats = compositor.draw();

        if relayout {
            self.check_time_updater();
        }
        if !self.ambient && self.visible && self.continuous {
            self.update_time_and_invalidate();
        }
        Some(stats)
    }

    /// Host time tick, typically once a minute. Ignored while a periodic
    /// timer is driving updates.
    pub fn on_time_tick(&mut self) {
        if self.destroyed || self.compositor.is_none() || self.is_timer_running() {
            return;
        }
        self.update_time_and_invalidate();
    }

    pub fn on_ambient_mode_changed(&mut self, ambient: bool) {
        if self.destroyed || self.ambient == ambient {
            return;
        }
        self.ambient = ambient;
        debug!(ambient, "ambient mode changed");

        if let Some(compositor) = self.compositor.as_mut() {
            self.handler.on_ambient_mode_changed(compositor, ambient);
            self.update_time_and_invalidate();
        }
        self.check_time_updater();
    }

    pub fn on_visibility_changed(&mut self, visible: bool) {
        if self.destroyed {
            return;
        }
        self.visible = visible;
        debug!(visible, "visibility changed");

        if visible {
            self.update_time_and_invalidate();
        }
        self.check_time_updater();
    }

    /// Date, time or time zone changed on the host.
    pub fn on_system_time_changed(&mut self) {
        if self.destroyed {
            return;
        }
        self.update_time_and_invalidate();
    }

    /// The notification fires on the next time update with a renderer, and
    /// only when the value actually differs from the last one reported.
    pub fn on_24_hour_preference_changed(&mut self, is_24_hour: bool) {
        if self.destroyed {
            return;
        }
        self.twenty_four_hour_preference = is_24_hour;
        self.update_time_and_invalidate();
    }

    pub fn on_properties_changed(&mut self, properties: SurfaceProperties) {
        self.properties = properties;
        debug!(
            low_bit_ambient = properties.low_bit_ambient,
            burn_in_protection = properties.burn_in_protection,
            "surface properties changed"
        );
    }

    pub fn on_locale_changed(&mut self) {
        if self.destroyed {
            return;
        }
        self.handler.on_locale_changed();
        self.update_time_and_invalidate();
    }

    /// Stores the layout; the face sees it on the next draw.
    pub fn on_layout_changed(&mut self, layout: FaceLayout) {
        if self.destroyed {
            return;
        }
        self.layout = Some(layout);
        if self.compositor.is_some() {
            self.layout_pending = true;
            self.request_redraw();
        }
    }

    /// Overrides the interactive update rate until the next cadence change.
    /// A zero rate redraws continuously.
    pub fn start_presenting_with_update_rate(
        &mut self,
        rate: Duration,
        align_to_whole_second: bool,
    ) {
        if self.destroyed {
            return;
        }
        self.apply_cadence(rate, align_to_whole_second);
    }

    /// Applies every queued host event. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    pub fn apply(&mut self, event: HostEvent) {
        match event {
            HostEvent::AmbientModeChanged(ambient) => self.on_ambient_mode_changed(ambient),
            HostEvent::VisibilityChanged(visible) => self.on_visibility_changed(visible),
            HostEvent::TimeTick => self.on_time_tick(),
            HostEvent::SystemTimeChanged => self.on_system_time_changed(),
            HostEvent::TwentyFourHourPreferenceChanged(value) => {
                self.on_24_hour_preference_changed(value)
            }
            HostEvent::PropertiesChanged(properties) => self.on_properties_changed(properties),
            HostEvent::LocaleChanged => self.on_locale_changed(),
            HostEvent::LayoutChanged(layout) => self.on_layout_changed(layout),
            HostEvent::TimerFired { generation } => self.on_timer_fired(generation),
        }
    }

    /// Returns and clears the pending redraw request.
    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw_requested)
    }

    /// Cancels the timer, lets the face release its objects and disposes the
    /// compositor. Safe to call more than once or before any surface exists.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel_time_updater();
        self.continuous = false;

        if let Some(mut compositor) = self.compositor.take() {
            self.handler.on_renderer_destroyed(&mut compositor);
            compositor.dispose();
        }
        *self.handle.waker.lock() = None;
        info!("scheduler destroyed");
    }

    pub fn state(&self) -> LifecycleState {
        if self.destroyed {
            return LifecycleState::Destroyed;
        }
        if self.compositor.is_none() {
            return LifecycleState::Uninitialized;
        }
        match self.cadence() {
            Cadence::Continuous => LifecycleState::InteractiveContinuous,
            Cadence::Periodic { .. } => LifecycleState::InteractivePeriodic,
            Cadence::TickOnly if self.ambient => LifecycleState::Ambient,
            Cadence::TickOnly => LifecycleState::Hidden,
        }
    }

    pub fn cadence(&self) -> Cadence {
        if self.continuous && !self.ambient && self.visible {
            return Cadence::Continuous;
        }
        match &self.timer {
            Some(timer) => Cadence::Periodic {
                period: timer.period(),
            },
            None => Cadence::TickOnly,
        }
    }

    pub fn latest_time(&self) -> &DateTime<Local> {
        &self.latest_time
    }

    pub fn previous_time(&self) -> &DateTime<Local> {
        &self.previous_time
    }

    pub fn is_ambient(&self) -> bool {
        self.ambient
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_24_hour_format(&self) -> bool {
        self.twenty_four_hour_format
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer.as_ref().is_some_and(PeriodicTimer::is_running)
    }

    pub fn properties(&self) -> SurfaceProperties {
        self.properties
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn compositor(&self) -> Option<&Compositor<G>> {
        self.compositor.as_ref()
    }

    pub fn compositor_mut(&mut self) -> Option<&mut Compositor<G>> {
        self.compositor.as_mut()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn on_timer_fired(&mut self, generation: u64) {
        if self.destroyed || self.timer.is_none() || generation != self.timer_generation {
            return;
        }
        if let Some(compositor) = self.compositor.as_mut() {
            self.handler.on_interactive_tick(compositor);
        }
        self.update_time_and_invalidate();
    }

    fn update_time_and_invalidate(&mut self) {
        self.previous_time = self.latest_time;
        self.latest_time = self.clock.now();

        if let Some(compositor) = self.compositor.as_mut() {
            self.handler
                .on_time_changed(compositor, &self.previous_time, &self.latest_time);

            if self.twenty_four_hour_format != self.twenty_four_hour_preference {
                self.twenty_four_hour_format = self.twenty_four_hour_preference;
                self.handler
                    .on_24_hour_format_changed(compositor, self.twenty_four_hour_format);
            }
        }
        self.request_redraw();
    }

    fn request_redraw(&mut self) {
        self.redraw_requested = true;
        self.handle.wake();
    }

    fn check_time_updater(&mut self) {
        let rate = Duration::from_millis(self.config.interactive_update_rate_ms);
        self.apply_cadence(rate, self.config.align_to_whole_second);
    }

    fn apply_cadence(&mut self, rate: Duration, align_to_whole_second: bool) {
        self.cancel_time_updater();
        if self.ambient || !self.visible {
            self.continuous = false;
            return;
        }

        if rate.is_zero() {
            self.continuous = true;
            debug!("continuous redraw");
            self.update_time_and_invalidate();
            return;
        }

        self.continuous = false;
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let handle = self.handle.clone();
        // Read the clock last so nothing runs between it and the timer start.
        let initial_delay = if align_to_whole_second {
            delay_until_whole_second(&self.clock.now())
        } else {
            Duration::ZERO
        };
        let timer = PeriodicTimer::start(initial_delay, rate, move || {
            handle.send(HostEvent::TimerFired { generation });
        })
        .unwrap_or_else(|err| panic!("failed to start the time updater thread: {err}"));
        self.timer = Some(timer);
    }

    fn cancel_time_updater(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.timer_generation += 1;
    }
}

impl<G: GpuBackend, H: FaceHandler<G>> Drop for Scheduler<G, H> {
    fn drop(&mut self) {
        let on_gpu_thread = self
            .compositor
            .as_ref()
            .map_or(true, Compositor::is_gpu_thread);
        if on_gpu_thread {
            self.destroy();
        } else {
            warn!("scheduler dropped off the GPU thread; GPU resources are not released");
            self.cancel_time_updater();
        }
    }
}
