use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone, Timelike};
use crossbeam_channel::unbounded;
use dial::compositor::Compositor;
use dial::config::SchedulerConfig;
use dial::gpu::recording::RecordingBackend;
use dial::scheduler::{
    Cadence, Clock, FaceHandler, FaceLayout, HostEvent, Insets, LifecycleState, ManualClock,
    Scheduler, SurfaceProperties, SystemClock,
};

#[derive(Default)]
struct FaceEvents {
    ready: usize,
    destroyed: Arc<AtomicUsize>,
    time_changes: Vec<(DateTime<Local>, DateTime<Local>)>,
    formats: Vec<bool>,
    ticks: usize,
    ambient: Vec<bool>,
    locales: usize,
    layouts: Vec<FaceLayout>,
}

impl FaceHandler<RecordingBackend> for FaceEvents {
    fn on_renderer_ready(&mut self, compositor: &mut Compositor<RecordingBackend>) {
        self.ready += 1;
        compositor.create_layer(16, 16).expect("layer should create");
    }

    fn on_renderer_destroyed(&mut self, _compositor: &mut Compositor<RecordingBackend>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_time_changed(
        &mut self,
        _compositor: &mut Compositor<RecordingBackend>,
        previous: &DateTime<Local>,
        latest: &DateTime<Local>,
    ) {
        self.time_changes.push((*previous, *latest));
    }

    fn on_24_hour_format_changed(
        &mut self,
        _compositor: &mut Compositor<RecordingBackend>,
        is_24_hour: bool,
    ) {
        self.formats.push(is_24_hour);
    }

    fn on_interactive_tick(&mut self, _compositor: &mut Compositor<RecordingBackend>) {
        self.ticks += 1;
    }

    fn on_ambient_mode_changed(
        &mut self,
        _compositor: &mut Compositor<RecordingBackend>,
        ambient: bool,
    ) {
        self.ambient.push(ambient);
    }

    fn on_locale_changed(&mut self) {
        self.locales += 1;
    }

    fn on_layout(&mut self, _compositor: &mut Compositor<RecordingBackend>, layout: &FaceLayout) {
        self.layouts.push(*layout);
    }
}

type TestScheduler = Scheduler<RecordingBackend, FaceEvents>;

fn at(millis: i64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(1_718_445_600_000 + millis)
        .single()
        .expect("timestamp should be unambiguous")
}

fn scheduler(rate_ms: u64, align: bool) -> (TestScheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(at(0)));
    let config = SchedulerConfig {
        interactive_update_rate_ms: rate_ms,
        align_to_whole_second: align,
    };
    let scheduler = Scheduler::new(
        config,
        FaceEvents::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    (scheduler, clock)
}

fn started(rate_ms: u64, align: bool) -> (TestScheduler, Arc<ManualClock>) {
    let (mut scheduler, clock) = scheduler(rate_ms, align);
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    scheduler.on_visibility_changed(true);
    (scheduler, clock)
}

/// Pumps host events until `done` holds or `timeout` passes.
fn pump_until(
    scheduler: &mut TestScheduler,
    timeout: Duration,
    done: impl Fn(&TestScheduler) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        scheduler.pump();
        if done(scheduler) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn surface_creation_moves_out_of_uninitialized_once() {
    let (mut scheduler, _clock) = scheduler(1000, true);
    assert_eq!(scheduler.state(), LifecycleState::Uninitialized);
    assert!(scheduler.on_draw().is_none());

    scheduler.on_surface_created(RecordingBackend::new(), 0, 64);
    assert_eq!(scheduler.state(), LifecycleState::Uninitialized);

    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    assert_eq!(scheduler.handler().ready, 1);
    assert_eq!(scheduler.state(), LifecycleState::Hidden);
    assert_eq!(scheduler.cadence(), Cadence::TickOnly);
    assert!(scheduler.take_redraw_request());
}

#[test]
fn zero_rate_redraws_continuously() {
    let (mut scheduler, clock) = started(0, true);
    assert_eq!(scheduler.state(), LifecycleState::InteractiveContinuous);
    assert!(!scheduler.is_timer_running());

    scheduler.take_redraw_request();
    let before = scheduler.handler().time_changes.len();
    clock.advance(Duration::from_millis(16));

    let stats = scheduler.on_draw().expect("renderer should be ready");
    assert_eq!(stats.layers_drawn, 1);
    assert_eq!(scheduler.handler().time_changes.len(), before + 1);
    assert!(scheduler.take_redraw_request());
    assert_eq!(scheduler.latest_time(), &at(16));
}

#[test]
fn positive_rate_runs_a_periodic_timer() {
    let (scheduler, _clock) = started(1000, true);
    assert_eq!(scheduler.state(), LifecycleState::InteractivePeriodic);
    assert_eq!(
        scheduler.cadence(),
        Cadence::Periodic {
            period: Duration::from_millis(1000)
        }
    );
    assert!(scheduler.is_timer_running());
}

#[test]
fn ambient_cancels_the_timer_and_interactive_restores_it() {
    let (mut scheduler, _clock) = started(1000, true);
    scheduler.on_ambient_mode_changed(true);
    assert_eq!(scheduler.state(), LifecycleState::Ambient);
    assert!(!scheduler.is_timer_running());
    assert_eq!(scheduler.handler().ambient, vec![true]);

    scheduler.on_ambient_mode_changed(true);
    assert_eq!(scheduler.handler().ambient, vec![true]);

    scheduler.on_ambient_mode_changed(false);
    assert_eq!(scheduler.state(), LifecycleState::InteractivePeriodic);
    assert_eq!(scheduler.handler().ambient, vec![true, false]);
}

#[test]
fn ambient_continuous_face_stops_updating_on_draw() {
    let (mut scheduler, _clock) = started(0, true);
    scheduler.on_ambient_mode_changed(true);
    let before = scheduler.handler().time_changes.len();

    scheduler.on_draw().expect("renderer should be ready");
    scheduler.on_draw().expect("renderer should be ready");
    assert_eq!(scheduler.handler().time_changes.len(), before);
    assert_eq!(scheduler.cadence(), Cadence::TickOnly);
}

#[test]
fn hidden_face_has_no_timer() {
    let (mut scheduler, _clock) = started(1000, true);
    scheduler.on_visibility_changed(false);
    assert_eq!(scheduler.state(), LifecycleState::Hidden);
    assert!(!scheduler.is_timer_running());
}

#[test]
fn ticks_are_ignored_while_the_timer_runs() {
    let (mut scheduler, clock) = started(60_000, false);
    let before = scheduler.handler().time_changes.len();
    scheduler.on_time_tick();
    assert_eq!(scheduler.handler().time_changes.len(), before);

    scheduler.on_ambient_mode_changed(true);
    let before = scheduler.handler().time_changes.len();
    clock.advance(Duration::from_secs(60));
    scheduler.on_time_tick();
    assert_eq!(scheduler.handler().time_changes.len(), before + 1);
    assert_eq!(scheduler.latest_time(), &at(60_000));
}

#[test]
fn time_updates_snapshot_previous_and_latest() {
    let (mut scheduler, clock) = scheduler(1000, true);
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);

    clock.advance(Duration::from_secs(60));
    scheduler.on_time_tick();
    clock.advance(Duration::from_secs(60));
    scheduler.on_system_time_changed();

    assert_eq!(scheduler.previous_time(), &at(60_000));
    assert_eq!(scheduler.latest_time(), &at(120_000));
    assert_eq!(
        scheduler.handler().time_changes.last(),
        Some(&(at(60_000), at(120_000)))
    );
}

#[test]
fn short_rate_timer_fires_are_applied_by_pump() {
    let (mut scheduler, _clock) = started(20, false);
    let fired = pump_until(&mut scheduler, Duration::from_secs(5), |scheduler| {
        scheduler.handler().ticks >= 3
    });
    assert!(fired, "timer should fire at least three times");
    assert!(scheduler.take_redraw_request());
}

#[test]
fn stale_timer_fires_are_discarded() {
    let (mut scheduler, _clock) = started(60_000, false);
    let before = scheduler.handler().time_changes.len();

    scheduler.apply(HostEvent::TimerFired { generation: 0 });
    scheduler.apply(HostEvent::TimerFired {
        generation: u64::MAX,
    });

    assert_eq!(scheduler.handler().ticks, 0);
    assert_eq!(scheduler.handler().time_changes.len(), before);
}

#[test]
fn no_ticks_arrive_after_entering_ambient() {
    let (mut scheduler, _clock) = started(10, false);
    assert!(pump_until(&mut scheduler, Duration::from_secs(5), |scheduler| {
        scheduler.handler().ticks >= 1
    }));

    scheduler.on_ambient_mode_changed(true);
    let ticks = scheduler.handler().ticks;
    thread::sleep(Duration::from_millis(60));
    scheduler.pump();
    assert_eq!(scheduler.handler().ticks, ticks);
}

#[test]
fn first_fire_is_aligned_to_the_next_whole_second() {
    // The clock reads 900 ms past a second, so the first fire is due in
    // 100 ms even though the period is five seconds.
    let clock = Arc::new(ManualClock::new(at(900)));
    let config = SchedulerConfig {
        interactive_update_rate_ms: 5000,
        align_to_whole_second: true,
    };
    let mut scheduler = Scheduler::new(
        config,
        FaceEvents::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);

    let started_at = Instant::now();
    scheduler.on_visibility_changed(true);
    let fired = pump_until(&mut scheduler, Duration::from_secs(3), |scheduler| {
        scheduler.handler().ticks >= 1
    });
    let elapsed = started_at.elapsed();

    assert!(fired, "aligned timer should fire");
    assert!(elapsed >= Duration::from_millis(90), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "fired too late: {elapsed:?}");
}

#[test]
fn aligned_first_fire_lands_on_a_wall_clock_second() {
    let config = SchedulerConfig {
        interactive_update_rate_ms: 0,
        align_to_whole_second: true,
    };
    let mut scheduler = Scheduler::new(
        config,
        FaceEvents::default(),
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    scheduler.on_visibility_changed(true);
    assert_eq!(scheduler.cadence(), Cadence::Continuous);

    let (fired_tx, fired_rx) = unbounded::<DateTime<Local>>();
    scheduler.set_waker(move || {
        if thread::current().name() == Some("dial-timer") {
            let _ = fired_tx.send(Local::now());
        }
    });

    // A single wake-up can be delayed by a busy machine, so keep the best
    // of a few freshly aligned timers.
    let mut best = Duration::MAX;
    for _ in 0..3 {
        scheduler.start_presenting_with_update_rate(Duration::from_millis(1000), true);
        let fired_at = fired_rx
            .recv_timeout(Duration::from_millis(2500))
            .expect("aligned timer should fire");
        scheduler.start_presenting_with_update_rate(Duration::ZERO, true);
        while fired_rx.try_recv().is_ok() {}

        let nanos = u64::from(fired_at.nanosecond() % 1_000_000_000);
        let offset = Duration::from_nanos(nanos.min(1_000_000_000 - nanos));
        best = best.min(offset);
        if best <= Duration::from_millis(1) {
            break;
        }
    }
    assert!(
        best <= Duration::from_millis(1),
        "first fire was {best:?} away from a whole second"
    );
}

#[test]
fn update_rate_override_lasts_until_the_next_transition() {
    let (mut scheduler, _clock) = started(1000, true);
    scheduler.start_presenting_with_update_rate(Duration::ZERO, false);
    assert_eq!(scheduler.cadence(), Cadence::Continuous);
    assert!(!scheduler.is_timer_running());

    scheduler.start_presenting_with_update_rate(Duration::from_millis(250), false);
    assert_eq!(
        scheduler.cadence(),
        Cadence::Periodic {
            period: Duration::from_millis(250)
        }
    );

    scheduler.on_ambient_mode_changed(true);
    scheduler.on_ambient_mode_changed(false);
    assert_eq!(
        scheduler.cadence(),
        Cadence::Periodic {
            period: Duration::from_millis(1000)
        }
    );
}

#[test]
fn twenty_four_hour_notification_fires_only_on_flips() {
    let (mut scheduler, _clock) = started(1000, true);
    scheduler.on_24_hour_preference_changed(true);
    scheduler.on_24_hour_preference_changed(true);
    scheduler.on_time_tick();
    scheduler.on_24_hour_preference_changed(false);

    assert_eq!(scheduler.handler().formats, vec![true, false]);
    assert!(!scheduler.is_24_hour_format());
}

#[test]
fn twenty_four_hour_change_before_the_renderer_is_delivered_later() {
    let (mut scheduler, _clock) = scheduler(1000, true);
    scheduler.on_24_hour_preference_changed(true);
    assert!(!scheduler.is_24_hour_format());

    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    assert_eq!(scheduler.handler().formats, vec![true]);
    assert!(scheduler.is_24_hour_format());
}

#[test]
fn early_ambient_and_layout_are_replayed_on_surface_creation() {
    let (mut scheduler, _clock) = scheduler(1000, true);
    let layout = FaceLayout {
        is_round: true,
        insets: Insets {
            bottom: 24,
            ..Insets::default()
        },
    };
    scheduler.on_ambient_mode_changed(true);
    scheduler.on_layout_changed(layout);
    assert!(scheduler.handler().ambient.is_empty());

    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);
    assert_eq!(scheduler.handler().ambient, vec![true]);
    assert_eq!(scheduler.handler().layouts, vec![layout]);
    assert_eq!(scheduler.state(), LifecycleState::Ambient);
}

#[test]
fn layout_changes_reach_the_face_on_the_next_draw() {
    let (mut scheduler, _clock) = started(1000, true);
    let layout = FaceLayout {
        is_round: true,
        insets: Insets::default(),
    };
    scheduler.take_redraw_request();

    scheduler.on_layout_changed(layout);
    assert!(scheduler.handler().layouts.is_empty());
    assert!(scheduler.take_redraw_request());

    scheduler.on_draw().expect("renderer should be ready");
    assert_eq!(scheduler.handler().layouts, vec![layout]);
    scheduler.on_draw().expect("renderer should be ready");
    assert_eq!(scheduler.handler().layouts.len(), 1);
    assert!(scheduler.is_timer_running());
}

#[test]
fn locale_and_properties_are_forwarded() {
    let (mut scheduler, _clock) = started(1000, true);
    let properties = SurfaceProperties {
        low_bit_ambient: true,
        burn_in_protection: false,
    };
    scheduler.on_properties_changed(properties);
    scheduler.on_locale_changed();

    assert_eq!(scheduler.properties(), properties);
    assert_eq!(scheduler.handler().locales, 1);
}

#[test]
fn events_sent_from_other_threads_apply_on_pump() {
    let (mut scheduler, _clock) = scheduler(1000, true);
    scheduler.on_surface_created(RecordingBackend::new(), 64, 64);

    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakes);
    scheduler.set_waker(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = scheduler.handle();
    thread::spawn(move || {
        assert!(handle.send(HostEvent::VisibilityChanged(true)));
        assert!(handle.send(HostEvent::TwentyFourHourPreferenceChanged(true)));
    })
    .join()
    .expect("sender thread should finish");

    assert!(!scheduler.is_visible());
    assert!(wakes.load(Ordering::SeqCst) >= 2);
    assert_eq!(scheduler.pump(), 2);
    assert!(scheduler.is_visible());
    assert_eq!(scheduler.handler().formats, vec![true]);
}

#[test]
fn destroy_is_idempotent_and_final() {
    let (mut scheduler, _clock) = started(1000, true);
    let destroyed = Arc::clone(&scheduler.handler().destroyed);
    let handle = scheduler.handle();

    scheduler.destroy();
    scheduler.destroy();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), LifecycleState::Destroyed);
    assert!(!scheduler.is_timer_running());
    assert!(scheduler.on_draw().is_none());
    assert!(scheduler.compositor().is_none());

    scheduler.on_visibility_changed(true);
    assert!(!scheduler.is_timer_running());

    drop(scheduler);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(!handle.send(HostEvent::TimeTick));
}

#[test]
fn dropping_on_the_gpu_thread_destroys() {
    let (scheduler, _clock) = started(1000, true);
    let destroyed = Arc::clone(&scheduler.handler().destroyed);
    drop(scheduler);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_off_the_gpu_thread_only_stops_the_timer() {
    let (scheduler, _clock) = started(1000, true);
    let destroyed = Arc::clone(&scheduler.handler().destroyed);
    thread::spawn(move || drop(scheduler))
        .join()
        .expect("drop off the gpu thread should not panic");
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}
