use std::sync::Arc;
use std::thread;

use dial::compositor::Compositor;
use dial::gpu::recording::{GpuCommand, RecordingBackend};
use parking_lot::Mutex;

#[test]
fn tasks_from_three_threads_run_once_in_enqueue_order() {
    let mut compositor = Compositor::new(RecordingBackend::new(), 64, 64);
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let queue = compositor.task_queue();
        let log = Arc::clone(&log);
        thread::Builder::new()
            .name(format!("producer-{name}"))
            .spawn(move || {
                queue.enqueue(move |_compositor: &mut Compositor<RecordingBackend>| {
                    log.lock().push(name);
                });
            })
            .expect("producer thread should spawn")
            .join()
            .expect("producer thread should finish");
    }
    assert_eq!(compositor.pending_tasks(), 3);
    assert!(log.lock().is_empty());

    let stats = compositor.draw();
    assert_eq!(stats.tasks_run, 3);
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    assert_eq!(compositor.pending_tasks(), 0);

    compositor.draw();
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn concurrent_producers_lose_no_tasks() {
    let mut compositor = Compositor::new(RecordingBackend::new(), 64, 64);
    let counter = Arc::new(Mutex::new(0_usize));

    thread::scope(|scope| {
        for _ in 0..4 {
            let queue = compositor.task_queue();
            let counter = Arc::clone(&counter);
            scope.spawn(move || {
                for _ in 0..25 {
                    let counter = Arc::clone(&counter);
                    queue.enqueue(move |_compositor: &mut Compositor<RecordingBackend>| {
                        *counter.lock() += 1;
                    });
                }
            });
        }
    });

    assert_eq!(compositor.draw().tasks_run, 100);
    assert_eq!(*counter.lock(), 100);
}

#[test]
fn tasks_run_after_the_clear_and_before_layer_draws() {
    let mut compositor = Compositor::new(RecordingBackend::new(), 64, 64);
    compositor.enqueue(|compositor| {
        compositor
            .create_layer(16, 16)
            .expect("layer should create on the gpu thread");
    });
    assert_eq!(compositor.layers().count(), 0);
    compositor.gpu_mut().clear_commands();

    let stats = compositor.draw();
    assert_eq!(stats.layers_drawn, 1);

    let commands = compositor.gpu().commands();
    let created = commands
        .iter()
        .position(|command| matches!(command, GpuCommand::CreateTexture { .. }))
        .expect("task should create a texture");
    let drawn = commands
        .iter()
        .position(|command| matches!(command, GpuCommand::DrawQuad { .. }))
        .expect("new layer should be drawn");
    assert_eq!(commands.first(), Some(&GpuCommand::BeginFrame));
    assert!(created < drawn);
}

#[test]
fn task_enqueued_during_a_frame_waits_for_the_next_one() {
    let mut compositor = Compositor::new(RecordingBackend::new(), 64, 64);
    let log = Arc::new(Mutex::new(Vec::new()));

    let outer_log = Arc::clone(&log);
    compositor.enqueue(move |compositor| {
        outer_log.lock().push("outer");
        let inner_log = Arc::clone(&outer_log);
        compositor.enqueue(move |_compositor| inner_log.lock().push("inner"));
    });

    assert_eq!(compositor.draw().tasks_run, 1);
    assert_eq!(*log.lock(), vec!["outer"]);
    assert_eq!(compositor.pending_tasks(), 1);

    assert_eq!(compositor.draw().tasks_run, 1);
    assert_eq!(*log.lock(), vec!["outer", "inner"]);
}

#[test]
fn tasks_still_run_after_dispose() {
    let mut compositor = Compositor::new(RecordingBackend::new(), 64, 64);
    compositor.create_layer(8, 8).expect("layer should create");
    compositor.dispose();

    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    compositor.enqueue(move |_compositor| *flag.lock() = true);

    let stats = compositor.draw();
    assert!(*ran.lock());
    assert_eq!(stats.layers_drawn, 0);
}
