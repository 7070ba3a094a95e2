//! Concurrent use of a shared registry.

use std::{error::Error, sync::Barrier, thread};

use richbar::{
    ProgressIteratorExt as _, RecordingRenderer, RenderCoordinator, Status, TaskRegistry,
    TrackOptions,
};

type BoxError = Box<dyn Error + Send + Sync>;

#[test]
fn many_threads_one_task_lose_nothing() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 2_500;

    let registry = TaskRegistry::new();
    let task = registry.create("shared", Some((THREADS * PER_THREAD) as f64), false).unwrap();
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for _ in 0..THREADS {
            let task = &task;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    task.advance(1).unwrap();
                }
            });
        }
    });

    let snap = task.snapshot();
    assert_eq!(snap.current(), (THREADS * PER_THREAD) as u64);
    assert!((snap.fraction() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn workers_each_track_their_own_iterator() {
    let registry = TaskRegistry::new();

    thread::scope(|s| {
        for worker in 0..6 {
            let registry = registry.clone();
            s.spawn(move || {
                let opts = TrackOptions::new(format!("worker {worker}"));
                let sum: u32 = (0..30u32).track_with(&registry, &opts).unwrap().sum();
                assert_eq!(sum, 435);
            });
        }
    });

    let frame = registry.snapshot_all();
    assert_eq!(frame.len(), 6);
    assert!(frame.iter().all(|s| s.status() == Status::Success && s.current() == 30));
}

/// One worker fails while its neighbours finish; only its row turns to error.
#[test]
fn failure_in_one_thread_is_isolated() {
    let registry = TaskRegistry::new();

    let results: Vec<Result<(), BoxError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                s.spawn(move || {
                    let opts = TrackOptions::new(format!("worker {worker}"));
                    registry.try_for_each(0..20, &opts, |n| -> Result<(), BoxError> {
                        if worker == 2 && n == 7 {
                            Err(format!("worker {worker} hit {n}").into())
                        } else {
                            Ok(())
                        }
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let failure = results[2].as_ref().unwrap_err();
    assert_eq!(failure.to_string(), "worker 2 hit 7");
    assert!(results.iter().enumerate().all(|(i, r)| i == 2 || r.is_ok()));

    // Rows are ordered by creation, which races between workers; match by label.
    let frame = registry.snapshot_all();
    assert_eq!(frame.len(), 4);
    for snap in &frame {
        let expected = if snap.description() == "worker 2" {
            Status::Error
        } else {
            Status::Success
        };
        assert_eq!(snap.status(), expected, "{}", snap.description());
    }
}

#[test]
fn panicking_worker_closes_its_task() {
    let registry = TaskRegistry::new();
    let worker_registry = registry.clone();

    let joined = thread::spawn(move || {
        let opts = TrackOptions::new("doomed");
        let _: Result<(), BoxError> = worker_registry.try_for_each(0..10, &opts, |n| {
            assert!(n < 4, "boom at {n}");
            Ok(())
        });
    })
    .join();
    assert!(joined.is_err());

    let snap = &registry.snapshot_all().0[0];
    assert_eq!(snap.status(), Status::Error);
    assert_eq!(snap.error(), Some("panicked"));
    assert_eq!(snap.current(), 5);
}

/// Rendering runs alongside the workers and never blocks them for long.
#[test]
fn background_render_with_concurrent_workers() {
    let registry = TaskRegistry::new();
    let recorder = RecordingRenderer::new();
    let mut coordinator = RenderCoordinator::new(registry.clone(), recorder.clone())
        .with_interval(std::time::Duration::from_millis(2));
    coordinator.start().unwrap();

    thread::scope(|s| {
        for worker in 0..4 {
            let registry = registry.clone();
            s.spawn(move || {
                for round in 0..5 {
                    let opts = TrackOptions::new(format!("w{worker} r{round}")).transient(true);
                    for _ in (0..50).track_with(&registry, &opts).unwrap() {
                        std::hint::spin_loop();
                    }
                }
            });
        }
    });

    coordinator.stop();
    assert!(recorder.is_finished());
    assert!(registry.is_empty(), "every finished task was flushed and pruned");

    // Within every frame rows are in creation order.
    for frame in recorder.frames() {
        assert!(frame.0.windows(2).all(|w| w[0].id() < w[1].id()));
    }
}
