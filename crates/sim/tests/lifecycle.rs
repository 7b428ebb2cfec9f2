use glam::DVec3;
use shardworld_common::planar;
use shardworld_sim::{Engine, EngineConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_engine() -> Arc<Engine> {
    Arc::new(Engine::new(EngineConfig {
        cell_size: 10.0,
        tick_hz: 100,
        snapshot_hz: 50,
        target_density_per_cell: 0,
        seed: Some(1),
        ..EngineConfig::default()
    }))
}

#[test]
fn tick_loop_advances_world_and_takes_snapshots() {
    let engine = fast_engine();
    engine.add_or_update_player("p1", "Ada", planar(1.0, 1.0), planar(1.0, 0.0));
    engine.start();
    assert!(engine.is_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.tick() < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(engine.stop(Duration::from_secs(2)));
    assert!(!engine.is_running());
    assert!(engine.tick() >= 10);
    assert!(engine.get_player("p1").unwrap().position().x > 1.0);
    assert!(engine.last_snapshot().is_some());
}

#[test]
fn start_twice_runs_one_loop() {
    let engine = fast_engine();
    let started = Instant::now();
    engine.start();
    engine.start();
    thread::sleep(Duration::from_millis(200));
    assert!(engine.stop(Duration::from_secs(2)));
    // a single 100 Hz loop ticks at most once per elapsed 10 ms
    let bound = started.elapsed().as_millis() as u64 / 10 + 2;
    assert!(engine.tick() <= bound, "tick = {}, bound = {bound}", engine.tick());
}

#[test]
fn stop_is_idempotent_and_final() {
    let engine = fast_engine();
    engine.start();
    assert!(engine.stop(Duration::from_secs(2)));

    let again = Instant::now();
    assert!(engine.stop(Duration::from_secs(10)));
    assert!(again.elapsed() < Duration::from_secs(1));

    let ticks = engine.tick();
    engine.start();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.tick(), ticks);
    assert!(!engine.is_running());
}

#[test]
fn stop_before_start_is_a_noop() {
    let engine = fast_engine();
    assert!(engine.stop(Duration::from_millis(10)));
    engine.start();
    assert!(!engine.is_running());
}

#[test]
fn queries_run_while_ticking() {
    let engine = fast_engine();
    for i in 0..20 {
        engine.add_or_update_player(format!("p{i}"), "x", planar(f64::from(i), 5.0), DVec3::ZERO);
    }
    engine.start();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..200 {
                    let found = engine.query_aoi(planar(5.0, 5.0), 10.0, "");
                    assert!(!found.is_empty());
                }
            })
        })
        .collect();
    for r in readers {
        r.join().unwrap();
    }
    assert!(engine.stop(Duration::from_secs(2)));
    assert_eq!(engine.metrics_snapshot().aoi_queries, 800);
}

#[test]
fn dropping_the_last_handle_ends_the_loop() {
    let engine = fast_engine();
    engine.start();
    let weak = Arc::downgrade(&engine);
    drop(engine);
    let deadline = Instant::now() + Duration::from_secs(2);
    while weak.upgrade().is_some() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(weak.upgrade().is_none());
}
