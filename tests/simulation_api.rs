use glam::Vec2;
use sph_fluid2d::{
    DistributedBackend, SimError, Simulation, SimulationSettings, SpawnLayout, SpawnSettings,
    ThreadPoolBackend,
};

fn no_warmup() -> SimulationSettings {
    SimulationSettings { warmup_frames: 0, ..Default::default() }
}

fn pool() -> Box<ThreadPoolBackend> {
    Box::new(ThreadPoolBackend::with_threads(2).unwrap())
}

#[test]
fn particles_stay_inside_the_box() {
    let settings = no_warmup();
    let bounds = settings.bounds_size;
    let margin = settings.particle_radius;
    let mut sim = Simulation::new(settings, 600, pool()).unwrap();

    for _ in 0..120 {
        sim.advance(1.0 / 60.0, Vec2::new(8.0, 4.0), false, true).unwrap();
    }
    for p in sim.positions() {
        assert!(p.x >= margin && p.x <= bounds.x - margin, "{p}");
        assert!(p.y >= margin && p.y <= bounds.y - margin, "{p}");
    }
}

#[test]
fn gravity_pulls_the_block_down() {
    let mut sim = Simulation::new(no_warmup(), 200, pool()).unwrap();
    let mean_y = |sim: &Simulation| sim.positions().iter().map(|p| p.y).sum::<f32>() / 200.0;

    let before = mean_y(&sim);
    for _ in 0..30 {
        sim.advance(1.0 / 60.0, Vec2::ZERO, false, false).unwrap();
    }
    assert!(mean_y(&sim) < before);
}

#[test]
fn region_spawn_and_settings_round_trip_through_json() {
    let json = r#"{
        "iterations_per_frame": 2,
        "gravity": 0.0,
        "spawn": { "layout": { "Region": { "centre": [3.0, 3.0], "size": [2.0, 1.0] } }, "jitter": 0.01, "seed": 7 }
    }"#;
    let settings = SimulationSettings::from_json_str(json).unwrap();
    assert_eq!(settings.iterations_per_frame, 2);
    assert!(matches!(settings.spawn.layout, SpawnLayout::Region { .. }));

    let sim = Simulation::new(settings, 50, pool()).unwrap();
    for p in sim.positions() {
        assert!((p.x - 3.0).abs() <= 1.1 && (p.y - 3.0).abs() <= 0.6, "{p}");
    }
}

#[test]
fn bad_json_is_a_config_error() {
    assert!(matches!(
        SimulationSettings::from_json_str("{ \"gravity\": \"down\" }"),
        Err(SimError::Config(_))
    ));
}

#[test]
fn backends_can_be_swapped_behind_the_driver() {
    let settings = SimulationSettings {
        spawn: SpawnSettings::default(),
        ..no_warmup()
    };
    let mut on_pool = Simulation::new(settings.clone(), 120, pool()).unwrap();
    let mut on_cluster =
        Simulation::new(settings, 120, Box::new(DistributedBackend::spawn_local(2).unwrap())).unwrap();

    for _ in 0..5 {
        on_pool.advance(1.0 / 60.0, Vec2::new(5.0, 2.0), true, false).unwrap();
        on_cluster.advance(1.0 / 60.0, Vec2::new(5.0, 2.0), true, false).unwrap();
    }
    assert_eq!(on_pool.positions(), on_cluster.positions());
    assert_eq!(on_cluster.backend_name(), "distributed (2 workers)");
}
