// interactive dam break: fluid_demo [pool|gpu|cluster] [particles]
use bevy::prelude::*;
use bevy::sprite::Sprite;
use glam::Vec2 as GVec2;

use sph_fluid2d::{
    DistributedBackend, GpuBackend, SimError, Simulation, SimulationBackend, SimulationSettings,
    SimulationView, SphFluidPlugin, ThreadPoolBackend,
};

#[derive(Component)]
struct ParticleVisual(usize);

const RENDER_SCALE: f32 = 70.0;
const PARTICLE_SIZE: f32 = 6.0;

fn backend(name: &str) -> Result<Box<dyn SimulationBackend>, SimError> {
    Ok(match name {
        "gpu" => Box::new(GpuBackend::new()?),
        "cluster" => Box::new(DistributedBackend::spawn_local(4)?),
        _ => Box::new(ThreadPoolBackend::new()?),
    })
}

fn main() -> Result<(), SimError> {
    let mut args = std::env::args().skip(1);
    let backend_name = args.next().unwrap_or_else(|| "pool".to_string());
    let particles = args.next().and_then(|n| n.parse().ok()).unwrap_or(4000);

    let settings = SimulationSettings::default();
    let view = SimulationView::centred(settings.bounds_size, RENDER_SCALE);
    let sim = Simulation::new(settings.clone(), particles, backend(&backend_name)?)?;

    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(SphFluidPlugin)
        .insert_resource(settings)
        .insert_resource(view)
        .insert_resource(sim)
        .add_systems(Startup, setup)
        .add_systems(Update, sync_particles)
        .run();
    Ok(())
}

fn density_color(t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let u = t * 2.0;
        Color::srgb(0.0, u, 1.0)
    } else if t < 0.75 {
        let u = (t - 0.5) / 0.25;
        Color::srgb(u, 1.0, 1.0 - u)
    } else {
        let u = (t - 0.75) / 0.25;
        Color::srgb(1.0, 1.0 - u, 0.0)
    }
}

fn world(view: &SimulationView, p: GVec2) -> Vec3 {
    let w = view.to_world(p);
    Vec3::new(w.x, w.y, 0.0)
}

fn sync_particles(
    sim: Res<Simulation>,
    settings: Res<SimulationSettings>,
    view: Res<SimulationView>,
    mut query: Query<(&ParticleVisual, &mut Transform, &mut Sprite)>,
) {
    let densities = sim.densities();
    let target = settings.target_density.max(f32::EPSILON);

    for (visual, mut transform, mut sprite) in query.iter_mut() {
        let Some(&pos) = sim.positions().get(visual.0) else { continue; };
        transform.translation = world(&view, pos);

        let density = densities.get(visual.0).map_or(0.0, |d| d.x);
        sprite.color = density_color(density / (2.0 * target));
    }
}

fn setup(mut commands: Commands, sim: Res<Simulation>, view: Res<SimulationView>) {
    commands.spawn(Camera2d);

    for (i, &p) in sim.positions().iter().enumerate() {
        commands.spawn((
            Sprite {
                color: Color::srgb(0.0, 1.0, 1.0),
                custom_size: Some(Vec2::splat(PARTICLE_SIZE)),
                ..Default::default()
            },
            Transform::from_translation(world(&view, p)),
            ParticleVisual(i),
        ));
    }
}
