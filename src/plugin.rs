// bevy glue: reads the pointer and keyboard each frame and advances the simulation
use bevy::input::ButtonInput;
use bevy::log::{error, warn};
use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use glam::Vec2 as GVec2;

use crate::settings::SimulationSettings;
use crate::simulation::Simulation;

/// Maps simulation space onto the 2D world: `world = origin + sim * scale`.
#[derive(Resource, Clone, Copy, Debug)]
pub struct SimulationView {
    pub scale: f32,
    pub origin: GVec2,
}

impl Default for SimulationView {
    fn default() -> Self {
        Self {
            scale: 100.0,
            origin: GVec2::ZERO,
        }
    }
}

impl SimulationView {
    /// View that centres a box of `bounds_size` on the world origin.
    pub fn centred(bounds_size: GVec2, scale: f32) -> Self {
        Self {
            scale,
            origin: -bounds_size * 0.5 * scale,
        }
    }

    pub fn to_world(&self, sim: GVec2) -> GVec2 {
        self.origin + sim * self.scale
    }

    pub fn to_simulation(&self, world: GVec2) -> GVec2 {
        (world - self.origin) / self.scale
    }
}

/// Steps the [`Simulation`] resource every `Update`. Left mouse attracts, right repels, space
/// toggles pause, the right arrow runs one frame and `R` resets and pauses.
///
/// The app inserts the `Simulation` itself, so it can pick the backend. Editing an optional
/// [`SimulationSettings`] resource pushes the new tunables into the simulation.
pub struct SphFluidPlugin;

impl Plugin for SphFluidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SimulationView>()
            .add_systems(Update, (apply_settings, frame_controls, advance_simulation).chain());
    }
}

fn apply_settings(settings: Option<Res<SimulationSettings>>, sim: Option<ResMut<Simulation>>) {
    let (Some(settings), Some(mut sim)) = (settings, sim) else { return; };
    if !settings.is_changed() || *settings == *sim.settings() {
        return;
    }
    if let Err(e) = sim.set_settings(settings.clone()) {
        warn!("ignoring settings change: {e}");
    }
}

fn frame_controls(keys: Res<ButtonInput<KeyCode>>, sim: Option<ResMut<Simulation>>) {
    let Some(mut sim) = sim else { return; };

    if keys.just_pressed(KeyCode::Space) {
        if sim.is_paused() {
            sim.resume();
        } else {
            sim.pause();
        }
    }
    if keys.just_pressed(KeyCode::ArrowRight) {
        sim.step_frame();
    }
    if keys.just_pressed(KeyCode::KeyR) {
        sim.reset();
    }
}

fn advance_simulation(
    sim: Option<ResMut<Simulation>>,
    view: Res<SimulationView>,
    time: Res<Time>,
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    cameras: Query<(&Camera, &GlobalTransform)>,
    mut exit: EventWriter<AppExit>,
) {
    let Some(mut sim) = sim else { return; };

    // keep the last point while the cursor is outside the window
    let mut point = sim.interaction_point();
    if let (Ok(window), Ok((camera, camera_transform))) = (windows.single(), cameras.single()) {
        if let Some(cursor) = window.cursor_position() {
            if let Ok(world) = camera.viewport_to_world_2d(camera_transform, cursor) {
                point = view.to_simulation(GVec2::new(world.x, world.y));
            }
        }
    }

    let attract = buttons.pressed(MouseButton::Left);
    let repel = buttons.pressed(MouseButton::Right);
    if let Err(e) = sim.advance(time.delta_secs(), point, attract, repel) {
        error!("simulation step failed: {e}");
        exit.write(AppExit::error());
    }
}
