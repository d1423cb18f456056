// the driver: turns per-frame input into sub-steps on the chosen backend
use bevy::log::{debug, trace};
use bevy::prelude::Resource;
use glam::Vec2;

use crate::backend::{BackendKind, SimulationBackend};
use crate::cpu::sph2d::ParticleState;
use crate::error::SimError;
use crate::settings::{InteractionInput, SimulationSettings};

/// Particle state, tunables and the backend that steps them.
#[derive(Resource)]
pub struct Simulation {
    settings: SimulationSettings,
    state: ParticleState,
    backend: Box<dyn SimulationBackend>,
    input: InteractionInput,
    frames_seen: u64,
    paused: bool,
    step_pending: bool,
}

impl Simulation {
    pub fn new(
        settings: SimulationSettings,
        num_particles: usize,
        backend: Box<dyn SimulationBackend>,
    ) -> Result<Self, SimError> {
        settings.validate()?;
        if num_particles == 0 {
            return Err(SimError::NoParticles);
        }
        debug!("simulation with {num_particles} particles on {}", backend.name());
        let state = ParticleState::from_positions(
            settings.spawn.positions(num_particles, settings.bounds_size),
        );
        Ok(Self {
            settings,
            state,
            backend,
            input: InteractionInput::default(),
            frames_seen: 0,
            paused: false,
            step_pending: false,
        })
    }

    /// Advances one rendered frame.
    ///
    /// `delta_time` is clamped to `[0, max_delta_time]`, split over `iterations_per_frame`
    /// sub-steps and scaled by `time_scale`. Warm-up frames and paused frames only record the
    /// pointer.
    pub fn advance(
        &mut self,
        delta_time: f32,
        mouse_position: Vec2,
        is_attract: bool,
        is_repel: bool,
    ) -> Result<(), SimError> {
        self.input = InteractionInput {
            point: mouse_position,
            attract: is_attract,
            repel: is_repel,
        };
        self.frames_seen += 1;
        if self.frames_seen <= u64::from(self.settings.warmup_frames) {
            return Ok(());
        }
        if self.paused && !self.step_pending {
            return Ok(());
        }
        self.step_pending = false;

        let iterations = self.settings.iterations_per_frame;
        let frame_time = delta_time.max(0.0).min(self.settings.max_delta_time);
        let sub_step = frame_time / iterations as f32 * self.settings.time_scale;
        let params = self.settings.step_params(sub_step, &self.input);
        trace!("frame {}: {iterations} x {sub_step}s", self.frames_seen);

        self.backend.run_steps(&mut self.state, &params, iterations)
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.step_pending = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Runs exactly one more frame, then stays paused.
    pub fn step_frame(&mut self) {
        self.paused = true;
        self.step_pending = true;
    }

    /// Re-seeds the current number of particles from the spawn layout, at rest, and pauses.
    pub fn reset(&mut self) {
        self.reseed();
        self.paused = true;
        self.step_pending = false;
    }

    fn reseed(&mut self) {
        let n = self.state.len();
        self.state = ParticleState::from_positions(
            self.settings.spawn.positions(n, self.settings.bounds_size),
        );
    }

    /// Resizes every buffer and re-seeds positions, with zero velocity.
    pub fn set_particle_count(&mut self, n: usize) -> Result<(), SimError> {
        if n == 0 {
            return Err(SimError::NoParticles);
        }
        self.state.resize(n);
        self.reseed();
        Ok(())
    }

    /// Replaces the tunables. Invalid settings are rejected and the old ones kept.
    pub fn set_settings(&mut self, settings: SimulationSettings) -> Result<(), SimError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn state(&self) -> &ParticleState {
        &self.state
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.state.positions
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.state.velocities
    }

    /// Density in `x`, near density in `y`.
    pub fn densities(&self) -> &[Vec2] {
        &self.state.densities
    }

    pub fn interaction_point(&self) -> Vec2 {
        self.input.point
    }

    pub fn interaction_radius(&self) -> f32 {
        self.settings.interaction_radius
    }

    /// Signed strength for the current pointer state, zero when no button is held.
    pub fn interaction_strength(&self) -> f32 {
        self.input.strength(self.settings.interaction_strength)
    }

    pub fn bounds_size(&self) -> Vec2 {
        self.settings.bounds_size
    }

    pub fn particle_count(&self) -> usize {
        self.state.len()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::pool::ThreadPoolBackend;
    use crate::settings::StepParams;

    /// Records every parameter block it is asked to run.
    #[derive(Default)]
    struct Recording {
        calls: std::sync::Arc<std::sync::Mutex<Vec<(StepParams, u32)>>>,
    }

    impl SimulationBackend for Recording {
        fn kind(&self) -> BackendKind {
            BackendKind::ThreadPool
        }

        fn run_steps(
            &mut self,
            _state: &mut ParticleState,
            params: &StepParams,
            iterations: u32,
        ) -> Result<(), SimError> {
            self.calls.lock().unwrap().push((*params, iterations));
            Ok(())
        }
    }

    fn no_warmup() -> SimulationSettings {
        SimulationSettings { warmup_frames: 0, ..Default::default() }
    }

    fn recorded(settings: SimulationSettings) -> (Simulation, std::sync::Arc<std::sync::Mutex<Vec<(StepParams, u32)>>>) {
        let backend = Recording::default();
        let calls = backend.calls.clone();
        (Simulation::new(settings, 16, Box::new(backend)).unwrap(), calls)
    }

    #[test]
    fn rejects_zero_particles_and_bad_radius() {
        let pool = || Box::new(ThreadPoolBackend::with_threads(1).unwrap()) as Box<dyn SimulationBackend>;
        assert!(matches!(
            Simulation::new(SimulationSettings::default(), 0, pool()),
            Err(SimError::NoParticles)
        ));

        let settings = SimulationSettings { smoothing_radius: 0.0, ..Default::default() };
        assert!(matches!(
            Simulation::new(settings, 10, pool()),
            Err(SimError::InvalidSmoothingRadius(_))
        ));
    }

    #[test]
    fn frame_time_is_clamped_split_and_scaled() {
        let settings = SimulationSettings {
            iterations_per_frame: 4,
            max_delta_time: 0.02,
            time_scale: 0.5,
            ..no_warmup()
        };
        let (mut sim, calls) = recorded(settings);

        sim.advance(1.0, Vec2::ZERO, false, false).unwrap();
        sim.advance(-1.0, Vec2::ZERO, false, false).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, 4);
        assert!((calls[0].0.delta_time - 0.02 / 4.0 * 0.5).abs() < 1e-9);
        assert_eq!(calls[1].0.delta_time, 0.0);
    }

    #[test]
    fn warmup_pause_and_single_step() {
        let settings = SimulationSettings { warmup_frames: 2, ..Default::default() };
        let (mut sim, calls) = recorded(settings);

        for _ in 0..2 {
            sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        }
        assert!(calls.lock().unwrap().is_empty());

        sim.pause();
        sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        assert!(calls.lock().unwrap().is_empty());

        sim.step_frame();
        sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(sim.is_paused());

        sim.resume();
        sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn pointer_state_feeds_the_parameters() {
        let (mut sim, calls) = recorded(no_warmup());
        let point = Vec2::new(3.0, 4.0);

        sim.advance(0.01, point, true, false).unwrap();
        assert_eq!(sim.interaction_point(), point);
        assert_eq!(sim.interaction_strength(), 90.0);

        sim.advance(0.01, point, true, true).unwrap();
        assert_eq!(sim.interaction_strength(), -90.0);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0.interaction_point, point);
        assert_eq!(calls[1].0.interaction_strength, -90.0);
    }

    #[test]
    fn particle_count_changes_reseed_at_rest() {
        let mut sim = Simulation::new(
            no_warmup(),
            50,
            Box::new(ThreadPoolBackend::with_threads(2).unwrap()),
        )
        .unwrap();
        for _ in 0..3 {
            sim.advance(1.0 / 60.0, Vec2::ZERO, false, false).unwrap();
        }
        assert!(sim.velocities().iter().any(|v| *v != Vec2::ZERO));

        sim.set_particle_count(80).unwrap();
        assert_eq!(sim.particle_count(), 80);
        assert_eq!(sim.positions().len(), 80);
        assert_eq!(sim.state().spatial.len(), 80);
        assert!(sim.velocities().iter().all(|v| *v == Vec2::ZERO));
        assert!(matches!(sim.set_particle_count(0), Err(SimError::NoParticles)));
    }

    #[test]
    fn warmup_skips_the_first_ten_frames_by_default() {
        let (mut sim, calls) = recorded(SimulationSettings::default());
        for _ in 0..10 {
            sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        }
        assert!(calls.lock().unwrap().is_empty());
        sim.advance(0.01, Vec2::ZERO, false, false).unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn reset_reseeds_and_pauses() {
        let mut sim = Simulation::new(
            no_warmup(),
            40,
            Box::new(ThreadPoolBackend::with_threads(2).unwrap()),
        )
        .unwrap();
        let spawned = sim.positions().to_vec();
        for _ in 0..5 {
            sim.advance(1.0 / 60.0, Vec2::ZERO, false, false).unwrap();
        }
        assert_ne!(sim.positions(), spawned.as_slice());

        sim.reset();
        assert!(sim.is_paused());
        assert_eq!(sim.positions(), spawned.as_slice());
        assert!(sim.velocities().iter().all(|v| *v == Vec2::ZERO));

        sim.advance(1.0 / 60.0, Vec2::ZERO, false, false).unwrap();
        assert_eq!(sim.positions(), spawned.as_slice());
    }

    #[test]
    fn invalid_settings_keep_the_old_ones() {
        let (mut sim, _) = recorded(no_warmup());
        let bad = SimulationSettings { iterations_per_frame: 0, ..Default::default() };
        assert!(sim.set_settings(bad).is_err());
        assert_eq!(sim.settings().iterations_per_frame, 3);
    }

    #[test]
    fn pool_backend_runs_every_stage() {
        let mut sim = Simulation::new(
            no_warmup(),
            64,
            Box::new(ThreadPoolBackend::with_threads(2).unwrap()),
        )
        .unwrap();
        sim.advance(1.0 / 60.0, Vec2::ZERO, false, false).unwrap();
        assert!(sim.densities().iter().all(|d| d.x > 0.0));
        assert_eq!(sim.backend_kind(), BackendKind::ThreadPool);
    }
}
