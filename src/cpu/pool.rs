// batched parallel-for over a fixed rayon pool
use bevy::log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::{BackendKind, SimulationBackend, Stage, StageExecutor, run_pipeline};
use crate::cpu::spatial::{bitonic_schedule, block_len, sort_block};
use crate::cpu::sph2d::{
    NeighbourView, ParticleState, density_batch, external_forces_batch, pressure_batch,
    update_positions_batch, viscosity_batch,
};
use crate::error::SimError;
use crate::settings::StepParams;

/// Splits every per-particle stage into one contiguous batch per worker. The scope of each
/// stage only returns once every batch has finished, which is the barrier between stages.
pub struct ThreadPoolBackend {
    pool: ThreadPool,
    threads: usize,
}

impl ThreadPoolBackend {
    /// One worker per hardware thread, minus the thread driving the simulation.
    pub fn new() -> Result<Self, SimError> {
        let hardware = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_threads(hardware.saturating_sub(1))
    }

    pub fn with_threads(threads: usize) -> Result<Self, SimError> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sph-worker-{i}"))
            .build()?;
        info!("thread pool backend with {threads} workers");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Batch length so that `n` particles give at most one batch per worker.
    pub fn batch_len(&self, n: usize) -> usize {
        n.div_ceil(self.threads).max(1)
    }

    fn sort(&self, state: &mut ParticleState) {
        let entries = &mut state.spatial.entries;
        let batch = self.batch_len(entries.len());
        for (stage, step) in bitonic_schedule(entries.len()) {
            let block = block_len(stage, step);
            // whole comparator blocks per task
            let chunk = batch.div_ceil(block) * block;
            let task_chunks = entries.chunks_mut(chunk);
            self.pool.scope(|s| {
                for tasks in task_chunks {
                    s.spawn(move |_| {
                        for b in tasks.chunks_mut(block) {
                            sort_block(b, stage, step);
                        }
                    });
                }
            });
        }
    }
}

impl StageExecutor for ThreadPoolBackend {
    fn run_stage(
        &mut self,
        stage: Stage,
        state: &mut ParticleState,
        params: &StepParams,
    ) -> Result<(), SimError> {
        let batch = self.batch_len(state.len());

        match stage {
            Stage::ExternalForces => {
                let positions = &state.positions;
                let velocities = state.velocities.chunks_mut(batch);
                let predicted = state.predicted_positions.chunks_mut(batch);
                self.pool.scope(|s| {
                    for (b, (vel, pred)) in velocities.zip(predicted).enumerate() {
                        s.spawn(move |_| {
                            external_forces_batch(params, positions, b * batch, vel, pred)
                        });
                    }
                });
            }
            // the offset reset is not safe to share, stays on this thread
            Stage::UpdateSpatialHash => {
                state
                    .spatial
                    .update_entries(&state.predicted_positions, params.smoothing_radius);
            }
            Stage::SortAndOffsets => {
                self.sort(state);
                state.spatial.calculate_offsets();
            }
            Stage::Density => {
                let view = NeighbourView {
                    predicted: &state.predicted_positions,
                    spatial: &state.spatial,
                };
                let densities = state.densities.chunks_mut(batch);
                self.pool.scope(|s| {
                    for (b, out) in densities.enumerate() {
                        s.spawn(move |_| density_batch(params, view, b * batch, out));
                    }
                });
            }
            Stage::PressureForce => {
                let view = NeighbourView {
                    predicted: &state.predicted_positions,
                    spatial: &state.spatial,
                };
                let densities = &state.densities;
                let velocities = state.velocities.chunks_mut(batch);
                self.pool.scope(|s| {
                    for (b, vel) in velocities.enumerate() {
                        s.spawn(move |_| pressure_batch(params, view, densities, b * batch, vel));
                    }
                });
            }
            Stage::Viscosity => {
                state.snapshot_velocities();
                let view = NeighbourView {
                    predicted: &state.predicted_positions,
                    spatial: &state.spatial,
                };
                let snapshot = &state.velocity_snapshot;
                let velocities = state.velocities.chunks_mut(batch);
                self.pool.scope(|s| {
                    for (b, vel) in velocities.enumerate() {
                        s.spawn(move |_| viscosity_batch(params, view, snapshot, b * batch, vel));
                    }
                });
            }
            Stage::UpdatePositions => {
                let positions = state.positions.chunks_mut(batch);
                let velocities = state.velocities.chunks_mut(batch);
                self.pool.scope(|s| {
                    for (pos, vel) in positions.zip(velocities) {
                        s.spawn(move |_| update_positions_batch(params, pos, vel));
                    }
                });
            }
        }
        Ok(())
    }
}

impl SimulationBackend for ThreadPoolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ThreadPool
    }

    fn name(&self) -> String {
        format!("thread pool ({} workers)", self.threads)
    }

    fn run_steps(
        &mut self,
        state: &mut ParticleState,
        params: &StepParams,
        iterations: u32,
    ) -> Result<(), SimError> {
        for _ in 0..iterations {
            run_pipeline(self, state, params)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::spatial::SpatialEntry;
    use crate::settings::{InteractionInput, SimulationSettings};
    use crate::spawn::grid_layout;
    use glam::Vec2;

    fn dam_break(n: usize) -> (ParticleState, StepParams) {
        let settings = SimulationSettings::default();
        let positions = grid_layout(n, 0.12, Vec2::new(5.0, 4.0));
        let input = InteractionInput { point: Vec2::new(5.0, 3.0), attract: true, repel: false };
        (ParticleState::from_positions(positions), settings.step_params(1.0 / 180.0, &input))
    }

    #[test]
    fn batches_cover_every_particle_once() {
        let backend = ThreadPoolBackend::with_threads(3).unwrap();
        for n in [1usize, 2, 3, 4, 10, 11, 1000] {
            let batch = backend.batch_len(n);
            let batches = (0..n).collect::<Vec<_>>();
            let chunks: Vec<_> = batches.chunks(batch).collect();
            assert!(chunks.len() <= 3, "n = {n}");
            assert_eq!(chunks.concat(), batches);
        }
    }

    #[test]
    fn zero_threads_still_gets_a_worker() {
        let backend = ThreadPoolBackend::with_threads(0).unwrap();
        assert_eq!(backend.threads(), 1);
    }

    #[test]
    fn parallel_sort_matches_sequential() {
        let backend = ThreadPoolBackend::with_threads(4).unwrap();
        let (mut state, params) = dam_break(777);
        state.run_stage(Stage::ExternalForces, &params);
        state.run_stage(Stage::UpdateSpatialHash, &params);

        let mut expected: Vec<SpatialEntry> = state.spatial.entries.clone();
        crate::cpu::spatial::bitonic_sort(&mut expected);

        backend.sort(&mut state);
        assert_eq!(state.spatial.entries, expected);
    }

    #[test]
    fn pool_matches_serial_step_exactly() {
        let mut backend = ThreadPoolBackend::with_threads(4).unwrap();
        let (mut serial, params) = dam_break(500);
        let mut pooled = serial.clone();

        for _ in 0..5 {
            serial.step(&params);
        }
        backend.run_steps(&mut pooled, &params, 5).unwrap();

        assert_eq!(pooled.positions, serial.positions);
        assert_eq!(pooled.velocities, serial.velocities);
        assert_eq!(pooled.densities, serial.densities);
    }
}
