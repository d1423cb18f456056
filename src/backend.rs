// stage order and the seams every execution strategy plugs into
use std::fmt;

use bevy::log::trace;
use serde::{Deserialize, Serialize};

use crate::cpu::sph2d::ParticleState;
use crate::error::SimError;
use crate::settings::StepParams;

/// One barrier-separated pass of the timestep. Every stage reads the complete output of the
/// previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    ExternalForces,
    UpdateSpatialHash,
    SortAndOffsets,
    Density,
    PressureForce,
    Viscosity,
    UpdatePositions,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::ExternalForces,
        Stage::UpdateSpatialHash,
        Stage::SortAndOffsets,
        Stage::Density,
        Stage::PressureForce,
        Stage::Viscosity,
        Stage::UpdatePositions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::ExternalForces => "external_forces",
            Stage::UpdateSpatialHash => "update_spatial_hash",
            Stage::SortAndOffsets => "sort_and_offsets",
            Stage::Density => "density",
            Stage::PressureForce => "pressure",
            Stage::Viscosity => "viscosity",
            Stage::UpdatePositions => "update_positions",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    ThreadPool,
    Gpu,
    Distributed,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::ThreadPool => "thread pool",
            BackendKind::Gpu => "gpu",
            BackendKind::Distributed => "distributed",
        })
    }
}

/// Runs a single stage to completion over every particle. Returning is the barrier: nothing
/// of the stage may still be in flight.
pub trait StageExecutor {
    fn run_stage(
        &mut self,
        stage: Stage,
        state: &mut ParticleState,
        params: &StepParams,
    ) -> Result<(), SimError>;
}

/// One full timestep, stage by stage.
pub fn run_pipeline<E: StageExecutor + ?Sized>(
    executor: &mut E,
    state: &mut ParticleState,
    params: &StepParams,
) -> Result<(), SimError> {
    for stage in Stage::ALL {
        trace!("stage {stage} over {} particles", state.len());
        executor.run_stage(stage, state, params)?;
    }
    Ok(())
}

/// An execution strategy the simulation driver can hold. Backends either run the pipeline
/// against the host buffers stage by stage, or keep their own copy and sync it around the
/// sub-steps of a frame.
pub trait SimulationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Advances `state` by `iterations` timesteps of `params.delta_time` each.
    fn run_steps(
        &mut self,
        state: &mut ParticleState,
        params: &StepParams,
        iterations: u32,
    ) -> Result<(), SimError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<Stage>);

    impl StageExecutor for Recorder {
        fn run_stage(
            &mut self,
            stage: Stage,
            _state: &mut ParticleState,
            _params: &StepParams,
        ) -> Result<(), SimError> {
            self.0.push(stage);
            if stage == Stage::Viscosity {
                return Err(SimError::Protocol("stop".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn pipeline_runs_in_order_and_stops_on_error() {
        let params = crate::settings::SimulationSettings::default()
            .step_params(0.01, &Default::default());
        let mut state = ParticleState::default();
        let mut recorder = Recorder(Vec::new());
        let result = run_pipeline(&mut recorder, &mut state, &params);
        assert!(result.is_err());
        assert_eq!(recorder.0, Stage::ALL[..6].to_vec());
    }
}
