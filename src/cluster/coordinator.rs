// coordinator side: owns the authoritative buffers and drives workers stage by stage
use std::net::TcpListener;
use std::thread::JoinHandle;

use bevy::log::{error, info, warn};

use crate::backend::{BackendKind, SimulationBackend, Stage, StageExecutor, run_pipeline};
use crate::cluster::transport::{LocalTransport, TcpTransport, Transport};
use crate::cluster::wire::{Message, StageInputs, encode_stage_request, partition};
use crate::cluster::worker;
use crate::cpu::sph2d::ParticleState;
use crate::error::SimError;
use crate::settings::StepParams;

/// Range-partitioned execution over `W` workers.
///
/// Every distributed stage is one broadcast of the stage inputs followed by one blocking
/// receive per worker; slices are applied before the next stage starts. The spatial hash is
/// built, sorted and indexed here and broadcast with the stages that read it.
pub struct DistributedBackend {
    links: Vec<Box<dyn Transport>>,
    local_workers: Vec<JoinHandle<Result<(), SimError>>>,
    shut_down: bool,
}

impl DistributedBackend {
    /// Takes ownership of already connected links and tells every worker its rank.
    pub fn new(links: Vec<Box<dyn Transport>>) -> Result<Self, SimError> {
        if links.is_empty() {
            return Err(SimError::InvalidSettings("distributed backend needs a worker".into()));
        }
        let mut backend = Self { links, local_workers: Vec::new(), shut_down: false };
        let workers = backend.links.len() as u32;
        for (rank, link) in backend.links.iter_mut().enumerate() {
            link.send(&Message::init(rank as u32, workers)?)?;
        }
        Ok(backend)
    }

    /// Runs `workers` workers on threads of this process, connected over channels.
    pub fn spawn_local(workers: usize) -> Result<Self, SimError> {
        let mut links: Vec<Box<dyn Transport>> = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for rank in 0..workers {
            let (coordinator_end, mut worker_end) = LocalTransport::pair();
            let handle = std::thread::Builder::new()
                .name(format!("sph-cluster-{rank}"))
                .spawn(move || worker::serve(&mut worker_end))?;
            links.push(Box::new(coordinator_end));
            handles.push(handle);
        }

        let mut backend = Self::new(links)?;
        backend.local_workers = handles;
        info!("distributed backend with {workers} local workers");
        Ok(backend)
    }

    /// Blocks until `workers` `sph-worker` processes have connected.
    pub fn accept(listener: &TcpListener, workers: usize) -> Result<Self, SimError> {
        let mut links: Vec<Box<dyn Transport>> = Vec::with_capacity(workers);
        while links.len() < workers {
            let (stream, addr) = listener.accept()?;
            info!("worker {} joined from {addr}", links.len());
            links.push(Box::new(TcpTransport::new(stream)?));
        }
        Self::new(links)
    }

    pub fn workers(&self) -> usize {
        self.links.len()
    }

    /// Sends every worker the shutdown message and joins local worker threads.
    pub fn shutdown(&mut self) -> Result<(), SimError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let frame = Message::shutdown();
        let mut first_err = None;
        for link in &mut self.links {
            if let Err(e) = link.send(&frame) {
                first_err.get_or_insert(SimError::from(e));
            }
        }
        for handle in self.local_workers.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(SimError::Protocol("worker thread panicked".into()));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Broadcasts one stage and applies every worker's reply through `apply`.
    fn exchange(
        &mut self,
        stage: Stage,
        params: &StepParams,
        n: usize,
        inputs: &StageInputs<'_>,
        mut apply: impl FnMut(usize, Vec<glam::Vec2>, Vec<glam::Vec2>),
    ) -> Result<(), SimError> {
        let frame = encode_stage_request(stage, params, n, inputs)?;
        for link in &mut self.links {
            link.send(&frame)?;
        }

        let workers = self.links.len();
        for (rank, link) in self.links.iter_mut().enumerate() {
            let reply = match Message::decode(&link.recv()?)? {
                Message::Reply(reply) => reply,
                _ => {
                    return Err(SimError::Protocol(format!(
                        "worker {rank} answered {stage} with something other than a reply"
                    )));
                }
            };
            let range = partition(n, workers, rank);
            if reply.stage != stage
                || reply.start as usize != range.start
                || reply.first.len() != range.len()
            {
                return Err(SimError::Protocol(format!(
                    "worker {rank} replied for {} at {} with {} values, expected {stage} at {} with {}",
                    reply.stage,
                    reply.start,
                    reply.first.len(),
                    range.start,
                    range.len()
                )));
            }
            apply(range.start, reply.first, reply.second);
        }
        Ok(())
    }
}

fn copy_into(dst: &mut [glam::Vec2], start: usize, src: &[glam::Vec2]) {
    let end = (start + src.len()).min(dst.len());
    dst[start..end].copy_from_slice(&src[..end - start]);
}

impl StageExecutor for DistributedBackend {
    fn run_stage(
        &mut self,
        stage: Stage,
        state: &mut ParticleState,
        params: &StepParams,
    ) -> Result<(), SimError> {
        let n = state.len();
        let result = match stage {
            Stage::UpdateSpatialHash => {
                state
                    .spatial
                    .update_entries(&state.predicted_positions, params.smoothing_radius);
                Ok(())
            }
            Stage::SortAndOffsets => {
                state.spatial.sort();
                state.spatial.calculate_offsets();
                Ok(())
            }
            Stage::ExternalForces => {
                let positions = state.positions.clone();
                let velocities = state.velocities.clone();
                let inputs = StageInputs {
                    positions: &positions,
                    velocities: &velocities,
                    ..Default::default()
                };
                self.exchange(stage, params, n, &inputs, |start, vel, pred| {
                    copy_into(&mut state.velocities, start, &vel);
                    copy_into(&mut state.predicted_positions, start, &pred);
                })
            }
            Stage::Density => {
                let predicted = &state.predicted_positions;
                let inputs = StageInputs {
                    predicted,
                    entries: &state.spatial.entries,
                    offsets: &state.spatial.offsets,
                    ..Default::default()
                };
                let mut densities = vec![glam::Vec2::ZERO; n];
                self.exchange(stage, params, n, &inputs, |start, d, _| {
                    copy_into(&mut densities, start, &d);
                })?;
                state.densities = densities;
                Ok(())
            }
            Stage::PressureForce | Stage::Viscosity => {
                let inputs = StageInputs {
                    predicted: &state.predicted_positions,
                    velocities: &state.velocities,
                    densities: match stage {
                        Stage::PressureForce => state.densities.as_slice(),
                        _ => &[],
                    },
                    entries: &state.spatial.entries,
                    offsets: &state.spatial.offsets,
                    ..Default::default()
                };
                let mut velocities = state.velocities.clone();
                self.exchange(stage, params, n, &inputs, |start, v, _| {
                    copy_into(&mut velocities, start, &v);
                })?;
                state.velocities = velocities;
                Ok(())
            }
            Stage::UpdatePositions => {
                let inputs = StageInputs {
                    positions: &state.positions,
                    velocities: &state.velocities,
                    ..Default::default()
                };
                let mut positions = state.positions.clone();
                let mut velocities = state.velocities.clone();
                self.exchange(stage, params, n, &inputs, |start, p, v| {
                    copy_into(&mut positions, start, &p);
                    copy_into(&mut velocities, start, &v);
                })?;
                state.positions = positions;
                state.velocities = velocities;
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!("distributed {stage} failed: {e}");
        }
        result
    }
}

impl SimulationBackend for DistributedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    fn name(&self) -> String {
        format!("distributed ({} workers)", self.links.len())
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

impl Drop for DistributedBackend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("distributed backend shutdown: {e}");
        }
    }
}
