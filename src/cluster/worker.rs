// worker side: owns one contiguous range and answers stage requests for it
use bevy::log::{debug, info};

use crate::backend::Stage;
use crate::cluster::transport::Transport;
use crate::cluster::wire::{Message, StageReply, StageRequest, partition};
use crate::cpu::spatial::SpatialHash;
use crate::cpu::sph2d::{
    NeighbourView, density_batch, external_forces_batch, pressure_batch, update_positions_batch,
    viscosity_batch,
};
use crate::error::SimError;

/// Serves stage requests until the coordinator sends a shutdown. Any transport error ends the
/// worker.
pub fn serve<T: Transport + ?Sized>(transport: &mut T) -> Result<(), SimError> {
    let mut assignment: Option<(usize, usize)> = None;

    loop {
        match Message::decode(&transport.recv()?)? {
            Message::Init { rank, workers } => {
                debug!("worker {rank} of {workers} initialised");
                assignment = Some((rank as usize, workers as usize));
            }
            Message::Stage(request) => {
                let Some((rank, workers)) = assignment else {
                    return Err(SimError::Protocol("stage request before init".into()));
                };
                let reply = run_request(*request, rank, workers)?;
                transport.send(&reply.encode()?)?;
            }
            Message::Shutdown => {
                info!("worker shutting down");
                return Ok(());
            }
            Message::Reply(_) => {
                return Err(SimError::Protocol("worker received a stage reply".into()));
            }
        }
    }
}

fn require(name: &str, len: usize, n: usize) -> Result<(), SimError> {
    if len != n {
        return Err(SimError::Protocol(format!("{name} holds {len} values, expected {n}")));
    }
    Ok(())
}

/// Runs one stage over this worker's range and returns that slice of the stage output.
pub fn run_request(
    request: StageRequest,
    rank: usize,
    workers: usize,
) -> Result<StageReply, SimError> {
    let n = request.num_particles as usize;
    let range = partition(n, workers, rank);
    let start = range.start;
    let params = &request.params;
    let stage = request.stage;

    let (first, second) = match stage {
        Stage::ExternalForces => {
            require("positions", request.positions.len(), n)?;
            require("velocities", request.velocities.len(), n)?;
            let mut velocities = request.velocities[range.clone()].to_vec();
            let mut predicted = vec![Default::default(); range.len()];
            external_forces_batch(params, &request.positions, start, &mut velocities, &mut predicted);
            (velocities, predicted)
        }
        Stage::Density | Stage::PressureForce | Stage::Viscosity => {
            require("predicted positions", request.predicted.len(), n)?;
            require("spatial entries", request.entries.len(), n)?;
            require("spatial offsets", request.offsets.len(), n)?;
            let spatial = SpatialHash { entries: request.entries, offsets: request.offsets };
            let view = NeighbourView { predicted: &request.predicted, spatial: &spatial };

            match stage {
                Stage::Density => {
                    let mut densities = vec![Default::default(); range.len()];
                    density_batch(params, view, start, &mut densities);
                    (densities, Vec::new())
                }
                Stage::PressureForce => {
                    require("densities", request.densities.len(), n)?;
                    require("velocities", request.velocities.len(), n)?;
                    let mut velocities = request.velocities[range].to_vec();
                    pressure_batch(params, view, &request.densities, start, &mut velocities);
                    (velocities, Vec::new())
                }
                _ => {
                    // the broadcast velocities are the stage-start snapshot
                    require("velocities", request.velocities.len(), n)?;
                    let mut velocities = request.velocities[range].to_vec();
                    viscosity_batch(params, view, &request.velocities, start, &mut velocities);
                    (velocities, Vec::new())
                }
            }
        }
        Stage::UpdatePositions => {
            require("positions", request.positions.len(), n)?;
            require("velocities", request.velocities.len(), n)?;
            let mut positions = request.positions[range.clone()].to_vec();
            let mut velocities = request.velocities[range].to_vec();
            update_positions_batch(params, &mut positions, &mut velocities);
            (positions, velocities)
        }
        Stage::UpdateSpatialHash | Stage::SortAndOffsets => {
            return Err(SimError::Protocol(format!("{stage} runs on the coordinator")));
        }
    };

    Ok(StageReply { stage, start: start as u32, first, second })
}
