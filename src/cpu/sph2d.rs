// smoothed particle hydrodynamics in 2D, per-particle stages over structure-of-arrays buffers
use glam::Vec2;

use crate::backend::Stage;
use crate::cpu::kernels::{
    density_derivative, density_kernel, near_density_derivative, near_density_kernel,
    viscosity_kernel,
};
use crate::cpu::spatial::SpatialHash;
use crate::settings::{Obstacle, StepParams};

/// Look-ahead used for the neighbour search, independent of the step size.
pub const PREDICTION_FACTOR: f32 = 1.0 / 120.0;

/// Particle buffers, indexed by a dense particle index.
///
/// `densities[i].x` is the density and `densities[i].y` the near density.
#[derive(Clone, Debug, Default)]
pub struct ParticleState {
    pub positions: Vec<Vec2>,
    pub predicted_positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub densities: Vec<Vec2>,
    pub spatial: SpatialHash,
    pub(crate) velocity_snapshot: Vec<Vec2>,
}

impl ParticleState {
    /// Particles at rest at the given positions.
    pub fn from_positions(positions: Vec<Vec2>) -> Self {
        let n = positions.len();
        Self {
            predicted_positions: positions.clone(),
            positions,
            velocities: vec![Vec2::ZERO; n],
            densities: vec![Vec2::ZERO; n],
            spatial: SpatialHash::with_len(n),
            velocity_snapshot: vec![Vec2::ZERO; n],
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Grows or shrinks every buffer. New particles start at the origin, at rest.
    pub fn resize(&mut self, n: usize) {
        self.positions.resize(n, Vec2::ZERO);
        self.predicted_positions.resize(n, Vec2::ZERO);
        self.velocities.resize(n, Vec2::ZERO);
        self.densities.resize(n, Vec2::ZERO);
        self.velocity_snapshot.resize(n, Vec2::ZERO);
        self.spatial.resize(n);
    }

    pub fn neighbours(&self) -> NeighbourView<'_> {
        NeighbourView {
            predicted: &self.predicted_positions,
            spatial: &self.spatial,
        }
    }

    /// Copies the velocities aside so the viscosity stage reads a consistent snapshot.
    pub(crate) fn snapshot_velocities(&mut self) {
        self.velocity_snapshot.clear();
        self.velocity_snapshot.extend_from_slice(&self.velocities);
    }

    /// Runs one stage over every particle on the calling thread.
    pub fn run_stage(&mut self, stage: Stage, params: &StepParams) {
        match stage {
            Stage::ExternalForces => external_forces_batch(
                params,
                &self.positions,
                0,
                &mut self.velocities,
                &mut self.predicted_positions,
            ),
            Stage::UpdateSpatialHash => self
                .spatial
                .update_entries(&self.predicted_positions, params.smoothing_radius),
            Stage::SortAndOffsets => {
                self.spatial.sort();
                self.spatial.calculate_offsets();
            }
            Stage::Density => {
                let view = NeighbourView {
                    predicted: &self.predicted_positions,
                    spatial: &self.spatial,
                };
                density_batch(params, view, 0, &mut self.densities);
            }
            Stage::PressureForce => {
                let view = NeighbourView {
                    predicted: &self.predicted_positions,
                    spatial: &self.spatial,
                };
                pressure_batch(params, view, &self.densities, 0, &mut self.velocities);
            }
            Stage::Viscosity => {
                self.snapshot_velocities();
                let view = NeighbourView {
                    predicted: &self.predicted_positions,
                    spatial: &self.spatial,
                };
                viscosity_batch(params, view, &self.velocity_snapshot, 0, &mut self.velocities);
            }
            Stage::UpdatePositions => {
                update_positions_batch(params, &mut self.positions, &mut self.velocities)
            }
        }
    }

    /// One full timestep, serially.
    pub fn step(&mut self, params: &StepParams) {
        for stage in Stage::ALL {
            self.run_stage(stage, params);
        }
    }
}

/// Read-only neighbour search inputs shared by the density, pressure and viscosity stages.
#[derive(Clone, Copy, Debug)]
pub struct NeighbourView<'a> {
    pub predicted: &'a [Vec2],
    pub spatial: &'a SpatialHash,
}

impl<'a> NeighbourView<'a> {
    /// Particles within `radius` of `pos` as `(index, offset to neighbour, squared distance)`.
    /// The squared distance is tested before anything takes a square root.
    pub fn within(&self, pos: Vec2, radius: f32) -> impl Iterator<Item = (usize, Vec2, f32)> + 'a {
        let predicted = self.predicted;
        let spatial: &'a SpatialHash = self.spatial;
        let sqr_radius = radius * radius;
        spatial.candidates(pos, radius).filter_map(move |j| {
            let offset = *predicted.get(j)? - pos;
            let sqr_dst = offset.length_squared();
            (sqr_dst <= sqr_radius).then_some((j, offset, sqr_dst))
        })
    }
}

// external forces

/// Gravity, plus the pointer pull (or push) for particles inside the interaction radius.
pub fn external_acceleration(params: &StepParams, pos: Vec2, velocity: Vec2) -> Vec2 {
    let gravity = Vec2::new(0.0, params.gravity);
    if params.interaction_strength == 0.0 {
        return gravity;
    }

    let offset = params.interaction_point - pos;
    let sqr_dst = offset.length_squared();
    let radius = params.interaction_radius;
    if sqr_dst >= radius * radius {
        return gravity;
    }

    let dst = sqr_dst.sqrt();
    let centre_t = 1.0 - dst / radius;
    let dir_to_centre = if dst > 0.0 { offset / dst } else { Vec2::ZERO };
    let gravity_weight = 1.0 - centre_t * (params.interaction_strength / 10.0).clamp(0.0, 1.0);
    let accel = gravity * gravity_weight + dir_to_centre * centre_t * params.interaction_strength;
    accel - velocity * centre_t
}

/// New `(velocity, predicted position)` of particle `id`.
pub fn external_forces_at(
    params: &StepParams,
    positions: &[Vec2],
    velocity: Vec2,
    id: usize,
) -> Option<(Vec2, Vec2)> {
    let pos = *positions.get(id)?;
    let velocity = velocity + external_acceleration(params, pos, velocity) * params.delta_time;
    Some((velocity, pos + velocity * PREDICTION_FACTOR))
}

// density

pub fn density_at(params: &StepParams, view: NeighbourView<'_>, id: usize) -> Option<Vec2> {
    let pos = *view.predicted.get(id)?;
    let h = params.smoothing_radius;
    let f = &params.factors;

    let mut density = 0.0;
    let mut near_density = 0.0;
    for (_, _, sqr_dst) in view.within(pos, h) {
        let dst = sqr_dst.sqrt();
        density += density_kernel(dst, h, f);
        near_density += near_density_kernel(dst, h, f);
    }
    Some(Vec2::new(density, near_density))
}

// pressure

/// Velocity of particle `id` after the pressure stage.
///
/// The sum is the pressure gradient. Velocity moves against it, so particles denser than the
/// target density push their neighbours away.
pub fn pressure_velocity_at(
    params: &StepParams,
    view: NeighbourView<'_>,
    densities: &[Vec2],
    velocity: Vec2,
    id: usize,
) -> Option<Vec2> {
    let pos = *view.predicted.get(id)?;
    let own = *densities.get(id)?;
    let h = params.smoothing_radius;
    let f = &params.factors;

    let pressure = params.pressure_from_density(own.x);
    let near_pressure = params.near_pressure_from_density(own.y);

    let mut gradient = Vec2::ZERO;
    for (j, offset, sqr_dst) in view.within(pos, h) {
        if j == id {
            continue;
        }
        let dst = sqr_dst.sqrt();
        let dir = if dst > 0.0 { offset / dst } else { Vec2::Y };

        let neighbour = densities[j];
        let shared_pressure = (pressure + params.pressure_from_density(neighbour.x)) * 0.5;
        let shared_near_pressure =
            (near_pressure + params.near_pressure_from_density(neighbour.y)) * 0.5;

        gradient -= dir * density_derivative(dst, h, f) * shared_pressure / neighbour.x;
        gradient -= dir * near_density_derivative(dst, h, f) * shared_near_pressure / neighbour.y;
    }

    let acceleration = gradient / own.x;
    Some(velocity - acceleration * params.delta_time)
}

// viscosity

/// Velocity of particle `id` after the viscosity stage. `snapshot` holds every particle's
/// velocity as it was when the stage started.
pub fn viscosity_velocity_at(
    params: &StepParams,
    view: NeighbourView<'_>,
    snapshot: &[Vec2],
    id: usize,
) -> Option<Vec2> {
    let pos = *view.predicted.get(id)?;
    let velocity = *snapshot.get(id)?;
    let h = params.smoothing_radius;
    let f = &params.factors;

    let mut relative = Vec2::ZERO;
    for (j, _, sqr_dst) in view.within(pos, h) {
        if j == id {
            continue;
        }
        relative += (velocity - snapshot[j]) * viscosity_kernel(sqr_dst.sqrt(), h, f);
    }
    Some(velocity - relative * params.viscosity_strength * params.delta_time)
}

// integration and collisions

/// Keeps a particle inside `[margin, bounds - margin]` on both axes, reflecting the velocity
/// component of every axis whose bound was crossed.
pub fn handle_collisions(params: &StepParams, pos: &mut Vec2, vel: &mut Vec2) {
    let min = Vec2::splat(params.margin);
    let max = params.bounds_size - min;
    let bounce = -params.collision_damping;

    for axis in 0..2 {
        if pos[axis] < min[axis] {
            pos[axis] = min[axis];
            vel[axis] *= bounce;
        } else if pos[axis] > max[axis] {
            pos[axis] = max[axis];
            vel[axis] *= bounce;
        }
    }

    if let Some(obstacle) = params.obstacle {
        push_out_of_obstacle(&obstacle, bounce, pos, vel);
    }
}

// resolves along the axis with the least penetration
fn push_out_of_obstacle(obstacle: &Obstacle, bounce: f32, pos: &mut Vec2, vel: &mut Vec2) {
    let half = obstacle.size * 0.5;
    let rel = *pos - obstacle.centre;
    let edge_dst = half - rel.abs();
    if edge_dst.x < 0.0 || edge_dst.y < 0.0 {
        return;
    }

    let axis = if edge_dst.x < edge_dst.y { 0 } else { 1 };
    let side = if rel[axis] >= 0.0 { 1.0 } else { -1.0 };
    pos[axis] = obstacle.centre[axis] + half[axis] * side;
    vel[axis] *= bounce;
}

/// New `(position, velocity)` of particle `id`.
pub fn update_position_at(
    params: &StepParams,
    positions: &[Vec2],
    velocity: Vec2,
    id: usize,
) -> Option<(Vec2, Vec2)> {
    let mut pos = *positions.get(id)? + velocity * params.delta_time;
    let mut vel = velocity;
    handle_collisions(params, &mut pos, &mut vel);
    Some((pos, vel))
}

// batches: `start` is the global index of the first slot of the output slice

pub fn external_forces_batch(
    params: &StepParams,
    positions: &[Vec2],
    start: usize,
    velocities: &mut [Vec2],
    predicted: &mut [Vec2],
) {
    for (k, (vel, pred)) in velocities.iter_mut().zip(predicted.iter_mut()).enumerate() {
        if let Some((v, p)) = external_forces_at(params, positions, *vel, start + k) {
            *vel = v;
            *pred = p;
        }
    }
}

pub fn density_batch(
    params: &StepParams,
    view: NeighbourView<'_>,
    start: usize,
    densities: &mut [Vec2],
) {
    for (k, out) in densities.iter_mut().enumerate() {
        if let Some(d) = density_at(params, view, start + k) {
            *out = d;
        }
    }
}

pub fn pressure_batch(
    params: &StepParams,
    view: NeighbourView<'_>,
    densities: &[Vec2],
    start: usize,
    velocities: &mut [Vec2],
) {
    for (k, vel) in velocities.iter_mut().enumerate() {
        if let Some(v) = pressure_velocity_at(params, view, densities, *vel, start + k) {
            *vel = v;
        }
    }
}

pub fn viscosity_batch(
    params: &StepParams,
    view: NeighbourView<'_>,
    snapshot: &[Vec2],
    start: usize,
    velocities: &mut [Vec2],
) {
    for (k, vel) in velocities.iter_mut().enumerate() {
        if let Some(v) = viscosity_velocity_at(params, view, snapshot, start + k) {
            *vel = v;
        }
    }
}

/// `positions` and `velocities` cover the same range here, so indices are local to the batch.
pub fn update_positions_batch(
    params: &StepParams,
    positions: &mut [Vec2],
    velocities: &mut [Vec2],
) {
    for k in 0..velocities.len().min(positions.len()) {
        if let Some((p, v)) = update_position_at(params, positions, velocities[k], k) {
            positions[k] = p;
            velocities[k] = v;
        }
    }
}
