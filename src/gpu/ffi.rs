use bytemuck::{Pod, Zeroable};

use crate::settings::StepParams;

// layouts shared with shaders/sph2d.wgsl, plain arrays rather than glam for WGSL compatibility

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSimParams {
    pub num_particles: u32,
    pub gravity: f32,
    pub delta_time: f32,
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    pub interaction_strength: f32,
    pub interaction_radius: f32,
    pub margin: f32,
    pub bounds_size: [f32; 2],
    pub interaction_point: [f32; 2],
    pub obstacle_size: [f32; 2],
    pub obstacle_centre: [f32; 2],
    pub poly6: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3_deriv: f32,
    pub spiky_pow2_deriv: f32,
    pub obstacle_enabled: u32,
    pub _pad: [u32; 2],
}

impl GpuSimParams {
    pub fn new(params: &StepParams, num_particles: u32) -> Self {
        let f = &params.factors;
        let (obstacle_size, obstacle_centre, obstacle_enabled) = match params.obstacle {
            Some(o) => (o.size.to_array(), o.centre.to_array(), 1),
            None => ([0.0; 2], [0.0; 2], 0),
        };
        Self {
            num_particles,
            gravity: params.gravity,
            delta_time: params.delta_time,
            collision_damping: params.collision_damping,
            smoothing_radius: params.smoothing_radius,
            target_density: params.target_density,
            pressure_multiplier: params.pressure_multiplier,
            near_pressure_multiplier: params.near_pressure_multiplier,
            viscosity_strength: params.viscosity_strength,
            interaction_strength: params.interaction_strength,
            interaction_radius: params.interaction_radius,
            margin: params.margin,
            bounds_size: params.bounds_size.to_array(),
            interaction_point: params.interaction_point.to_array(),
            obstacle_size,
            obstacle_centre,
            poly6: f.poly6,
            spiky_pow3: f.spiky_pow3,
            spiky_pow2: f.spiky_pow2,
            spiky_pow3_deriv: f.spiky_pow3_deriv,
            spiky_pow2_deriv: f.spiky_pow2_deriv,
            obstacle_enabled,
            _pad: [0; 2],
        }
    }
}

/// One bitonic pass, selected per dispatch with a dynamic uniform offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuSortParams {
    pub group_width: u32,
    pub group_height: u32,
    pub step_index: u32,
    pub num_entries: u32,
}

impl GpuSortParams {
    pub fn new(stage_index: u32, step_index: u32, num_entries: u32) -> Self {
        let group_width = 1u32 << (stage_index - step_index);
        Self {
            group_width,
            group_height: 2 * group_width - 1,
            step_index,
            num_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn sim_params_match_wgsl_layout() {
        assert_eq!(size_of::<GpuSimParams>(), 112);
        assert_eq!(offset_of!(GpuSimParams, margin), 44);
        assert_eq!(offset_of!(GpuSimParams, bounds_size), 48);
        assert_eq!(offset_of!(GpuSimParams, obstacle_centre), 72);
        assert_eq!(offset_of!(GpuSimParams, poly6), 80);
        assert_eq!(offset_of!(GpuSimParams, obstacle_enabled), 100);
    }

    #[test]
    fn sort_params_follow_comparator_network() {
        assert_eq!(size_of::<GpuSortParams>(), 16);
        let p = GpuSortParams::new(3, 1, 100);
        assert_eq!(p.group_width, 4);
        assert_eq!(p.group_height, 7);
        assert_eq!(p.step_index, 1);
        assert_eq!(p.num_entries, 100);
    }
}
