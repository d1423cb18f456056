// simulation tunables and the per-frame parameter block derived from them
use std::path::Path;

use bevy::prelude::Resource;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::cpu::kernels::ScalingFactors;
use crate::error::SimError;
use crate::spawn::SpawnSettings;

/// Axis-aligned box particles are kept out of.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub centre: Vec2,
    pub size: Vec2,
}

/// Rarely changed tunables. Replace them between frames with
/// [`Simulation::set_settings`](crate::simulation::Simulation::set_settings).
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub time_scale: f32,
    pub iterations_per_frame: u32,
    /// Frame times are clamped to this before being split into sub-steps.
    pub max_delta_time: f32,
    /// Frames skipped after start-up, their delta times are unreliable.
    pub warmup_frames: u32,
    pub gravity: f32,
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    /// The box spans `[0, bounds_size]` on both axes.
    pub bounds_size: Vec2,
    /// Rendered particle radius, used as the collision margin.
    pub particle_radius: f32,
    pub interaction_radius: f32,
    pub interaction_strength: f32,
    pub obstacle: Option<Obstacle>,
    pub spawn: SpawnSettings,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            iterations_per_frame: 3,
            max_delta_time: 1.0 / 60.0,
            warmup_frames: 10,
            gravity: -12.0,
            collision_damping: 0.95,
            smoothing_radius: 0.35,
            target_density: 55.0,
            pressure_multiplier: 500.0,
            near_pressure_multiplier: 18.0,
            viscosity_strength: 0.06,
            bounds_size: Vec2::new(17.0, 9.0),
            particle_radius: 0.05,
            interaction_radius: 2.0,
            interaction_strength: 90.0,
            obstacle: None,
            spawn: SpawnSettings::default(),
        }
    }
}

impl SimulationSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Rejects settings the kernels or the collision box cannot work with.
    pub fn validate(&self) -> Result<(), SimError> {
        let h = self.smoothing_radius;
        if !(h.is_finite() && h > 0.0) {
            return Err(SimError::InvalidSmoothingRadius(h));
        }
        if self.iterations_per_frame == 0 {
            return Err(SimError::InvalidSettings("iterations_per_frame must be at least 1".into()));
        }
        if !(self.max_delta_time.is_finite() && self.max_delta_time > 0.0) {
            return Err(SimError::InvalidSettings(format!(
                "max_delta_time must be positive, got {}",
                self.max_delta_time
            )));
        }
        if !(self.time_scale.is_finite() && self.time_scale >= 0.0) {
            return Err(SimError::InvalidSettings(format!(
                "time_scale must be non-negative, got {}",
                self.time_scale
            )));
        }
        if !(self.particle_radius >= 0.0)
            || self.bounds_size.cmple(Vec2::splat(2.0 * self.particle_radius)).any()
        {
            return Err(SimError::InvalidSettings(format!(
                "bounds {} leave no room for particles of radius {}",
                self.bounds_size, self.particle_radius
            )));
        }
        if !(self.interaction_radius >= 0.0) {
            return Err(SimError::InvalidSettings(format!(
                "interaction_radius must be non-negative, got {}",
                self.interaction_radius
            )));
        }
        Ok(())
    }

    /// Builds the parameter block for one frame. Scaling factors are derived here, once,
    /// rather than inside the stages.
    pub fn step_params(&self, delta_time: f32, input: &InteractionInput) -> StepParams {
        StepParams {
            gravity: self.gravity,
            delta_time,
            collision_damping: self.collision_damping,
            smoothing_radius: self.smoothing_radius,
            target_density: self.target_density,
            pressure_multiplier: self.pressure_multiplier,
            near_pressure_multiplier: self.near_pressure_multiplier,
            viscosity_strength: self.viscosity_strength,
            bounds_size: self.bounds_size,
            margin: self.particle_radius,
            interaction_point: input.point,
            interaction_strength: input.strength(self.interaction_strength),
            interaction_radius: self.interaction_radius,
            obstacle: self.obstacle,
            factors: ScalingFactors::from_radius(self.smoothing_radius),
        }
    }
}

/// Pointer state injected by the renderer every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InteractionInput {
    pub point: Vec2,
    pub attract: bool,
    pub repel: bool,
}

impl InteractionInput {
    /// Signed interaction strength: positive pulls towards the point, negative pushes away.
    /// Repel wins when both buttons are held.
    pub fn strength(&self, base: f32) -> f32 {
        if self.repel {
            -base
        } else if self.attract {
            base
        } else {
            0.0
        }
    }
}

/// Everything a stage reads besides the particle buffers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    pub gravity: f32,
    pub delta_time: f32,
    pub collision_damping: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    pub bounds_size: Vec2,
    pub margin: f32,
    pub interaction_point: Vec2,
    pub interaction_strength: f32,
    pub interaction_radius: f32,
    pub obstacle: Option<Obstacle>,
    pub factors: ScalingFactors,
}

impl StepParams {
    #[inline]
    pub fn pressure_from_density(&self, density: f32) -> f32 {
        (density - self.target_density) * self.pressure_multiplier
    }

    #[inline]
    pub fn near_pressure_from_density(&self, near_density: f32) -> f32 {
        self.near_pressure_multiplier * near_density
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SimulationSettings::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_smoothing_radius() {
        for h in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let settings = SimulationSettings { smoothing_radius: h, ..Default::default() };
            assert!(matches!(settings.validate(), Err(SimError::InvalidSmoothingRadius(_))));
        }
    }

    #[test]
    fn rejects_box_smaller_than_margin() {
        let settings = SimulationSettings {
            bounds_size: Vec2::new(0.1, 5.0),
            particle_radius: 0.05,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(SimError::InvalidSettings(_))));
    }

    #[test]
    fn interaction_strength_sign() {
        let mut input = InteractionInput::default();
        assert_eq!(input.strength(90.0), 0.0);
        input.attract = true;
        assert_eq!(input.strength(90.0), 90.0);
        input.repel = true;
        assert_eq!(input.strength(90.0), -90.0);
    }

    #[test]
    fn step_params_carry_frame_input() {
        let settings = SimulationSettings::default();
        let input = InteractionInput { point: Vec2::new(3.0, 4.0), attract: false, repel: true };
        let params = settings.step_params(0.004, &input);
        assert_eq!(params.delta_time, 0.004);
        assert_eq!(params.interaction_point, Vec2::new(3.0, 4.0));
        assert_eq!(params.interaction_strength, -settings.interaction_strength);
        assert_eq!(params.factors, ScalingFactors::from_radius(settings.smoothing_radius));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            SimulationSettings::from_json_str(r#"{ "gravity": -3.5, "bounds_size": [10.0, 6.0] }"#)
                .unwrap();
        assert_eq!(settings.gravity, -3.5);
        assert_eq!(settings.bounds_size, Vec2::new(10.0, 6.0));
        assert_eq!(settings.smoothing_radius, SimulationSettings::default().smoothing_radius);
    }

    #[test]
    fn json_with_bad_radius_is_rejected() {
        let err = SimulationSettings::from_json_str(r#"{ "smoothing_radius": 0.0 }"#).unwrap_err();
        assert!(matches!(err, SimError::InvalidSmoothingRadius(_)));
    }
}
