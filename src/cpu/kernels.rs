// 2D smoothing kernels with compact support on the smoothing radius
use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Normalisation constants of the kernels, derived from the smoothing radius.
///
/// These are recomputed once per frame and handed to every stage; nothing evaluates them
/// per particle.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ScalingFactors {
    pub poly6: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3_deriv: f32,
    pub spiky_pow2_deriv: f32,
}

impl ScalingFactors {
    pub fn from_radius(h: f32) -> Self {
        Self {
            poly6: 4.0 / (PI * h.powi(8)),
            spiky_pow3: 10.0 / (PI * h.powi(5)),
            spiky_pow2: 6.0 / (PI * h.powi(4)),
            spiky_pow3_deriv: 30.0 / (PI * h.powi(5)),
            spiky_pow2_deriv: 12.0 / (PI * h.powi(4)),
        }
    }
}

// base kernels

#[inline]
pub fn poly6(dst: f32, h: f32, factor: f32) -> f32 {
    if dst < h {
        let v = h * h - dst * dst;
        v * v * v * factor
    } else { 0.0 }
}

#[inline]
pub fn spiky_pow3(dst: f32, h: f32, factor: f32) -> f32 {
    if dst < h {
        let v = h - dst;
        v * v * v * factor
    } else { 0.0 }
}

#[inline]
pub fn spiky_pow2(dst: f32, h: f32, factor: f32) -> f32 {
    if dst < h {
        let v = h - dst;
        v * v * factor
    } else { 0.0 }
}

// derivatives are defined up to and including the radius
#[inline]
pub fn spiky_pow3_derivative(dst: f32, h: f32, factor: f32) -> f32 {
    if dst <= h {
        let v = h - dst;
        -v * v * factor
    } else { 0.0 }
}

#[inline]
pub fn spiky_pow2_derivative(dst: f32, h: f32, factor: f32) -> f32 {
    if dst <= h {
        let v = h - dst;
        -v * factor
    } else { 0.0 }
}

// named kernels used by the pipeline

#[inline]
pub fn density_kernel(dst: f32, h: f32, f: &ScalingFactors) -> f32 {
    spiky_pow2(dst, h, f.spiky_pow2)
}

#[inline]
pub fn near_density_kernel(dst: f32, h: f32, f: &ScalingFactors) -> f32 {
    spiky_pow3(dst, h, f.spiky_pow3)
}

#[inline]
pub fn density_derivative(dst: f32, h: f32, f: &ScalingFactors) -> f32 {
    spiky_pow2_derivative(dst, h, f.spiky_pow2_deriv)
}

#[inline]
pub fn near_density_derivative(dst: f32, h: f32, f: &ScalingFactors) -> f32 {
    spiky_pow3_derivative(dst, h, f.spiky_pow3_deriv)
}

#[inline]
pub fn viscosity_kernel(dst: f32, h: f32, f: &ScalingFactors) -> f32 {
    poly6(dst, h, f.poly6)
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: f32 = 0.35;

    #[test]
    fn kernels_vanish_outside_support() {
        let f = ScalingFactors::from_radius(H);
        for dst in [H, H + 1e-4, 2.0 * H, 100.0] {
            assert_eq!(density_kernel(dst, H, &f), 0.0);
            assert_eq!(near_density_kernel(dst, H, &f), 0.0);
            assert_eq!(viscosity_kernel(dst, H, &f), 0.0);
            // (r - dst) is exactly zero on the boundary, so the derivatives vanish there too
            assert_eq!(density_derivative(dst, H, &f), 0.0);
            assert_eq!(near_density_derivative(dst, H, &f), 0.0);
        }
    }

    #[test]
    fn kernels_peak_at_centre() {
        let f = ScalingFactors::from_radius(H);
        assert_eq!(density_kernel(0.0, H, &f), H * H * f.spiky_pow2);
        assert_eq!(near_density_kernel(0.0, H, &f), H * H * H * f.spiky_pow3);
        assert!(density_kernel(0.1, H, &f) < density_kernel(0.0, H, &f));
        assert!(density_derivative(0.1, H, &f) < 0.0);
        assert!(near_density_derivative(0.1, H, &f) < 0.0);
    }

    #[test]
    fn scaling_factors_follow_radius_powers() {
        let f = ScalingFactors::from_radius(1.0);
        assert!((f.poly6 - 4.0 / PI).abs() < 1e-6);
        assert!((f.spiky_pow3 - 10.0 / PI).abs() < 1e-6);
        assert!((f.spiky_pow2 - 6.0 / PI).abs() < 1e-6);
        assert!((f.spiky_pow3_deriv - 30.0 / PI).abs() < 1e-6);
        assert!((f.spiky_pow2_deriv - 12.0 / PI).abs() < 1e-6);

        let g = ScalingFactors::from_radius(2.0);
        assert!((g.spiky_pow2 * 16.0 - f.spiky_pow2).abs() < 1e-6);
    }
}
