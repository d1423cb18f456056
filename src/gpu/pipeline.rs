// compute pipelines for every stage, compiled from one shader module
use std::num::NonZeroU64;

use wgpu::{BindGroupLayout, ComputePipeline, Device};

use crate::backend::Stage;
use crate::gpu::ffi::GpuSortParams;

pub const WORKGROUP_SIZE: u32 = 64;

/// Workgroups needed to give `n` invocations one thread each.
pub fn workgroups_for(n: usize) -> u32 {
    (n as u32).div_ceil(WORKGROUP_SIZE).max(1)
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub struct SphPipelines {
    /// Group 0: parameters and every particle buffer.
    pub particle_layout: BindGroupLayout,
    /// Group 1: parameters of a single bitonic pass.
    pub sort_layout: BindGroupLayout,
    external_forces: ComputePipeline,
    update_spatial_hash: ComputePipeline,
    bitonic_sort_step: ComputePipeline,
    calculate_offsets: ComputePipeline,
    density: ComputePipeline,
    pressure: ComputePipeline,
    viscosity: ComputePipeline,
    update_positions: ComputePipeline,
}

impl SphPipelines {
    pub fn new(device: &Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sph2d"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sph2d.wgsl").into()),
        });

        let mut particle_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        // positions, predicted, velocities, densities, entries, offsets, velocity snapshot
        particle_entries.extend((1..=7).map(storage_entry));

        let particle_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sph particle layout"),
            entries: &particle_entries,
        });

        let sort_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sph sort layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(size_of::<GpuSortParams>() as u64),
                },
                count: None,
            }],
        });

        let stage_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sph stage pipeline layout"),
            bind_group_layouts: &[&particle_layout],
            push_constant_ranges: &[],
        });
        let sort_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sph sort pipeline layout"),
            bind_group_layouts: &[&particle_layout, &sort_layout],
            push_constant_ranges: &[],
        });

        let make = |layout: &wgpu::PipelineLayout, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            external_forces: make(&stage_layout, "external_forces"),
            update_spatial_hash: make(&stage_layout, "update_spatial_hash"),
            bitonic_sort_step: make(&sort_pipeline_layout, "bitonic_sort_step"),
            calculate_offsets: make(&stage_layout, "calculate_offsets"),
            density: make(&stage_layout, "calculate_density"),
            pressure: make(&stage_layout, "calculate_pressure"),
            viscosity: make(&stage_layout, "calculate_viscosity"),
            update_positions: make(&stage_layout, "update_positions"),
            particle_layout,
            sort_layout,
        }
    }

    /// The single per-particle pipeline of a stage. The sort stage is several passes and is
    /// encoded separately.
    pub fn for_stage(&self, stage: Stage) -> Option<&ComputePipeline> {
        match stage {
            Stage::ExternalForces => Some(&self.external_forces),
            Stage::UpdateSpatialHash => Some(&self.update_spatial_hash),
            Stage::SortAndOffsets => None,
            Stage::Density => Some(&self.density),
            Stage::PressureForce => Some(&self.pressure),
            Stage::Viscosity => Some(&self.viscosity),
            Stage::UpdatePositions => Some(&self.update_positions),
        }
    }

    pub fn bitonic_sort_step(&self) -> &ComputePipeline {
        &self.bitonic_sort_step
    }

    pub fn calculate_offsets(&self) -> &ComputePipeline {
        &self.calculate_offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_thread_per_particle() {
        assert_eq!(workgroups_for(0), 1);
        assert_eq!(workgroups_for(1), 1);
        assert_eq!(workgroups_for(64), 1);
        assert_eq!(workgroups_for(65), 2);
        assert_eq!(workgroups_for(10_000), 157);
    }
}
