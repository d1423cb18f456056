// device-side particle buffers and the host round trip
use std::num::NonZeroU64;
use std::sync::mpsc;

use glam::Vec2;
use bytemuck::Pod;
use wgpu::{BindGroup, Buffer, BufferUsages};

use crate::cpu::spatial::{SpatialEntry, SpatialHash, bitonic_schedule};
use crate::cpu::sph2d::ParticleState;
use crate::error::SimError;
use crate::gpu::context::GpuContext;
use crate::gpu::ffi::{GpuSimParams, GpuSortParams};
use crate::gpu::pipeline::SphPipelines;

const VEC2_BYTES: u64 = size_of::<Vec2>() as u64;

pub struct ParticleBuffers {
    pub num_particles: u32,
    pub params: Buffer,
    pub positions: Buffer,
    pub predicted: Buffer,
    pub velocities: Buffer,
    pub densities: Buffer,
    pub spatial_entries: Buffer,
    pub spatial_offsets: Buffer,
    pub velocity_snapshot: Buffer,
    pub sort_params: Buffer,
    /// Byte stride between consecutive bitonic pass parameters.
    pub sort_stride: u64,
    pub sort_passes: u32,
    /// Positions, velocities and densities back to back, for readback.
    staging: Buffer,
    pub particle_bind_group: BindGroup,
    pub sort_bind_group: BindGroup,
}

impl ParticleBuffers {
    /// Allocates buffers for `n` particles and writes the bitonic schedule for that count.
    pub fn new(ctx: &GpuContext, pipelines: &SphPipelines, n: usize) -> Self {
        let device = &ctx.device;
        // zero sized bindings are invalid, keep at least one slot
        let slots = n.max(1) as u64;

        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sim params"),
            size: size_of::<GpuSimParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let positions = storage("positions", slots * VEC2_BYTES);
        let predicted = storage("predicted positions", slots * VEC2_BYTES);
        let velocities = storage("velocities", slots * VEC2_BYTES);
        let densities = storage("densities", slots * VEC2_BYTES);
        let spatial_entries =
            storage("spatial entries", slots * size_of::<SpatialEntry>() as u64);
        let spatial_offsets = storage("spatial offsets", slots * size_of::<u32>() as u64);
        let velocity_snapshot = storage("velocity snapshot", slots * VEC2_BYTES);

        let schedule: Vec<(u32, u32)> = bitonic_schedule(n).collect();
        let sort_stride = ctx
            .uniform_offset_alignment()
            .max(size_of::<GpuSortParams>() as u64);
        let sort_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bitonic pass params"),
            size: schedule.len().max(1) as u64 * sort_stride,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut sort_bytes = vec![0u8; schedule.len() * sort_stride as usize];
        for (k, &(stage, step)) in schedule.iter().enumerate() {
            let pass = GpuSortParams::new(stage, step, n as u32);
            let at = k * sort_stride as usize;
            sort_bytes[at..at + size_of::<GpuSortParams>()]
                .copy_from_slice(bytemuck::bytes_of(&pass));
        }
        if !sort_bytes.is_empty() {
            ctx.queue.write_buffer(&sort_params, 0, &sort_bytes);
        }

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: 3 * slots * VEC2_BYTES,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let particle_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sph particle bind group"),
            layout: &pipelines.particle_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: predicted.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: densities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: spatial_entries.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: spatial_offsets.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: velocity_snapshot.as_entire_binding(),
                },
            ],
        });

        let sort_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sph sort bind group"),
            layout: &pipelines.sort_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &sort_params,
                    offset: 0,
                    size: NonZeroU64::new(size_of::<GpuSortParams>() as u64),
                }),
            }],
        });

        Self {
            num_particles: n as u32,
            params,
            positions,
            predicted,
            velocities,
            densities,
            spatial_entries,
            spatial_offsets,
            velocity_snapshot,
            sort_params,
            sort_stride,
            sort_passes: schedule.len() as u32,
            staging,
            particle_bind_group,
            sort_bind_group,
        }
    }

    /// Dynamic offset of bitonic pass `k`.
    pub fn sort_offset(&self, k: u32) -> u32 {
        (k as u64 * self.sort_stride) as u32
    }

    pub fn write_params(&self, ctx: &GpuContext, params: &GpuSimParams) {
        ctx.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Copies the host particle state into device memory.
    pub fn upload(&self, ctx: &GpuContext, state: &ParticleState) {
        ctx.queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(&state.positions));
        ctx.queue
            .write_buffer(&self.predicted, 0, bytemuck::cast_slice(&state.predicted_positions));
        ctx.queue.write_buffer(&self.velocities, 0, bytemuck::cast_slice(&state.velocities));
        ctx.queue.write_buffer(&self.densities, 0, bytemuck::cast_slice(&state.densities));
    }

    /// Reads positions, velocities and densities back into `state`. Blocks until the device
    /// has finished all submitted work.
    pub fn download(&self, ctx: &GpuContext, state: &mut ParticleState) -> Result<(), SimError> {
        let n = self.num_particles as usize;
        let bytes = n as u64 * VEC2_BYTES;

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph readback"),
        });
        encoder.copy_buffer_to_buffer(&self.positions, 0, &self.staging, 0, bytes);
        encoder.copy_buffer_to_buffer(&self.velocities, 0, &self.staging, bytes, bytes);
        encoder.copy_buffer_to_buffer(&self.densities, 0, &self.staging, 2 * bytes, bytes);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = self.staging.slice(..3 * bytes);
        map_and_wait(ctx, &slice)?;
        {
            let data = slice.get_mapped_range();
            let values: &[Vec2] = bytemuck::cast_slice(&data);
            state.positions.copy_from_slice(&values[..n]);
            state.velocities.copy_from_slice(&values[n..2 * n]);
            state.densities.copy_from_slice(&values[2 * n..3 * n]);
        }
        self.staging.unmap();
        Ok(())
    }

    /// Reads the sorted spatial entries and the offset table back from the device.
    pub fn download_spatial(&self, ctx: &GpuContext) -> Result<SpatialHash, SimError> {
        let n = self.num_particles as usize;
        Ok(SpatialHash {
            entries: read_back(ctx, &self.spatial_entries, n)?,
            offsets: read_back(ctx, &self.spatial_offsets, n)?,
        })
    }
}

fn map_and_wait(ctx: &GpuContext, slice: &wgpu::BufferSlice<'_>) -> Result<(), SimError> {
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| SimError::Gpu("readback was never completed".into()))?
        .map_err(|e| SimError::Gpu(e.to_string()))
}

// one-off copy through a temporary staging buffer
fn read_back<T: Pod>(ctx: &GpuContext, buffer: &Buffer, count: usize) -> Result<Vec<T>, SimError> {
    let bytes = (count * size_of::<T>()) as u64;
    if bytes == 0 {
        return Ok(Vec::new());
    }
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("one-off readback"),
        size: bytes,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("one-off readback"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    map_and_wait(ctx, &slice)?;
    let values = bytemuck::cast_slice(&slice.get_mapped_range()).to_vec();
    staging.unmap();
    Ok(values)
}
