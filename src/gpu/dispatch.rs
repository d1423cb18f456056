// GPU execution strategy: one compute pass per stage, pass boundaries are the barrier
use bevy::log::{debug, info};

use crate::backend::{BackendKind, SimulationBackend, Stage};
use crate::cpu::spatial::{SpatialHash, comparator_count};
use crate::cpu::sph2d::ParticleState;
use crate::error::SimError;
use crate::gpu::buffers::ParticleBuffers;
use crate::gpu::context::GpuContext;
use crate::gpu::ffi::GpuSimParams;
use crate::gpu::pipeline::{SphPipelines, workgroups_for};
use crate::settings::StepParams;

/// Runs the pipeline on the device. Host state is uploaded before the sub-steps of a frame
/// and positions, velocities and densities are read back after them.
pub struct GpuBackend {
    ctx: GpuContext,
    pipelines: SphPipelines,
    buffers: Option<ParticleBuffers>,
}

impl GpuBackend {
    pub fn new() -> Result<Self, SimError> {
        Self::with_context(GpuContext::new()?)
    }

    pub fn with_context(ctx: GpuContext) -> Result<Self, SimError> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = SphPipelines::new(&ctx.device);
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(SimError::Gpu(err.to_string()));
        }
        info!("gpu backend ready on {}", ctx.adapter_name());
        Ok(Self {
            ctx,
            pipelines,
            buffers: None,
        })
    }

    fn ensure_buffers(&mut self, n: usize) {
        let stale = self
            .buffers
            .as_ref()
            .is_none_or(|b| b.num_particles as usize != n);
        if stale {
            debug!("allocating gpu buffers for {n} particles");
            self.buffers = Some(ParticleBuffers::new(&self.ctx, &self.pipelines, n));
        }
    }

    /// Runs only the hash, sort and offset passes over the predicted positions of `state` and
    /// returns the table the device built.
    pub fn spatial_hash(
        &mut self,
        state: &ParticleState,
        params: &StepParams,
    ) -> Result<SpatialHash, SimError> {
        let n = state.len();
        if n == 0 {
            return Ok(SpatialHash::default());
        }

        self.ensure_buffers(n);
        let Some(buffers) = self.buffers.as_ref() else { return Ok(SpatialHash::default()); };
        buffers.write_params(&self.ctx, &GpuSimParams::new(params, n as u32));
        buffers.upload(&self.ctx, state);

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph spatial hash"),
        });
        for stage in [Stage::UpdateSpatialHash, Stage::SortAndOffsets] {
            self.encode_stage(&mut encoder, buffers, stage);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        buffers.download_spatial(&self.ctx)
    }

    fn encode_stage(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &ParticleBuffers,
        stage: Stage,
    ) {
        let n = buffers.num_particles as usize;

        if stage == Stage::SortAndOffsets {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("bitonic sort"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipelines.bitonic_sort_step());
            pass.set_bind_group(0, &buffers.particle_bind_group, &[]);
            let groups = workgroups_for(comparator_count(n));
            for k in 0..buffers.sort_passes {
                pass.set_bind_group(1, &buffers.sort_bind_group, &[buffers.sort_offset(k)]);
                pass.dispatch_workgroups(groups, 1, 1);
            }
            drop(pass);

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("calculate offsets"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipelines.calculate_offsets());
            pass.set_bind_group(0, &buffers.particle_bind_group, &[]);
            pass.dispatch_workgroups(workgroups_for(n), 1, 1);
            return;
        }

        if stage == Stage::Viscosity {
            // neighbours must read velocities from before the stage
            encoder.copy_buffer_to_buffer(
                &buffers.velocities,
                0,
                &buffers.velocity_snapshot,
                0,
                buffers.velocities.size(),
            );
        }

        let Some(pipeline) = self.pipelines.for_stage(stage) else { return; };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &buffers.particle_bind_group, &[]);
        pass.dispatch_workgroups(workgroups_for(n), 1, 1);
    }
}

impl SimulationBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> String {
        format!("gpu ({})", self.ctx.adapter_name())
    }

    fn run_steps(
        &mut self,
        state: &mut ParticleState,
        params: &StepParams,
        iterations: u32,
    ) -> Result<(), SimError> {
        let n = state.len();
        if n == 0 || iterations == 0 {
            return Ok(());
        }

        self.ensure_buffers(n);
        let Some(buffers) = self.buffers.as_ref() else { return Ok(()); };

        buffers.write_params(&self.ctx, &GpuSimParams::new(params, n as u32));
        buffers.upload(&self.ctx, state);

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph frame"),
        });
        for _ in 0..iterations {
            for stage in Stage::ALL {
                self.encode_stage(&mut encoder, buffers, stage);
            }
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        buffers.download(&self.ctx, state)
    }
}
