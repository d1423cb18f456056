pub mod backend;
pub mod error;
pub mod plugin;
pub mod settings;
pub mod simulation;
pub mod spawn;

pub mod cpu {
    pub mod kernels;
    pub mod pool;
    pub mod spatial;
    pub mod sph2d;
}

pub mod gpu {
    pub mod buffers;
    pub mod context;
    pub mod dispatch;
    pub mod ffi;
    pub mod pipeline;
}

pub mod cluster {
    pub mod coordinator;
    pub mod transport;
    pub mod wire;
    pub mod worker;
}

pub use backend::{BackendKind, SimulationBackend, Stage};
pub use cluster::coordinator::DistributedBackend;
pub use cpu::pool::ThreadPoolBackend;
pub use error::{SimError, TransportError};
pub use gpu::dispatch::GpuBackend;
pub use plugin::{SimulationView, SphFluidPlugin};
pub use settings::{InteractionInput, Obstacle, SimulationSettings, StepParams};
pub use simulation::Simulation;
pub use spawn::{SpawnLayout, SpawnSettings};
