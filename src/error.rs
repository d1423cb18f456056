use thiserror::Error;

/// Everything that can stop the simulation from advancing.
///
/// Configuration problems surface when settings or the particle count change. Transport and
/// GPU errors are fatal for the running simulation: the particle state is no longer
/// consistent once a stage has only partially completed.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("smoothing radius must be positive and finite, got {0}")]
    InvalidSmoothingRadius(f32),

    #[error("particle count must be at least one")]
    NoParticles,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no compatible GPU adapter found")]
    GpuUnavailable,

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("could not parse settings: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the link between the coordinator and a worker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("frame of {len} bytes exceeds the frame size limit")]
    FrameTooLarge { len: u64 },

    #[error("could not encode frame: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("could not decode frame: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
