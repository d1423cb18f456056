// coordinator <-> worker messages: a tag plus a bincode payload, bounded in size
use bincode::config::{self, Config};
use glam::Vec2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::Stage;
use crate::cpu::spatial::SpatialEntry;
use crate::error::{SimError, TransportError};
use crate::settings::StepParams;

pub const TAG_INIT: u32 = 1;
pub const TAG_STAGE: u32 = 2;
pub const TAG_REPLY: u32 = 3;
pub const TAG_SHUTDOWN: u32 = 4;

/// Largest payload either side will send, allocate or decode.
pub const MAX_FRAME_BYTES: usize = 256 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// Contiguous index range owned by worker `rank` out of `workers`.
pub fn partition(n: usize, workers: usize, rank: usize) -> std::ops::Range<usize> {
    let chunk = n.div_ceil(workers.max(1));
    let start = (rank * chunk).min(n);
    let end = (start + chunk).min(n);
    start..end
}

// little-endian, varint lengths, fields in declaration order
fn wire_config() -> impl Config {
    config::standard().with_limit::<MAX_FRAME_BYTES>()
}

fn encode<T: Serialize>(tag: u32, value: &T) -> Result<Frame, TransportError> {
    let payload = bincode::serde::encode_to_vec(value, wire_config())?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge { len: payload.len() as u64 });
    }
    Ok(Frame { tag, payload })
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, TransportError> {
    let (value, _) = bincode::serde::decode_from_slice(payload, wire_config())?;
    Ok(value)
}

/// Read-only buffers broadcast with a stage. Buffers a stage does not read are left empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageInputs<'a> {
    pub positions: &'a [Vec2],
    pub predicted: &'a [Vec2],
    pub velocities: &'a [Vec2],
    pub densities: &'a [Vec2],
    pub entries: &'a [SpatialEntry],
    pub offsets: &'a [u32],
}

/// A decoded stage request, owning its buffers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub stage: Stage,
    pub params: StepParams,
    pub num_particles: u32,
    pub positions: Vec<Vec2>,
    pub predicted: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub densities: Vec<Vec2>,
    pub entries: Vec<SpatialEntry>,
    pub offsets: Vec<u32>,
}

// same field order as StageRequest, so the coordinator never copies its buffers to send them
#[derive(Serialize)]
struct BorrowedStageRequest<'a> {
    stage: Stage,
    params: &'a StepParams,
    num_particles: u32,
    positions: &'a [Vec2],
    predicted: &'a [Vec2],
    velocities: &'a [Vec2],
    densities: &'a [Vec2],
    entries: &'a [SpatialEntry],
    offsets: &'a [u32],
}

pub fn encode_stage_request(
    stage: Stage,
    params: &StepParams,
    num_particles: usize,
    inputs: &StageInputs<'_>,
) -> Result<Frame, TransportError> {
    let request = BorrowedStageRequest {
        stage,
        params,
        num_particles: num_particles as u32,
        positions: inputs.positions,
        predicted: inputs.predicted,
        velocities: inputs.velocities,
        densities: inputs.densities,
        entries: inputs.entries,
        offsets: inputs.offsets,
    };
    encode(TAG_STAGE, &request)
}

/// A worker's slice of a stage's output. `first` and `second` hold the output buffers of the
/// stage in the order the coordinator applies them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageReply {
    pub stage: Stage,
    pub start: u32,
    pub first: Vec<Vec2>,
    pub second: Vec<Vec2>,
}

impl StageReply {
    pub fn encode(&self) -> Result<Frame, TransportError> {
        encode(TAG_REPLY, self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Tells a worker which range it owns: its rank out of `workers`.
    Init { rank: u32, workers: u32 },
    Stage(Box<StageRequest>),
    Reply(StageReply),
    Shutdown,
}

impl Message {
    pub fn init(rank: u32, workers: u32) -> Result<Frame, TransportError> {
        encode(TAG_INIT, &(rank, workers))
    }

    pub fn shutdown() -> Frame {
        Frame { tag: TAG_SHUTDOWN, payload: Vec::new() }
    }

    pub fn decode(frame: &Frame) -> Result<Message, SimError> {
        let message = match frame.tag {
            TAG_INIT => {
                let (rank, workers) = decode::<(u32, u32)>(&frame.payload)?;
                Message::Init { rank, workers }
            }
            TAG_STAGE => Message::Stage(Box::new(decode(&frame.payload)?)),
            TAG_REPLY => Message::Reply(decode(&frame.payload)?),
            TAG_SHUTDOWN => Message::Shutdown,
            other => return Err(TransportError::UnknownTag(other).into()),
        };
        Ok(message)
    }
}
