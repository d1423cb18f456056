// point-to-point links between the coordinator and one worker
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use bincode::config::{self, Config};

use crate::cluster::wire::{Frame, MAX_FRAME_BYTES};
use crate::error::TransportError;

/// A blocking, ordered, reliable frame link. Failures are not retried.
pub trait Transport: Send + Sync {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;
    fn recv(&mut self) -> Result<Frame, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn recv(&mut self) -> Result<Frame, TransportError> {
        (**self).recv()
    }
}

/// In-process link over channels, for workers running as threads.
pub struct LocalTransport {
    tx: Sender<Frame>,
    // receivers are not Sync, only ever touched through &mut self
    rx: Mutex<Receiver<Frame>>,
}

impl LocalTransport {
    pub fn pair() -> (LocalTransport, LocalTransport) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            LocalTransport { tx: a_tx, rx: Mutex::new(a_rx) },
            LocalTransport { tx: b_tx, rx: Mutex::new(b_rx) },
        )
    }
}

impl Transport for LocalTransport {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .map_err(|_| TransportError::Disconnected)
    }

    fn recv(&mut self) -> Result<Frame, TransportError> {
        let rx = self.rx.get_mut().map_err(|_| TransportError::Disconnected)?;
        rx.recv().map_err(|_| TransportError::Disconnected)
    }
}

/// Length-prefixed frames over TCP: a fixed 12 byte `(tag: u32, len: u64)` header, then `len`
/// payload bytes. Headers announcing more than [`MAX_FRAME_BYTES`] are rejected before any
/// payload is read.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Self::new(TcpStream::connect(addr)?)
    }

    pub fn peer(&self) -> String {
        self.stream
            .peer_addr()
            .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string())
    }
}

fn eof_as_disconnect(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            TransportError::Disconnected
        }
        _ => TransportError::Io(err),
    }
}

const HEADER_BYTES: usize = 12;

fn header_config() -> impl Config {
    config::standard().with_fixed_int_encoding()
}

fn check_len(len: u64) -> Result<usize, TransportError> {
    if len > MAX_FRAME_BYTES as u64 {
        return Err(TransportError::FrameTooLarge { len });
    }
    Ok(len as usize)
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let len = frame.payload.len() as u64;
        check_len(len)?;
        let mut buf = bincode::serde::encode_to_vec((frame.tag, len), header_config())?;
        buf.extend_from_slice(&frame.payload);
        self.stream.write_all(&buf).map_err(eof_as_disconnect)?;
        self.stream.flush().map_err(eof_as_disconnect)
    }

    fn recv(&mut self) -> Result<Frame, TransportError> {
        let mut header = [0u8; HEADER_BYTES];
        self.stream.read_exact(&mut header).map_err(eof_as_disconnect)?;
        let ((tag, len), _): ((u32, u64), usize) =
            bincode::serde::decode_from_slice(&header, header_config())?;

        let mut payload = vec![0u8; check_len(len)?];
        self.stream.read_exact(&mut payload).map_err(eof_as_disconnect)?;
        Ok(Frame { tag, payload })
    }
}
