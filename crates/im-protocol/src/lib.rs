//! Wire-level framing, the positional binary packet layout, command
//! codes, and the JSON document shapes carried in packet bodies.
//! Pure encode/decode: no sockets, no async runtime dependency beyond
//! the `tokio_util::codec` traits the frame codec implements.

pub mod command;
pub mod frame;
pub mod messages;
pub mod payload;

pub use command::Command;
pub use frame::{FrameCodec, FrameError, HEADER_LEN, MAX_PACKAGE_SIZE};
pub use payload::{PayloadError, PayloadReader, PayloadWriter};

/// Boundary between user ids and group ids in the shared identifier
/// namespace: ids at or above this value name a group.
pub const GROUP_ID_BOUNDARY: i32 = 1_000_000;

pub fn is_group_id(id: i32) -> bool {
    id >= GROUP_ID_BOUNDARY
}

/// A decoded packet: command, client-chosen sequence number, JSON
/// body bytes, and whatever raw extra bytes follow the body (their
/// shape depends on which command this is, so the dispatcher reads
/// them with its own `PayloadReader` over `extra`).
#[derive(Debug, Clone)]
pub struct Packet {
    pub cmd: Command,
    pub seq: i32,
    pub body: Vec<u8>,
    pub extra: Vec<u8>,
}

impl Packet {
    pub fn decode(payload: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut reader = PayloadReader::new(payload);
        let cmd_code = reader.read_i32()?;
        let seq = reader.read_i32()?;
        let body = reader.read_bytes()?;
        let cmd = Command::try_from(cmd_code)?;
        let extra = payload[payload.len() - reader.remaining()..].to_vec();
        Ok(Packet { cmd, seq, body, extra })
    }

    pub fn encode(cmd: Command, seq: i32, body: &[u8], extra: &[u8]) -> PayloadWriter {
        let mut w = PayloadWriter::new();
        w.write_i32(cmd.code()).write_i32(seq).write_bytes(body);
        w.raw(extra);
        w
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketDecodeError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    UnknownCommand(#[from] command::UnknownCommand),
}
