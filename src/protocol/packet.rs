//! Fixed-size NRPE packet codec.
//!
//! Layout (big-endian, 1036 bytes):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 2 | version |
//! | 2 | 2 | type |
//! | 4 | 4 | CRC-32, computed with this field zeroed |
//! | 8 | 2 | result code |
//! | 10 | 1024 | NUL-terminated payload |
//! | 1034 | 2 | reserved |

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::ReturnValue;

pub const BUFFER_SIZE: usize = 1024;
pub const PACKET_SIZE: usize = 2 + 2 + 4 + 2 + BUFFER_SIZE + 2;

const CRC_OFFSET: usize = 4;
const BUFFER_OFFSET: usize = 10;
const RESERVED_OFFSET: usize = BUFFER_OFFSET + BUFFER_SIZE;

pub const VERSION_1: u16 = 1;
pub const VERSION_2: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Query,
    Response,
}

impl PacketType {
    pub fn code(&self) -> u16 {
        match self {
            Self::Query => 1,
            Self::Response => 2,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Query),
            2 => Some(Self::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("malformed packet: got {0} of 1036 bytes")]
    Malformed(usize),
    #[error("bad CRC: packet carries {stored:#010x}, computed {computed:#010x}")]
    BadCrc { stored: u32, computed: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One NRPE request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u16,
    /// Raw type code; see [`Packet::kind`]. Kept raw so unknown types can be answered.
    pub packet_type: u16,
    pub crc: u32,
    pub result_code: i16,
    pub buffer: [u8; BUFFER_SIZE],
    pub reserved: [u8; 2],
}

impl Packet {
    fn empty(version: u16, kind: PacketType) -> Self {
        Self {
            version,
            packet_type: kind.code(),
            crc: 0,
            result_code: 0,
            buffer: [0; BUFFER_SIZE],
            reserved: [0; 2],
        }
    }

    /// Build a query for `command` with positional `args`, CRC finalised.
    pub fn query<S: AsRef<str>>(version: u16, command: &str, args: &[S]) -> Self {
        let mut payload = command.to_string();
        for arg in args {
            payload.push('!');
            payload.push_str(arg.as_ref());
        }

        let mut packet = Self::empty(version, PacketType::Query);
        packet.randomize_padding();
        packet.set_message(&payload);
        packet.update_crc();
        packet
    }

    /// Build the response carrying `result`, CRC finalised.
    pub fn response(version: u16, result: &ReturnValue) -> Self {
        let mut packet = Self::empty(version, PacketType::Response);
        packet.result_code = result.status.code();
        packet.set_message(&result.to_payload());
        packet.update_crc();
        packet
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_code(self.packet_type)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < PACKET_SIZE {
            return Err(PacketError::Malformed(bytes.len()));
        }

        let mut buffer = [0u8; BUFFER_SIZE];
        buffer.copy_from_slice(&bytes[BUFFER_OFFSET..RESERVED_OFFSET]);

        Ok(Self {
            version: u16::from_be_bytes([bytes[0], bytes[1]]),
            packet_type: u16::from_be_bytes([bytes[2], bytes[3]]),
            crc: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            result_code: i16::from_be_bytes([bytes[8], bytes[9]]),
            buffer,
            reserved: [bytes[RESERVED_OFFSET], bytes[RESERVED_OFFSET + 1]],
        })
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[0..2].copy_from_slice(&self.version.to_be_bytes());
        out[2..4].copy_from_slice(&self.packet_type.to_be_bytes());
        out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&self.crc.to_be_bytes());
        out[8..10].copy_from_slice(&self.result_code.to_be_bytes());
        out[BUFFER_OFFSET..RESERVED_OFFSET].copy_from_slice(&self.buffer);
        out[RESERVED_OFFSET..].copy_from_slice(&self.reserved);
        out
    }

    fn compute_crc(&self) -> u32 {
        let mut bytes = self.encode();
        bytes[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
        crc32fast::hash(&bytes)
    }

    pub fn update_crc(&mut self) {
        self.crc = 0;
        self.crc = self.compute_crc();
    }

    pub fn validate(&self) -> Result<(), PacketError> {
        let computed = self.compute_crc();
        if computed != self.crc {
            return Err(PacketError::BadCrc {
                stored: self.crc,
                computed,
            });
        }
        Ok(())
    }

    /// The payload text up to the first NUL byte, or the whole buffer if there is none.
    pub fn message(&self) -> String {
        let end = self
            .buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(BUFFER_SIZE);
        String::from_utf8_lossy(&self.buffer[..end]).into_owned()
    }

    /// Copy up to [`BUFFER_SIZE`] bytes of `text` into the payload, NUL-terminated
    /// when shorter. Bytes after the terminator are left untouched.
    pub fn set_message(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let len = bytes.len().min(BUFFER_SIZE);
        self.buffer[..len].copy_from_slice(&bytes[..len]);
        if len < BUFFER_SIZE {
            self.buffer[len] = 0;
        }
    }

    // Legacy NRPE clients randomise unused bytes; it only matters for wire compatibility.
    fn randomize_padding(&mut self) {
        for b in self.buffer.iter_mut().chain(self.reserved.iter_mut()) {
            *b = rand::random();
        }
    }
}

/// Read exactly one packet from `reader`. The CRC is not checked.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, PacketError> {
    let mut bytes = [0u8; PACKET_SIZE];
    let mut filled = 0;
    while filled < PACKET_SIZE {
        let n = reader.read(&mut bytes[filled..]).await?;
        if n == 0 {
            return Err(PacketError::Malformed(filled));
        }
        filled += n;
    }
    Packet::decode(&bytes)
}

pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), PacketError> {
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}
