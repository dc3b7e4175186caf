//! NRPE wire protocol.
//!
//! - `packet`: the fixed 1036-byte packet codec with CRC-32 checking
//! - `client`: a client that sends one query and reads one response

pub mod client;
pub mod packet;

pub use client::{CheckClient, ClientError};
pub use packet::{Packet, PacketError, PacketType, read_packet, write_packet};
