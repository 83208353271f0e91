//! Protocol module - header wire format, packets and input reassembly.
//!
//! - 4-byte server headers and 6-byte client headers
//! - Packet struct with a zero-copy payload
//! - Input reassembler for fragmented reads

mod header;
mod packet;
mod reassembler;

pub use header::{
    Header, HeaderBytes, HeaderShape, Role, CLIENT_HEADER_SIZE, MAX_HEADER_SIZE,
    SERVER_HEADER_SIZE,
};
pub use packet::Packet;
pub use reassembler::InputReassembler;
