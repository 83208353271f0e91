//! Output path - fixed buffer, overflow queue and write coalescing.

mod buffer;
mod coalescer;
mod queue;

pub use buffer::OutBuffer;
pub use coalescer::PendingOutput;
pub(crate) use coalescer::OutputChannel;
pub use queue::{OutboundPacket, OverflowQueue};
