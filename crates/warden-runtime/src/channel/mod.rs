//! IPC channel implementations.
//!
//! One interface, two transports selected at configuration time:
//! - [`FramedSocketChannel`] - newline-framed JSON over a Unix or TCP
//!   socket, one connection per request
//! - [`TextPipeChannel`] - raw text over the child's stdin/stdout with
//!   heuristic response boundary detection

mod pipe;
mod socket;

pub use pipe::{SharedStdin, TextPipeChannel};
pub use socket::FramedSocketChannel;
