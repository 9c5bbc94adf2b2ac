//! Length-prefixed frame I/O and the command pack/parse format layered on
//! top of it.

pub mod command;
pub mod framing;

pub use command::{parse_part, parse_tag, pack_command, CodecError};
pub use framing::{poll_frame, recv_frame, send_frame, PollOutcome, RecvOutcome};
