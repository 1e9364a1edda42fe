//! Wire-level vocabulary for the client side of an SMTP submission session:
//! reply parsing, command serialization and `DATA` escaping.

mod command;
mod data;
mod misc;
mod reply;

pub use command::Command;
pub use data::EscapingDataWriter;
pub use misc::{apply_regex, show_bytes};
pub use reply::{Reply, ReplyCode, ReplyLine};
