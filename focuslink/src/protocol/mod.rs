//! Focus wire protocol.
//!
//! Requests are plain text lines: the command name, optional space-separated
//! arguments, and a terminating newline. Responses are free-form text ended
//! by a sentinel, see [`frame`].

pub mod frame;
pub mod writer;

pub use frame::{Frame, FrameParser, ParserState, SENTINEL};
pub use writer::{ChunkedWriter, DirectWriter, RequestWriter, WriteStrategy};

use crate::error::{Error, Result};

/// Reject request parts that would end the line early.
///
/// The firmware reads one command per line, so an embedded line break turns
/// one request into two and shifts every later reply by one.
pub fn validate_request(command: &str, args: &[&str]) -> Result<()> {
    let has_break = |part: &str| part.contains(['\r', '\n']);
    if has_break(command) {
        return Err(Error::InvalidArgument(format!(
            "command {command:?} contains a line break"
        )));
    }
    if let Some(arg) = args
        .iter()
        .find(|arg| has_break(**arg))
    {
        return Err(Error::InvalidArgument(format!(
            "argument {arg:?} to {command} contains a line break"
        )));
    }
    Ok(())
}

/// Encode a request line: `command[ arg]*\n`.
pub fn encode_request(command: &str, args: &[&str]) -> Vec<u8> {
    let mut line = String::from(command);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push('\n');
    line.into_bytes()
}

/// Split a listing response (`help`, `plugins`) into its entries.
pub fn parse_listing(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
