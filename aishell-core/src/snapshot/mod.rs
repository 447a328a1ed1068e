//! Snapshot socket protocol.
//!
//! Requests are bare, newline-free ASCII strings written once on a fresh
//! connection:
//!
//! | Request            | Response                                                  |
//! |--------------------|-----------------------------------------------------------|
//! | `GET_SCREEN_STATE` | u32 big-endian length + UTF-8 text, then wait for `END`   |
//! | `GET_PRINT_COUNT`  | plain UTF-8 sentence with the request count               |
//! | anything else      | connection closed without a reply                         |

pub mod client;
pub mod server;

pub use client::SnapshotClient;
pub use server::{Served, SnapshotServer};

use crate::error::{Error, Result};

pub const GET_SCREEN_STATE: &str = "GET_SCREEN_STATE";
pub const GET_PRINT_COUNT: &str = "GET_PRINT_COUNT";
/// Sent by the client once it has read the whole screen payload.
pub const ACK: &str = "END";
/// Upper bound for a single request or acknowledgment read.
pub const MAX_MESSAGE_LEN: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    ScreenState,
    PrintCount,
}

impl Request {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        match raw {
            b"GET_SCREEN_STATE" => Some(Request::ScreenState),
            b"GET_PRINT_COUNT" => Some(Request::PrintCount),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Request::ScreenState => GET_SCREEN_STATE,
            Request::PrintCount => GET_PRINT_COUNT,
        }
    }
}

/// What happened while waiting for the client's `END`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    Unexpected(String),
    TimedOut,
    Closed,
}

/// Length-prefixed screen payload.
pub fn encode_frame(text: &str) -> Result<Vec<u8>> {
    let len = u32::try_from(text.len())
        .map_err(|_| Error::Protocol(format!("screen payload too large: {} bytes", text.len())))?;
    let mut frame = Vec::with_capacity(4 + text.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    Ok(frame)
}

pub fn print_count_message(count: u64) -> String {
    format!("aishell-print has been called {count} times.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse(b"GET_SCREEN_STATE"), Some(Request::ScreenState));
        assert_eq!(Request::parse(b"GET_PRINT_COUNT"), Some(Request::PrintCount));
        assert_eq!(Request::parse(b"GET_SCREEN_STATE\n"), None);
        assert_eq!(Request::parse(b"get_screen_state"), None);
        assert_eq!(Request::parse(b""), None);
        assert_eq!(Request::ScreenState.as_str(), GET_SCREEN_STATE);
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame("héllo").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 6]);
        assert_eq!(&frame[4..], "héllo".as_bytes());

        let empty = encode_frame("").unwrap();
        assert_eq!(empty, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_print_count_message() {
        assert_eq!(print_count_message(3), "aishell-print has been called 3 times.");
    }
}
