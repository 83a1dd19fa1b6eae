//! Error taxonomy of the bridge protocol layer.
//!
//! None of these are fatal to a running bridge: frames that fail to decode
//! are dropped, bad dispatch targets are logged, short commissioning
//! payloads get a failure-status reply. The only startup-fatal condition is
//! failing to bind the UDP socket, which surfaces as a plain anyhow error
//! out of [Bridge::start](crate::bridge::Bridge::start).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Datagram shorter than the 8 byte Matter message header.
    #[error("frame too short: {len} bytes, need at least 8")]
    FrameTooShort { len: usize },

    /// Commissioning payload too short to carry a protocol header.
    #[error("malformed commissioning payload: {len} bytes, need at least 4")]
    MalformedCommissioningPayload { len: usize },

    /// Dispatch target endpoint does not exist.
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(u16),

    /// Dispatch target endpoint exists but does not carry a light device.
    #[error("endpoint {0} is not a light")]
    NotALight(u16),

    /// Cluster/command pair outside the supported set.
    #[error("unsupported command: cluster 0x{cluster:04x} command 0x{command:02x}")]
    UnsupportedCommand { cluster: u16, command: u8 },

    /// Manual pairing codes carry at most 11 decimal digits.
    #[error("passcode {0} does not fit 11 decimal digits")]
    PasscodeTooLarge(u64),
}
