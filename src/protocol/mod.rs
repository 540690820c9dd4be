//! Protocol Module
//!
//! Defines the wire protocol between the daemons, the object server and its
//! replication peers.
//!
//! ## Protocol Format (Framed Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! RPC surface (localhost):
//! - 0x01: PING
//! - 0x02: LIST_PARTITIONS
//! - 0x03: LIST_PARTITION_SUFFIXES
//! - 0x04: AUDIT_PARTITION
//! - 0x05: GET_HASHES
//! - 0x06: SYNC
//! - 0x07: DELETE_HANDOFF
//!
//! Peer surface:
//! - 0x10: REPLICATE
//! - 0x11: DIFF
//! - 0x12: PUT_OBJECT  (+ raw body)
//! - 0x13: POST_OBJECT
//! - 0x14: DELETE_OBJECT
//! - 0x15: GET_OBJECT  (response + raw body)
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR
//! - 0x03: UNMOUNTED
//! - 0x04: CONFLICT
//! - 0x05: RACE

mod codec;
mod command;
mod messages;
mod response;

pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use command::{Command, CommandType};
pub use messages::{DeviceTarget, HashesRequest};
pub use response::{Response, Status};
