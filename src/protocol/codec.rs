//! Frame codec shared by the peer and RPC listeners.
//!
//! Every message is one frame: a type byte (command type or response
//! status), a big-endian `u32` payload length, then the bincode payload.
//!
//! ```text
//!  request   [type u8][len u32][bincode Command]  [body: PutObject only]
//!  response  [status u8][len u32][payload]        [body: GetObject Ok only]
//! ```
//!
//! Object bodies stream after the frame and never count toward its length.

use std::io::{Read, Write};

use crate::error::{PackError, Result};

use super::{Command, CommandType, Response, Status};

/// Type byte plus length
pub const HEADER_SIZE: usize = 5;

/// Largest payload a frame may declare
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

// -- commands --

pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let payload = bincode::serialize(command)?;
    frame(command.command_type() as u8, &payload)
}

/// Decode one command frame, checking the type byte against the payload
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (cmd_byte, payload) = unframe(bytes, "command")?;
    let cmd_type = CommandType::from_u8(cmd_byte)?;

    let command: Command = bincode::deserialize(payload)
        .map_err(|e| PackError::Protocol(format!("Malformed {:?} payload: {}", cmd_type, e)))?;
    if command.command_type() != cmd_type {
        return Err(PackError::Protocol(format!(
            "Header says {:?} but payload is {:?}",
            cmd_type,
            command.command_type()
        )));
    }
    Ok(command)
}

// -- responses --

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    frame(response.status as u8, payload)
}

/// An empty payload decodes as `None`
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = unframe(bytes, "response")?;
    let status = Status::from_u8(status_byte)?;

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };
    Ok(Response { status, payload })
}

// -- framing --

fn frame(kind: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(PackError::Protocol(format!(
            "frame payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(kind);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    Ok(message)
}

fn unframe<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(PackError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = payload_len(&bytes[..HEADER_SIZE])?;
    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(PackError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

/// Validated payload length from a frame header
fn payload_len(header: &[u8]) -> Result<usize> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_PAYLOAD_SIZE {
        return Err(PackError::Protocol(format!(
            "frame payload of {} bytes exceeds {}",
            len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(len as usize)
}

// -- streams --

fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let len = payload_len(&header)?;

    let mut message = vec![0u8; HEADER_SIZE + len];
    message[..HEADER_SIZE].copy_from_slice(&header);
    if len > 0 {
        reader.read_exact(&mut message[HEADER_SIZE..])?;
    }
    Ok(message)
}

/// Block until a whole command frame arrives; a body stays in `reader`
pub fn read_command<R: Read + ?Sized>(reader: &mut R) -> Result<Command> {
    decode_command(&read_frame(reader)?)
}

pub fn write_command<W: Write + ?Sized>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command)?)?;
    writer.flush()?;
    Ok(())
}

pub fn read_response<R: Read + ?Sized>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

pub fn write_response<W: Write + ?Sized>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response)?)?;
    writer.flush()?;
    Ok(())
}
