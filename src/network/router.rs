//! Command Router
//!
//! Executes decoded commands against a [`LocalService`] and writes the
//! response, streaming object bodies in either direction.

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::cancel::copy_exact;
use crate::error::{PackError, Result};
use crate::protocol::{write_response, Command, Response};

use super::service::{DeviceService, LocalService};

/// Which set of commands a listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Localhost daemon RPCs
    Rpc,
    /// Replication peers
    Peer,
}

/// Dispatches commands for one listener
pub struct Router {
    service: Arc<LocalService>,
    surface: Surface,
}

impl Router {
    pub fn new(service: Arc<LocalService>, surface: Surface) -> Self {
        Self { service, surface }
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    fn serves(&self, command: &Command) -> bool {
        let kind = command.command_type();
        match self.surface {
            Surface::Rpc => kind.is_rpc(),
            Surface::Peer => kind.is_peer(),
        }
    }

    /// Execute `command`, reading any body from `reader`, and write the
    /// response to `writer`
    ///
    /// An `Err` means the stream can no longer be trusted and the connection
    /// must be closed.
    pub fn handle<R, W>(&self, command: Command, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: Read,
        W: Write,
    {
        if !self.serves(&command) {
            let kind = command.command_type();
            write_response(
                writer,
                &Response::error(&format!("{:?} is not served on this port", kind)),
            )?;
            if command.body_len() > 0 {
                return Err(PackError::Protocol(format!("unexpected {:?} body", kind)));
            }
            return Ok(());
        }

        match command {
            Command::PutObject {
                target,
                partition,
                hash,
                meta,
                content_length,
            } => {
                let mut body = (&mut *reader).take(content_length);
                let result = self.service.put_object(
                    &target,
                    partition,
                    &hash,
                    meta,
                    content_length,
                    &mut body,
                );
                // Refusals before the body was read leave it in the stream
                let unread = body.limit();
                if unread > 0 {
                    io::copy(&mut body, &mut io::sink())?;
                    if body.limit() > 0 {
                        return Err(PackError::Protocol("truncated object body".to_string()));
                    }
                }
                write_response(writer, &respond(result))
            }
            Command::GetObject {
                target,
                partition,
                hash,
            } => match self.service.open_object(&target, partition, &hash) {
                Ok((meta, mut object)) => {
                    let len = meta.data_size;
                    write_response(writer, &Response::value(&meta)?)?;
                    copy_exact(&mut object, writer, len, self.service.cancel_token())?;
                    writer.flush()?;
                    Ok(())
                }
                Err(e) => write_response(writer, &Response::from_error(&e)),
            },
            other => {
                let response = self.dispatch(other);
                write_response(writer, &response)
            }
        }
    }

    fn dispatch(&self, command: Command) -> Response {
        let service = &self.service;
        match command {
            Command::Ping => Response::ok(Some(b"PONG".to_vec())),
            Command::ListPartitions { target } => respond(service.list_partitions(&target)),
            Command::ListPartitionSuffixes { target, partition } => {
                respond(service.list_partition_suffixes(&target, partition))
            }
            Command::AuditPartition {
                target,
                partition,
                quota,
            } => respond(service.audit_partition(&target, partition, quota)),
            Command::GetHashes {
                target,
                partition,
                request,
            } => respond(service.get_hashes(&target, partition, &request)),
            Command::Sync {
                target,
                partition,
                peer,
                suffixes,
            } => respond(service.sync(&target, partition, &peer, &suffixes)),
            Command::DeleteHandoff { target, partition } => {
                respond(service.delete_handoff(&target, partition))
            }
            Command::Replicate {
                target,
                partition,
                recalculate,
            } => respond(service.replicate(&target, partition, &recalculate)),
            Command::Diff {
                target,
                partition,
                offered,
            } => respond(service.diff(&target, partition, &offered)),
            Command::PostObject {
                target,
                partition,
                hash,
                meta,
            } => respond(service.post_object(&target, partition, &hash, meta)),
            Command::DeleteObject {
                target,
                partition,
                hash,
                name,
                timestamp,
            } => respond(service.delete_object(&target, partition, &hash, &name, timestamp)),
            Command::PutObject { .. } | Command::GetObject { .. } => {
                Response::error("streaming command routed without its body")
            }
        }
    }
}

/// Encode an operation's result as a response
fn respond<T: serde::Serialize>(result: Result<T>) -> Response {
    match result.and_then(|value| Response::value(&value)) {
        Ok(response) => response,
        Err(e) => {
            match &e {
                PackError::NotFound(_) | PackError::Conflict(_) | PackError::Race(_) => {
                    tracing::debug!(error = %e, "request refused");
                }
                _ => tracing::warn!(error = %e, "request failed"),
            }
            Response::from_error(&e)
        }
    }
}
