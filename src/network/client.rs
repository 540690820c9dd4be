//! Clients
//!
//! [`Client`] speaks the framed protocol over one TCP connection.
//! [`RpcClient`] forwards [`DeviceService`] calls to a server's localhost
//! RPC port; [`PeerClient`] drives another object server's peer port during
//! replication.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::audit::{AuditQuota, AuditStats};
use crate::cancel::{copy_exact, CancelToken};
use crate::device::HashesResult;
use crate::error::{PackError, Result};
use crate::object::{ObjectMeta, Timestamp};
use crate::protocol::{
    encode_command, read_response, write_command, Command, DeviceTarget, HashesRequest, Response,
    Status,
};
use crate::replicator::{Node, ObjectTimestamps, SyncResult, WantedParts};

use super::service::DeviceService;

/// One framed-protocol connection
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    addr: SocketAddr,
}

impl Client {
    /// Connect to `addr`; `timeout` bounds the connect and every read/write
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| PackError::Network(format!("cannot resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| PackError::Network(format!("no address for {}", addr)))?;

        let stream = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|e| PackError::Network(format!("cannot connect to {}: {}", resolved, e)))?;
        stream.set_nodelay(true)?;
        if !timeout.is_zero() {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            addr: resolved,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a command and read its response
    pub fn call(&mut self, command: &Command) -> Result<Response> {
        write_command(&mut self.writer, command)?;
        read_response(&mut self.reader)
    }

    /// Send a command and decode the value of an OK response
    pub fn call_value<T: DeserializeOwned>(&mut self, command: &Command) -> Result<T> {
        self.call(command)?.into_value()
    }

    /// Send a command followed by exactly `len` body bytes from `body`
    pub fn call_with_body<R: Read + ?Sized>(
        &mut self,
        command: &Command,
        body: &mut R,
        len: u64,
        cancel: &CancelToken,
    ) -> Result<Response> {
        self.writer.write_all(&encode_command(command)?)?;
        copy_exact(body, &mut self.writer, len, cancel)?;
        self.writer.flush()?;
        read_response(&mut self.reader)
    }

    pub fn ping(&mut self) -> Result<()> {
        let response = self.call(&Command::Ping)?;
        match (response.status, response.payload.as_deref()) {
            (Status::Ok, Some(b"PONG")) => Ok(()),
            (status, _) => Err(PackError::Protocol(format!(
                "unexpected ping reply from {}: {:?}",
                self.addr, status
            ))),
        }
    }
}

/// [`DeviceService`] backed by a server's localhost RPC port
///
/// Opens a fresh connection per call, so one client can be shared by every
/// daemon worker.
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    fn call_value<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        Client::connect(&self.addr, self.timeout)?.call_value(&command)
    }

    pub fn ping(&self) -> Result<()> {
        Client::connect(&self.addr, self.timeout)?.ping()
    }
}

impl DeviceService for RpcClient {
    fn list_partitions(&self, target: &DeviceTarget) -> Result<Vec<u32>> {
        self.call_value(Command::ListPartitions {
            target: target.clone(),
        })
    }

    fn list_partition_suffixes(
        &self,
        target: &DeviceTarget,
        partition: u32,
    ) -> Result<Vec<String>> {
        self.call_value(Command::ListPartitionSuffixes {
            target: target.clone(),
            partition,
        })
    }

    fn audit_partition(
        &self,
        target: &DeviceTarget,
        partition: u32,
        quota: AuditQuota,
    ) -> Result<AuditStats> {
        self.call_value(Command::AuditPartition {
            target: target.clone(),
            partition,
            quota,
        })
    }

    fn get_hashes(
        &self,
        target: &DeviceTarget,
        partition: u32,
        request: &HashesRequest,
    ) -> Result<HashesResult> {
        self.call_value(Command::GetHashes {
            target: target.clone(),
            partition,
            request: request.clone(),
        })
    }

    fn sync(
        &self,
        target: &DeviceTarget,
        partition: u32,
        peer: &Node,
        suffixes: &[String],
    ) -> Result<SyncResult> {
        self.call_value(Command::Sync {
            target: target.clone(),
            partition,
            peer: peer.clone(),
            suffixes: suffixes.to_vec(),
        })
    }

    fn delete_handoff(&self, target: &DeviceTarget, partition: u32) -> Result<()> {
        self.call_value(Command::DeleteHandoff {
            target: target.clone(),
            partition,
        })
    }
}

/// Connection to another object server's peer port
pub struct PeerClient {
    client: Client,
}

impl PeerClient {
    pub fn connect(node: &Node, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::connect(&node.addr(), timeout)?,
        })
    }

    /// Suffix digests of the peer's partition
    pub fn replicate(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        recalculate: Vec<String>,
    ) -> Result<BTreeMap<String, String>> {
        self.client.call_value(&Command::Replicate {
            target: target.clone(),
            partition,
            recalculate,
        })
    }

    /// Parts of the offered objects the peer wants
    pub fn diff(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        offered: BTreeMap<String, ObjectTimestamps>,
    ) -> Result<BTreeMap<String, WantedParts>> {
        self.client.call_value(&Command::Diff {
            target: target.clone(),
            partition,
            offered,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_object<R: Read + ?Sized>(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        meta: ObjectMeta,
        content_length: u64,
        body: &mut R,
        cancel: &CancelToken,
    ) -> Result<()> {
        let command = Command::PutObject {
            target: target.clone(),
            partition,
            hash: hash.to_string(),
            meta,
            content_length,
        };
        self.client
            .call_with_body(&command, body, content_length, cancel)?
            .into_value()
    }

    pub fn post_object(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        meta: ObjectMeta,
    ) -> Result<()> {
        self.client.call_value(&Command::PostObject {
            target: target.clone(),
            partition,
            hash: hash.to_string(),
            meta,
        })
    }

    pub fn delete_object(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        name: &str,
        timestamp: &Timestamp,
    ) -> Result<()> {
        self.client.call_value(&Command::DeleteObject {
            target: target.clone(),
            partition,
            hash: hash.to_string(),
            name: name.to_string(),
            timestamp: timestamp.clone(),
        })
    }

    /// Fetch an object, streaming its data into `sink`
    pub fn get_object<W: Write + ?Sized>(
        &mut self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> Result<ObjectMeta> {
        let meta: ObjectMeta = self.client.call_value(&Command::GetObject {
            target: target.clone(),
            partition,
            hash: hash.to_string(),
        })?;
        copy_exact(&mut self.client.reader, sink, meta.data_size, cancel)?;
        Ok(meta)
    }

    pub fn ping(&mut self) -> Result<()> {
        self.client.ping()
    }
}
