//! Transport agent seam.
//!
//! [`TransportAgent`] is the surface the handshake needs from an RDMA-capable
//! transport library: memory registration, metadata export and remote-agent
//! loading. [`HostAgent`] implements it over host memory with an in-process
//! registration table, which is enough to drive the bootstrap protocol end to
//! end without NICs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Format tag embedded in [`HostAgent`] metadata.
const METADATA_FORMAT: &str = "fabcheck-host-agent/1";

/// Errors raised by a transport agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{0}' was configured without any backend")]
    NoBackends(String),
    #[error("Cannot register an empty buffer")]
    EmptyBuffer,
    #[error("Memory region at {addr:#x} ({len} bytes) is not registered")]
    NotRegistered { addr: u64, len: u64 },
    #[error("Invalid agent metadata: {0}")]
    InvalidMetadata(String),
    #[error("Remote agent '{0}' is already loaded")]
    RemoteExists(String),
}

/// Where a registered buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryKind {
    #[serde(rename = "DRAM")]
    Dram,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Dram => write!(f, "DRAM"),
        }
    }
}

/// One contiguous memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegDesc {
    pub addr: u64,
    pub len: u64,
    pub device_id: u32,
}

/// Descriptors returned by [`TransportAgent::register_memory`].
///
/// The `Display` form is what travels as `mem_desc` in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegDescList {
    pub kind: MemoryKind,
    pub descs: Vec<RegDesc>,
}

impl fmt::Display for RegDescList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegDescList({}, [", self.kind)?;
        for (i, d) in self.descs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({:#x}, {}, {})", d.addr, d.len, d.device_id)?;
        }
        write!(f, "])")
    }
}

/// Descriptors describing the local side of a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XferDescList {
    pub kind: MemoryKind,
    pub descs: Vec<RegDesc>,
}

/// Construction parameters for an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Backend plugins to load, in preference order.
    pub backends: Vec<String>,
    /// Network devices the backend should bind (e.g. `mlx5_0:1`).
    /// `None` leaves selection to the backend.
    pub net_devices: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backends: vec!["UCX".to_string()],
            net_devices: None,
        }
    }
}

/// The operations the bootstrap protocol needs from a transport library.
pub trait TransportAgent: Send {
    /// Local agent name.
    fn name(&self) -> &str;

    /// Backends this agent was created with.
    fn backends(&self) -> &[String];

    /// Register buffers so remote agents can address them.
    fn register_memory(
        &mut self,
        buffers: &[&[u8]],
        kind: MemoryKind,
    ) -> Result<RegDescList, AgentError>;

    /// Release a previous registration.
    fn deregister_memory(&mut self, descs: &RegDescList) -> Result<(), AgentError>;

    /// Serialized identity of this agent, to be shipped out of band.
    fn agent_metadata(&self) -> Result<Vec<u8>, AgentError>;

    /// Load a peer from its metadata. Returns the peer's agent name.
    fn add_remote_agent(&mut self, metadata: &[u8]) -> Result<String, AgentError>;

    /// Build transfer descriptors for local buffers.
    fn xfer_descs(&self, buffers: &[&[u8]], kind: MemoryKind)
        -> Result<XferDescList, AgentError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionRecord {
    kind: MemoryKind,
    #[serde(flatten)]
    desc: RegDesc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentMetadata {
    format: String,
    name: String,
    instance_id: String,
    backends: Vec<String>,
    #[serde(default)]
    net_devices: Option<String>,
    regions: Vec<RegionRecord>,
}

/// Host-memory transport agent.
pub struct HostAgent {
    name: String,
    instance_id: Uuid,
    config: AgentConfig,
    regions: BTreeMap<u64, RegionRecord>,
    remotes: BTreeMap<String, AgentMetadata>,
}

impl HostAgent {
    /// Create an agent with the given name.
    pub fn new(name: impl Into<String>, config: AgentConfig) -> Result<Self, AgentError> {
        let name = name.into();
        if config.backends.is_empty() {
            return Err(AgentError::NoBackends(name));
        }
        debug!(
            agent = %name,
            backends = ?config.backends,
            net_devices = ?config.net_devices,
            "created host transport agent"
        );
        Ok(Self {
            name,
            instance_id: Uuid::new_v4(),
            config,
            regions: BTreeMap::new(),
            remotes: BTreeMap::new(),
        })
    }

    fn describe(buffers: &[&[u8]]) -> Result<Vec<RegDesc>, AgentError> {
        buffers
            .iter()
            .map(|buf| {
                if buf.is_empty() {
                    return Err(AgentError::EmptyBuffer);
                }
                Ok(RegDesc {
                    addr: buf.as_ptr() as u64,
                    len: buf.len() as u64,
                    device_id: 0,
                })
            })
            .collect()
    }
}

impl TransportAgent for HostAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn backends(&self) -> &[String] {
        &self.config.backends
    }

    fn register_memory(
        &mut self,
        buffers: &[&[u8]],
        kind: MemoryKind,
    ) -> Result<RegDescList, AgentError> {
        let descs = Self::describe(buffers)?;
        for desc in &descs {
            self.regions.insert(desc.addr, RegionRecord { kind, desc: *desc });
        }
        debug!(agent = %self.name, regions = descs.len(), %kind, "registered memory");
        Ok(RegDescList { kind, descs })
    }

    fn deregister_memory(&mut self, descs: &RegDescList) -> Result<(), AgentError> {
        for desc in &descs.descs {
            match self.regions.get(&desc.addr) {
                Some(record) if record.desc.len == desc.len && record.kind == descs.kind => {}
                _ => {
                    return Err(AgentError::NotRegistered {
                        addr: desc.addr,
                        len: desc.len,
                    })
                }
            }
        }
        for desc in &descs.descs {
            self.regions.remove(&desc.addr);
        }
        debug!(agent = %self.name, regions = descs.descs.len(), "deregistered memory");
        Ok(())
    }

    fn agent_metadata(&self) -> Result<Vec<u8>, AgentError> {
        let metadata = AgentMetadata {
            format: METADATA_FORMAT.to_string(),
            name: self.name.clone(),
            instance_id: self.instance_id.to_string(),
            backends: self.config.backends.clone(),
            net_devices: self.config.net_devices.clone(),
            regions: self.regions.values().cloned().collect(),
        };
        serde_json::to_vec(&metadata).map_err(|e| AgentError::InvalidMetadata(e.to_string()))
    }

    fn add_remote_agent(&mut self, metadata: &[u8]) -> Result<String, AgentError> {
        let remote: AgentMetadata = serde_json::from_slice(metadata)
            .map_err(|e| AgentError::InvalidMetadata(e.to_string()))?;
        if remote.format != METADATA_FORMAT {
            return Err(AgentError::InvalidMetadata(format!(
                "unsupported format '{}'",
                remote.format
            )));
        }
        if self.remotes.contains_key(&remote.name) {
            return Err(AgentError::RemoteExists(remote.name));
        }
        let name = remote.name.clone();
        debug!(
            agent = %self.name,
            remote = %name,
            regions = remote.regions.len(),
            "loaded remote agent"
        );
        self.remotes.insert(name.clone(), remote);
        Ok(name)
    }

    fn xfer_descs(
        &self,
        buffers: &[&[u8]],
        kind: MemoryKind,
    ) -> Result<XferDescList, AgentError> {
        Ok(XferDescList {
            kind,
            descs: Self::describe(buffers)?,
        })
    }
}

#[cfg(test)]
impl HostAgent {
    pub(crate) fn registered_regions(&self) -> usize {
        self.regions.len()
    }

    pub(crate) fn remote_registered_bytes(&self, name: &str) -> Option<u64> {
        self.remotes
            .get(name)
            .map(|m| m.regions.iter().map(|r| r.desc.len).sum())
    }
}
