//! Transfer handshake: two-node bootstrap for an out-of-band bulk transfer.
//!
//! A target process registers a buffer with its transport agent, listens on
//! TCP and hands the initiator everything it needs to reach that buffer. The
//! bulk transfer itself belongs to the transport agent; this crate only moves
//! the bootstrap metadata.
//!
//! ## Architecture
//!
//! - **HandshakeMessage**: the single newline-delimited JSON frame sent by the target
//! - **TransportAgent**: seam to the RDMA transport library ([`HostAgent`] in-tree)
//! - **TargetSession / InitiatorSession**: the two role state machines
//! - **TransportEnv**: network-device selection and informational environment

pub mod agent;
pub mod env;
pub mod message;
pub mod retry;
pub mod session;

pub use agent::{AgentConfig, AgentError, HostAgent, MemoryKind, RegDescList, TransportAgent};
pub use env::TransportEnv;
pub use message::{HandshakeMessage, COMPLETION_TOKEN};
pub use session::{
    Completion, InitiatorReport, InitiatorSession, RoleState, TargetReport, TargetSession,
    WireError,
};
