//! Target and initiator role sessions.
//!
//! Both roles walk the same state machine:
//!
//! ```text
//! INIT -> CONFIGURE_TRANSPORT -> {LISTEN | CONNECT} -> HANDSHAKE
//!      -> TRANSFER -> ACK -> TERMINATE
//! ```
//!
//! Every step is fatal on error; there is no recovery past the initiator's
//! bounded connect retry. A successful run ends in a [`Completion`], whose
//! [`Completion::terminate`] exits the process without tearing the transport
//! agent down.

use crate::agent::{AgentError, MemoryKind, RegDescList, TransportAgent};
use crate::message::{
    completion_frame, decode_frame, encode_frame, is_completion, HandshakeMessage,
    FRAME_DELIMITER,
};
use crate::retry::{retry_async, RetryConfig, RetryOutcome};

use fabcheck_types::TransferConfig;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MIB: u64 = 1024 * 1024;
const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

/// Errors from the handshake layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Agent metadata is not valid base64: {0}")]
    Metadata(#[from] base64::DecodeError),
    #[error("Transport agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Target at {addr} not reachable after {attempts} attempts")]
    ConnectExhausted { addr: String, attempts: u32 },
    #[error("Connection closed before frame delimiter ({received} bytes received)")]
    IncompleteFrame { received: usize },
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Unexpected acknowledgment: {0:?}")]
    UnexpectedAck(String),
    #[error("Buffer size {0} does not fit in memory on this host")]
    BufferTooLarge(u64),
    #[error("Target advertised an empty buffer")]
    EmptyAdvertisement,
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        state: RoleState,
        operation: &'static str,
    },
}

/// Position in the role state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Init,
    ConfigureTransport,
    Listen,
    Connect,
    Handshake,
    Transfer,
    Ack,
    Terminate,
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleState::Init => "INIT",
            RoleState::ConfigureTransport => "CONFIGURE_TRANSPORT",
            RoleState::Listen => "LISTEN",
            RoleState::Connect => "CONNECT",
            RoleState::Handshake => "HANDSHAKE",
            RoleState::Transfer => "TRANSFER",
            RoleState::Ack => "ACK",
            RoleState::Terminate => "TERMINATE",
        };
        f.write_str(s)
    }
}

fn advance(
    state: &mut RoleState,
    expected: RoleState,
    next: RoleState,
    operation: &'static str,
) -> Result<(), WireError> {
    if *state != expected {
        return Err(WireError::InvalidState {
            state: *state,
            operation,
        });
    }
    debug!(from = %state, to = %next, "role state transition");
    *state = next;
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal state
// ---------------------------------------------------------------------------

/// Successful end of a role: the agent is still alive and owned here.
///
/// The transport library is known to fault while tearing down after a
/// successful transfer, so the run ends with [`Completion::terminate`], which
/// flushes output and exits without running the agent's destructor.
pub struct Completion<A, R> {
    agent: A,
    report: R,
}

impl<A, R: fmt::Debug> fmt::Debug for Completion<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<A, R> Completion<A, R> {
    /// What the role achieved.
    pub fn report(&self) -> &R {
        &self.report
    }

    /// The agent, still registered with whatever it holds.
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Flush stdout/stderr and exit with status 0, bypassing teardown.
    pub fn terminate(self) -> ! {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        std::process::exit(0)
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Read until a newline, accumulating partial reads.
///
/// Returns the line including its delimiter; bytes after it are discarded.
/// End of stream before the delimiter is [`WireError::IncompleteFrame`].
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(WireError::IncompleteFrame {
                received: data.len(),
            });
        }
        let scanned = data.len();
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = data[scanned..].iter().position(|b| *b == FRAME_DELIMITER) {
            data.truncate(scanned + pos + 1);
            return Ok(data);
        }
        if data.len() > max {
            return Err(WireError::FrameTooLarge {
                size: data.len(),
                max,
            });
        }
    }
}

/// Write a complete frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn buffer_len(size: u64) -> Result<usize, WireError> {
    usize::try_from(size).map_err(|_| WireError::BufferTooLarge(size))
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What the target observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    /// Bytes registered and advertised.
    pub buffer_size: u64,
    /// The advertised memory descriptor.
    pub mem_desc: String,
    /// Address of the initiator that connected.
    pub peer: SocketAddr,
    /// The acknowledgment line, without delimiter.
    pub ack: String,
}

/// Target role: registers a buffer, listens, serves one initiator.
pub struct TargetSession<A: TransportAgent> {
    agent: A,
    config: TransferConfig,
    state: RoleState,
    buffer: Vec<u8>,
    descs: Option<RegDescList>,
    metadata: Vec<u8>,
    listener: Option<TcpListener>,
}

impl<A: TransportAgent> TargetSession<A> {
    pub fn new(agent: A, config: TransferConfig) -> Self {
        Self {
            agent,
            config,
            state: RoleState::Init,
            buffer: Vec::new(),
            descs: None,
            metadata: Vec::new(),
            listener: None,
        }
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    /// Allocate the test buffer, register it and export agent metadata.
    pub fn configure(&mut self) -> Result<(), WireError> {
        advance(
            &mut self.state,
            RoleState::Init,
            RoleState::ConfigureTransport,
            "configure transport",
        )?;
        let len = buffer_len(self.config.buffer_size)?;
        info!(
            agent = %self.agent.name(),
            backends = ?self.agent.backends(),
            "Allocating {} MB test buffer",
            self.config.buffer_size / MIB
        );
        self.buffer = vec![1u8; len];

        info!("Registering memory with transport agent");
        let descs = self
            .agent
            .register_memory(&[self.buffer.as_slice()], MemoryKind::Dram)?;
        self.metadata = self.agent.agent_metadata()?;
        self.descs = Some(descs);
        Ok(())
    }

    /// Bind the bootstrap listener. Returns the bound address.
    pub async fn listen(&mut self, host: &str, port: u16) -> Result<SocketAddr, WireError> {
        advance(
            &mut self.state,
            RoleState::ConfigureTransport,
            RoleState::Listen,
            "listen",
        )?;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| WireError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Listening for initiator connection on {local_addr}");
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Accept one initiator, send the handshake and wait for its ack.
    pub async fn serve(mut self) -> Result<Completion<A, TargetReport>, WireError> {
        advance(
            &mut self.state,
            RoleState::Listen,
            RoleState::Handshake,
            "serve",
        )?;
        let (listener, descs) = match (self.listener.take(), self.descs.take()) {
            (Some(listener), Some(descs)) => (listener, descs),
            _ => {
                return Err(WireError::InvalidState {
                    state: self.state,
                    operation: "serve",
                })
            }
        };

        let (mut stream, peer) = listener.accept().await?;
        info!("Connected to initiator from {peer}");

        info!("Sending metadata to initiator");
        let mem_desc = descs.to_string();
        let msg = HandshakeMessage::new(&self.metadata, self.config.buffer_size, mem_desc.clone());
        write_frame(&mut stream, &encode_frame(&msg)?).await?;

        advance(
            &mut self.state,
            RoleState::Handshake,
            RoleState::Transfer,
            "await transfer",
        )?;
        info!("Waiting for transfer completion...");
        let line = read_frame(&mut stream, self.config.max_frame_bytes).await?;
        let ack = String::from_utf8_lossy(&line).trim_end().to_string();
        info!("Received: {ack}");

        advance(
            &mut self.state,
            RoleState::Transfer,
            RoleState::Ack,
            "acknowledge",
        )?;
        if !is_completion(&line) {
            return Err(WireError::UnexpectedAck(ack));
        }

        self.agent.deregister_memory(&descs)?;
        drop(stream);
        drop(listener);

        advance(
            &mut self.state,
            RoleState::Ack,
            RoleState::Terminate,
            "terminate",
        )?;
        info!("Target completed successfully");
        Ok(Completion {
            agent: self.agent,
            report: TargetReport {
                buffer_size: self.config.buffer_size,
                mem_desc,
                peer,
                ack,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// What the initiator observed.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatorReport {
    /// Connect attempts used (1 = first try).
    pub connect_attempts: u32,
    /// Name of the remote agent loaded from the handshake.
    pub remote_agent: String,
    /// Buffer size advertised by the target.
    pub advertised_size: u64,
    /// Length of the local buffer allocated and registered.
    pub local_buffer_len: usize,
    /// Wall time of the simulated transfer.
    pub elapsed: Duration,
    /// Derived throughput in GB/s.
    pub bandwidth_gbps: f64,
}

/// Initiator role: connects, loads the target's metadata, simulates the
/// transfer and acknowledges.
pub struct InitiatorSession<A: TransportAgent> {
    agent: A,
    config: TransferConfig,
    state: RoleState,
    stream: Option<TcpStream>,
    connect_attempts: u32,
}

impl<A: TransportAgent> InitiatorSession<A> {
    pub fn new(agent: A, config: TransferConfig) -> Self {
        Self {
            agent,
            config,
            state: RoleState::Init,
            stream: None,
            connect_attempts: 0,
        }
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    /// Mark the transport as configured. The agent is built by the caller.
    pub fn configure(&mut self) -> Result<(), WireError> {
        advance(
            &mut self.state,
            RoleState::Init,
            RoleState::ConfigureTransport,
            "configure transport",
        )?;
        info!(
            agent = %self.agent.name(),
            backends = ?self.agent.backends(),
            "Transport agent ready"
        );
        Ok(())
    }

    /// Connect to the target, retrying while the connection is refused.
    ///
    /// Returns the number of attempts used.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<u32, WireError> {
        advance(
            &mut self.state,
            RoleState::ConfigureTransport,
            RoleState::Connect,
            "connect",
        )?;
        let addr = format!("{host}:{port}");
        info!("Connecting to target at {addr}");

        let retry = RetryConfig::fixed(
            self.config.connect_attempts,
            self.config.connect_interval(),
        );
        let max = retry.max_attempts;
        let outcome = retry_async(
            &retry,
            |attempt| {
                let host = host.to_string();
                async move {
                    let result = TcpStream::connect((host.as_str(), port)).await;
                    if let Err(e) = &result {
                        if e.kind() == io::ErrorKind::ConnectionRefused && attempt < max {
                            info!("Waiting for target... ({attempt}/{max})");
                        }
                    }
                    result
                }
            },
            |e: &io::Error| e.kind() == io::ErrorKind::ConnectionRefused,
        )
        .await;

        match outcome {
            RetryOutcome::Success { result, attempts } => {
                info!(attempts, "Connected to target");
                self.stream = Some(result);
                self.connect_attempts = attempts;
                Ok(attempts)
            }
            RetryOutcome::Exhausted { attempts, .. } => {
                error!("Failed to connect to target after {attempts} attempts");
                Err(WireError::ConnectExhausted { addr, attempts })
            }
            RetryOutcome::Fatal { error, .. } => Err(WireError::Connect {
                addr,
                source: error,
            }),
        }
    }

    /// Receive the handshake, simulate the transfer, send the ack.
    pub async fn run(mut self) -> Result<Completion<A, InitiatorReport>, WireError> {
        advance(
            &mut self.state,
            RoleState::Connect,
            RoleState::Handshake,
            "run handshake",
        )?;
        let Some(mut stream) = self.stream.take() else {
            return Err(WireError::InvalidState {
                state: self.state,
                operation: "run handshake",
            });
        };

        info!("Receiving metadata from target");
        let line = read_frame(&mut stream, self.config.max_frame_bytes).await?;
        let msg = decode_frame(&line)?;
        info!("Received buffer size: {} MB", msg.buffer_size / MIB);
        debug!(mem_desc = %msg.mem_desc, "remote memory descriptor");
        if msg.buffer_size == 0 {
            error!("Target advertised a zero-byte buffer");
            return Err(WireError::EmptyAdvertisement);
        }

        info!("Registering remote agent");
        let metadata = msg.metadata_bytes()?;
        let remote_agent = self.agent.add_remote_agent(&metadata)?;

        let local_buffer = vec![0u8; buffer_len(msg.buffer_size)?];

        info!("Registering local memory");
        let local_descs = self
            .agent
            .register_memory(&[local_buffer.as_slice()], MemoryKind::Dram)?;

        info!("Getting transfer descriptors");
        let xfer = self.agent.xfer_descs(&[local_buffer.as_slice()], MemoryKind::Dram)?;
        debug!(descs = xfer.descs.len(), "built local transfer descriptors");

        advance(
            &mut self.state,
            RoleState::Handshake,
            RoleState::Transfer,
            "transfer",
        )?;
        info!("Initiating transfer (READ operation)");
        let (elapsed, bandwidth_gbps) =
            simulate_transfer(msg.buffer_size, self.config.simulated_transfer()).await;
        info!("Transfer completed in {:.2}s", elapsed.as_secs_f64());
        info!("Bandwidth: {bandwidth_gbps:.2} GB/s");

        self.agent.deregister_memory(&local_descs)?;

        advance(&mut self.state, RoleState::Transfer, RoleState::Ack, "acknowledge")?;
        write_frame(&mut stream, &completion_frame()).await?;
        stream.shutdown().await?;

        advance(
            &mut self.state,
            RoleState::Ack,
            RoleState::Terminate,
            "terminate",
        )?;
        info!("Initiator completed successfully");
        Ok(Completion {
            agent: self.agent,
            report: InitiatorReport {
                connect_attempts: self.connect_attempts,
                remote_agent,
                advertised_size: msg.buffer_size,
                local_buffer_len: local_buffer.len(),
                elapsed,
                bandwidth_gbps,
            },
        })
    }
}

/// Stand-in for the real READ: waits `duration` and reports the throughput
/// the transfer would have needed.
///
/// No data moves. The descriptor exchange with the remote side is not
/// performed.
pub async fn simulate_transfer(bytes: u64, duration: Duration) -> (Duration, f64) {
    warn!("Transfer descriptor exchange simplified: simulated transfer, no data moved");
    let start = Instant::now();
    tokio::time::sleep(duration).await;
    let elapsed = start.elapsed();
    (elapsed, bandwidth_gbps(bytes, elapsed))
}

/// Throughput in GB/s (binary gigabytes); zero for a zero-length interval.
pub fn bandwidth_gbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / GIB) / secs
    } else {
        0.0
    }
}
