//! Transport environment: network-device selection and informational
//! variables.
//!
//! The environment is read once into a [`TransportEnv`] snapshot. Device
//! auto-detection feeds the resulting [`AgentConfig`]; the process environment
//! itself is never modified.

use crate::agent::AgentConfig;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Variable selecting the transport's network devices.
pub const NET_DEVICES_VAR: &str = "UCX_NET_DEVICES";

/// Prefix of all transport tuning variables.
pub const TRANSPORT_VAR_PREFIX: &str = "UCX_";

/// Filesystem locations probed for RDMA devices.
#[derive(Debug, Clone)]
pub struct SysPaths {
    /// Character devices, normally `/dev/infiniband`.
    pub dev_infiniband: PathBuf,
    /// Device classes, normally `/sys/class/infiniband`.
    pub sys_infiniband: PathBuf,
}

impl Default for SysPaths {
    fn default() -> Self {
        Self {
            dev_infiniband: PathBuf::from("/dev/infiniband"),
            sys_infiniband: PathBuf::from("/sys/class/infiniband"),
        }
    }
}

/// Where the network-device setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetDevices {
    /// Set explicitly through `UCX_NET_DEVICES`.
    Configured(String),
    /// Found by probing the RDMA device tree.
    Detected(String),
    /// Left to the transport's own auto-detection.
    Auto,
}

impl NetDevices {
    /// The device string to hand to the agent, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            NetDevices::Configured(v) | NetDevices::Detected(v) => Some(v),
            NetDevices::Auto => None,
        }
    }
}

/// Snapshot of the variables the transfer test consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportEnv {
    /// All `UCX_*` variables.
    pub transport_vars: BTreeMap<String, String>,
    /// `NODE_NAME`, or `unknown`.
    pub node_name: String,
    /// `POD_NAME`, or `unknown`.
    pub pod_name: String,
}

impl TransportEnv {
    /// Capture the current process environment.
    pub fn from_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Like [`from_vars`](Self::from_vars), skipping pairs that are not UTF-8.
    pub fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let utf8 = vars
            .into_iter()
            .filter_map(|(k, v)| match (k.into_string(), v.into_string()) {
                (Ok(k), Ok(v)) => Some((k, v)),
                (Ok(k), Err(_)) => {
                    debug!(var = %k, "Skipping variable with non-UTF-8 value");
                    None
                }
                (Err(_), _) => None,
            });
        Self::from_vars(utf8)
    }

    /// Build a snapshot from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = TransportEnv {
            node_name: "unknown".to_string(),
            pod_name: "unknown".to_string(),
            ..Default::default()
        };
        for (k, v) in vars {
            let (k, v) = (k.into(), v.into());
            match k.as_str() {
                "NODE_NAME" => env.node_name = v,
                "POD_NAME" => env.pod_name = v,
                _ if k.starts_with(TRANSPORT_VAR_PREFIX) => {
                    env.transport_vars.insert(k, v);
                }
                _ => {}
            }
        }
        env
    }

    /// Value of `UCX_NET_DEVICES`, when set.
    pub fn configured_net_devices(&self) -> Option<&str> {
        self.transport_vars.get(NET_DEVICES_VAR).map(String::as_str)
    }

    /// Decide the network devices: explicit setting first, then detection.
    pub fn resolve_net_devices(&self, paths: &SysPaths) -> NetDevices {
        if let Some(configured) = self.configured_net_devices() {
            info!("Using configured {NET_DEVICES_VAR}={configured}");
            return NetDevices::Configured(configured.to_string());
        }
        match detect_rdma_interface(paths) {
            Some(iface) => {
                info!("Auto-detected {NET_DEVICES_VAR}={iface}");
                NetDevices::Detected(iface)
            }
            None => {
                info!("Using transport auto-detection for RDMA devices");
                NetDevices::Auto
            }
        }
    }

    /// Build the agent configuration for this environment.
    pub fn agent_config(&self, backends: Vec<String>, paths: &SysPaths) -> AgentConfig {
        let net_devices = self.resolve_net_devices(paths);
        if !self.transport_vars.is_empty() {
            info!(vars = ?self.transport_vars, "Transport configuration");
        }
        AgentConfig {
            backends,
            net_devices: net_devices.value().map(str::to_string),
        }
    }
}

/// Pick an RDMA interface by probing the device tree.
///
/// Returns `None` when the transport should auto-detect: either the RDMA
/// connection manager is present, no verbs device exists, or probing failed.
pub fn detect_rdma_interface(paths: &SysPaths) -> Option<String> {
    match probe_rdma_interface(paths) {
        Ok(iface) => iface,
        Err(e) => {
            warn!("Failed to detect RDMA interface: {e}");
            None
        }
    }
}

fn probe_rdma_interface(paths: &SysPaths) -> io::Result<Option<String>> {
    // rdma_cm serves both RoCE and InfiniBand; the transport picks on its own.
    if paths.dev_infiniband.join("rdma_cm").exists() {
        info!("Found rdma_cm device, will let the transport auto-detect");
        return Ok(None);
    }

    let verbs = sorted_entries(&paths.dev_infiniband, "uverbs")?;
    let Some(first) = verbs.first() else {
        warn!("No RDMA devices found, using default");
        return Ok(None);
    };

    let digits: String = first
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Ok(None);
    }

    // Some InfiniBand fabrics name HCAs by PCI slot (ibpXsY) instead of mlx5_N.
    let ibp = sorted_entries(&paths.sys_infiniband, "ibp").unwrap_or_default();
    if let Some(hca) = ibp.first() {
        let iface = format!("{hca}:1");
        info!("Detected RDMA interface: {iface} (slot-named InfiniBand HCA)");
        return Ok(Some(iface));
    }

    let iface = format!("mlx5_{digits}:1");
    info!("Detected RDMA interface: {iface}");
    Ok(Some(iface))
}

fn sorted_entries(dir: &Path, prefix: &str) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, SysPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths {
            dev_infiniband: dir.path().join("dev"),
            sys_infiniband: dir.path().join("sys"),
        };
        fs::create_dir_all(&paths.dev_infiniband).unwrap();
        fs::create_dir_all(&paths.sys_infiniband).unwrap();
        (dir, paths)
    }

    #[test]
    fn test_rdma_cm_defers_to_transport() {
        let (_dir, paths) = fixture();
        fs::write(paths.dev_infiniband.join("rdma_cm"), b"").unwrap();
        fs::write(paths.dev_infiniband.join("uverbs0"), b"").unwrap();
        assert_eq!(detect_rdma_interface(&paths), None);
    }

    #[test]
    fn test_first_uverbs_maps_to_mlx5() {
        let (_dir, paths) = fixture();
        fs::write(paths.dev_infiniband.join("uverbs3"), b"").unwrap();
        fs::write(paths.dev_infiniband.join("uverbs1"), b"").unwrap();
        assert_eq!(detect_rdma_interface(&paths), Some("mlx5_1:1".to_string()));
    }

    #[test]
    fn test_ibp_name_preferred() {
        let (_dir, paths) = fixture();
        fs::write(paths.dev_infiniband.join("uverbs0"), b"").unwrap();
        fs::create_dir(paths.sys_infiniband.join("ibp12s0")).unwrap();
        fs::create_dir(paths.sys_infiniband.join("mlx5_0")).unwrap();
        assert_eq!(detect_rdma_interface(&paths), Some("ibp12s0:1".to_string()));
    }

    #[test]
    fn test_no_devices() {
        let (_dir, paths) = fixture();
        assert_eq!(detect_rdma_interface(&paths), None);
    }

    #[test]
    fn test_missing_device_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths {
            dev_infiniband: dir.path().join("absent"),
            sys_infiniband: dir.path().join("absent-too"),
        };
        assert_eq!(detect_rdma_interface(&paths), None);
    }

    #[test]
    fn test_env_snapshot() {
        let env = TransportEnv::from_vars([
            ("UCX_TLS", "rc,cuda_copy"),
            ("NODE_NAME", "gpu-node-7"),
            ("HOME", "/root"),
        ]);
        assert_eq!(env.node_name, "gpu-node-7");
        assert_eq!(env.pod_name, "unknown");
        assert_eq!(env.transport_vars.len(), 1);
        assert_eq!(env.configured_net_devices(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = TransportEnv::from_os_vars([
            (OsString::from("BINARY"), OsString::from_vec(b"\xff\xfe".to_vec())),
            (OsString::from_vec(b"\xffKEY".to_vec()), OsString::from("x")),
            (OsString::from("UCX_TLS"), OsString::from_vec(b"rc\xff".to_vec())),
            (OsString::from("POD_NAME"), OsString::from("pod-3")),
            (OsString::from("UCX_NET_DEVICES"), OsString::from("mlx5_0:1")),
        ]);
        assert_eq!(env.pod_name, "pod-3");
        assert_eq!(env.transport_vars.len(), 1);
        assert_eq!(env.configured_net_devices(), Some("mlx5_0:1"));
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        let env = TransportEnv::from_env();
        assert!(env
            .transport_vars
            .keys()
            .all(|k| k.starts_with(TRANSPORT_VAR_PREFIX)));
    }

    #[test]
    fn test_configured_devices_skip_detection() {
        let (_dir, paths) = fixture();
        fs::write(paths.dev_infiniband.join("uverbs0"), b"").unwrap();
        let env = TransportEnv::from_vars([(NET_DEVICES_VAR, "mlx5_4:1")]);
        assert_eq!(
            env.resolve_net_devices(&paths),
            NetDevices::Configured("mlx5_4:1".to_string())
        );
        let config = env.agent_config(vec!["UCX".to_string()], &paths);
        assert_eq!(config.net_devices.as_deref(), Some("mlx5_4:1"));
    }

    #[test]
    fn test_detected_devices_flow_into_agent_config() {
        let (_dir, paths) = fixture();
        fs::write(paths.dev_infiniband.join("uverbs2"), b"").unwrap();
        let env = TransportEnv::from_vars(Vec::<(String, String)>::new());
        let config = env.agent_config(vec!["UCX".to_string()], &paths);
        assert_eq!(config.net_devices.as_deref(), Some("mlx5_2:1"));
        assert_eq!(config.backends, vec!["UCX".to_string()]);
    }
}
