//! Wizard-collected cluster configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kubernetes role a host or container can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

/// How hosts address each other once trust is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Hosts talk over their physical LAN addresses
    Lan,

    /// Hosts talk over a virtual overlay network
    Overlay,
}

/// Hardware facts gathered by the probing step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareFacts {
    #[serde(default)]
    pub cpu_cores: u32,

    #[serde(default)]
    pub memory_gb: f64,

    #[serde(default)]
    pub disk_gb: f64,

    #[serde(default)]
    pub architecture: Option<String>,

    #[serde(default)]
    pub gpu_detected: bool,

    #[serde(default)]
    pub gpu_model: Option<String>,

    #[serde(default)]
    pub gpu_count: u32,
}

/// A container (e.g. LXD) hosted on a physical server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,

    pub address: String,

    #[serde(default)]
    pub roles: Vec<NodeRole>,

    #[serde(default)]
    pub overlay_address: Option<String>,

    #[serde(default)]
    pub gpu_passthrough: bool,
}

/// A physical server selected in the wizard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: String,

    pub address: String,

    #[serde(default)]
    pub roles: Vec<NodeRole>,

    #[serde(default)]
    pub overlay_address: Option<String>,

    #[serde(default)]
    pub hardware: Option<HardwareFacts>,

    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

/// Inclusive IPv4 range, e.g. the addresses reserved for the load balancer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: String,
    pub end: String,
}

/// Network settings resolved by the wizard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub mode: Option<NetworkMode>,

    #[serde(default)]
    pub lan_cidr: Option<String>,

    #[serde(default)]
    pub overlay_network_id: Option<String>,

    #[serde(default)]
    pub overlay_cidr: Option<String>,

    #[serde(default)]
    pub load_balancer_range: Option<IpRange>,

    /// Fixed ingress addresses; must fall inside the load balancer range
    #[serde(default)]
    pub ingress_ips: Vec<String>,
}

/// Everything the wizard screens collected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardState {
    #[serde(default)]
    pub cluster_name: Option<String>,

    #[serde(default)]
    pub domain_name: Option<String>,

    /// Account used for remote login on every host
    #[serde(default)]
    pub login_user: Option<String>,

    #[serde(default)]
    pub admin_username: Option<String>,

    #[serde(default)]
    pub hosts: Vec<HostSpec>,

    #[serde(default)]
    pub network: Option<NetworkSettings>,

    /// Inventory variable name -> environment variable holding the credential
    #[serde(default)]
    pub credential_refs: BTreeMap<String, String>,
}

impl WizardState {
    /// Non-empty login user, if any
    pub fn login_user(&self) -> Option<&str> {
        self.login_user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
    }

    pub fn network_mode(&self) -> Option<NetworkMode> {
        self.network.as_ref().and_then(|network| network.mode)
    }

    /// Hosts and containers flattened into one addressable list, in wizard order
    pub fn nodes(&self) -> Vec<NodeView<'_>> {
        let mut nodes = Vec::new();
        for host in &self.hosts {
            nodes.push(NodeView {
                name: &host.hostname,
                address: &host.address,
                roles: &host.roles,
                overlay_address: host.overlay_address.as_deref(),
                parent: None,
                hardware: host.hardware.as_ref(),
                gpu_passthrough: false,
                has_containers: !host.containers.is_empty(),
            });
            for container in &host.containers {
                nodes.push(NodeView {
                    name: &container.name,
                    address: &container.address,
                    roles: &container.roles,
                    overlay_address: container.overlay_address.as_deref(),
                    parent: Some(&host.hostname),
                    hardware: None,
                    gpu_passthrough: container.gpu_passthrough,
                    has_containers: false,
                });
            }
        }
        nodes
    }

    /// Name of the single control-plane node, when exactly one exists
    pub fn control_plane(&self) -> Option<String> {
        let nodes = self.nodes();
        let mut control_planes = nodes.iter().filter(|n| n.is_control_plane());
        match (control_planes.next(), control_planes.next()) {
            (Some(node), None) => Some(node.name.to_string()),
            _ => None,
        }
    }
}

/// Borrowed view over a host or a container
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub name: &'a str,
    pub address: &'a str,
    pub roles: &'a [NodeRole],
    pub overlay_address: Option<&'a str>,
    pub parent: Option<&'a str>,
    pub hardware: Option<&'a HardwareFacts>,
    pub gpu_passthrough: bool,
    pub has_containers: bool,
}

impl NodeView<'_> {
    pub fn is_control_plane(&self) -> bool {
        self.roles.contains(&NodeRole::ControlPlane)
    }

    pub fn is_worker(&self) -> bool {
        self.roles.contains(&NodeRole::Worker)
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu_passthrough || self.hardware.map(|hw| hw.gpu_detected).unwrap_or(false)
    }
}
