//! Inventory document consumed by the playbooks
//!
//! The shape is fixed: a global `vars` block plus nested host groups. The
//! minimal and full variants share every group; they differ only in which
//! variables are populated. All maps are ordered so serialization is
//! byte-stable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::inventory::model::{NetworkMode, NodeRole};

pub const HEADER: &str = "# Generated by the installer. Do not edit.\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDocument {
    pub all: InventoryRoot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRoot {
    pub vars: GlobalVars,
    pub children: HostGroups,
}

/// Keys of [`GlobalVars`] that credential references must not shadow
pub const RESERVED_VARS: &[&str] = &[
    "ansible_user",
    "cluster_name",
    "domain_name",
    "admin_username",
    "network_mode",
    "lan_cidr",
    "overlay_network_id",
    "overlay_cidr",
    "load_balancer_range",
    "ingress_ips",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalVars {
    pub ansible_user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<NetworkMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lan_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_network_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_range: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress_ips: Vec<String>,

    /// Credentials are referenced through environment lookups, never inlined
    #[serde(flatten)]
    pub credentials: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostGroups {
    pub baremetal: HostGroup,
    pub containers: HostGroup,
    pub microk8s: ClusterGroup,
    pub gpu_hosts: MemberGroup,
}

/// Group that defines hosts and their variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostGroup {
    pub hosts: BTreeMap<String, HostVars>,
}

/// Group that only references hosts defined elsewhere
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberGroup {
    pub hosts: BTreeMap<String, Member>,
}

impl MemberGroup {
    pub fn add(&mut self, name: &str) {
        self.hosts.insert(name.to_string(), Member {});
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub children: RoleGroups,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGroups {
    pub microk8s_control_plane: MemberGroup,
    pub microk8s_workers: MemberGroup,
}

/// Host-level variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostVars {
    pub ansible_host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lan_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_roles: Vec<NodeRole>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_gpu: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_passthrough: Option<bool>,
}

impl InventoryDocument {
    /// Empty document for the given login user
    pub fn new(ansible_user: &str) -> Self {
        Self {
            all: InventoryRoot {
                vars: GlobalVars {
                    ansible_user: ansible_user.to_string(),
                    ..Default::default()
                },
                children: HostGroups::default(),
            },
        }
    }

    /// Render the document as YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{HEADER}{body}"))
    }

    /// Every addressable host, physical and containerized
    pub fn hostnames(&self) -> BTreeSet<String> {
        let groups = &self.all.children;
        groups
            .baremetal
            .hosts
            .keys()
            .chain(groups.containers.hosts.keys())
            .cloned()
            .collect()
    }

    pub fn host(&self, name: &str) -> Option<&HostVars> {
        let groups = &self.all.children;
        groups
            .baremetal
            .hosts
            .get(name)
            .or_else(|| groups.containers.hosts.get(name))
    }

    pub fn control_plane_hosts(&self) -> Vec<&str> {
        self.all
            .children
            .microk8s
            .children
            .microk8s_control_plane
            .hosts
            .keys()
            .map(String::as_str)
            .collect()
    }
}
