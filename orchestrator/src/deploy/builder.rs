//! Deployment queue construction
//!
//! `build_queue` is a pure function of the plan and the feature flags.

use serde::{Deserialize, Serialize};

use openapi_server::models::FeatureSelection;

use crate::deploy::catalog;
use crate::deploy::job::Job;
use crate::errors::ValidationError;
use crate::inventory::model::{NetworkMode, WizardState};

/// Optional steps of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Trust is already established; skip key distribution
    #[serde(default)]
    pub skip_ssh_setup: bool,

    #[serde(default = "default_true")]
    pub deploy_keycloak: bool,

    #[serde(default = "default_true")]
    pub deploy_harbor: bool,

    #[serde(default = "default_true")]
    pub gpu_operator: bool,

    #[serde(default)]
    pub run_tests: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            skip_ssh_setup: false,
            deploy_keycloak: true,
            deploy_harbor: true,
            gpu_operator: true,
            run_tests: false,
        }
    }
}

impl FeatureFlags {
    /// Apply request overrides on top of these flags
    pub fn with_selection(mut self, selection: &FeatureSelection) -> Self {
        if let Some(v) = selection.skip_ssh_setup {
            self.skip_ssh_setup = v;
        }
        if let Some(v) = selection.deploy_keycloak {
            self.deploy_keycloak = v;
        }
        if let Some(v) = selection.deploy_harbor {
            self.deploy_harbor = v;
        }
        if let Some(v) = selection.gpu_operator {
            self.gpu_operator = v;
        }
        if let Some(v) = selection.run_tests {
            self.run_tests = v;
        }
        self
    }
}

/// Cluster facts that decide which jobs a deployment needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePlan {
    pub control_plane: String,
    pub network_mode: NetworkMode,
    /// Any container hosts a cluster node
    pub containerized: bool,
    /// Nodes other than the control plane carry the worker role
    pub has_workers: bool,
    pub has_gpu: bool,
}

impl QueuePlan {
    pub fn from_wizard(state: &WizardState) -> Result<Self, ValidationError> {
        let mut errors = ValidationError::default();
        let control_plane = state.control_plane();
        if control_plane.is_none() {
            errors.push("exactly one host must carry the control-plane role");
        }
        let network_mode = state.network_mode();
        if network_mode.is_none() {
            errors.push("a network mode (lan or overlay) must be selected");
        }
        let (Some(control_plane), Some(network_mode)) = (control_plane, network_mode) else {
            return Err(errors);
        };

        let nodes = state.nodes();
        Ok(Self {
            has_workers: nodes
                .iter()
                .any(|n| n.is_worker() && n.name != control_plane),
            containerized: state.hosts.iter().any(|h| !h.containers.is_empty()),
            has_gpu: nodes.iter().any(|n| n.has_gpu()),
            control_plane,
            network_mode,
        })
    }
}

/// Ordered job list for a deployment
pub fn build_queue(plan: &QueuePlan, flags: &FeatureFlags) -> Vec<Job> {
    let mut ids: Vec<&str> = Vec::new();

    if !flags.skip_ssh_setup {
        ids.push("setup-ssh-keys");
    }
    ids.push("test-ssh-connectivity");
    ids.push("setup-env");

    if plan.containerized {
        ids.extend(["lxd-setup", "lxd-containers"]);
    }

    if plan.network_mode == NetworkMode::Overlay {
        ids.push("zerotier-setup");
    }
    ids.push("dns-setup");

    ids.push("microk8s-setup");
    if plan.has_workers {
        ids.push("microk8s-join-workers");
    }
    ids.push("coredns-setup");
    if plan.has_gpu && flags.gpu_operator {
        ids.push("gpu-operator");
    }

    if flags.deploy_keycloak {
        ids.push("keycloak-deploy");
    }
    if flags.deploy_harbor {
        ids.push("harbor-deploy");
    }

    if flags.run_tests {
        ids.push("test-microk8s");
        if flags.deploy_keycloak {
            ids.push("test-keycloak");
        }
        if flags.deploy_harbor {
            ids.push("test-harbor");
        }
    }

    ids.into_iter()
        .filter_map(catalog::job)
        .map(|job| parameterize(job, plan))
        .collect()
}

fn parameterize(job: Job, plan: &QueuePlan) -> Job {
    match job.id.as_str() {
        "microk8s-setup" | "microk8s-join-workers" => {
            job.with_param("control_plane_host", plan.control_plane.clone())
        }
        _ => job,
    }
}
