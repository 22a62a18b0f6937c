//! Inventory builder shared by the minimal and full variants

use tracing::debug;

use crate::errors::ValidationError;
use crate::inventory::document::{HostVars, InventoryDocument};
use crate::inventory::model::{NetworkMode, NodeView, WizardState};
use crate::inventory::validate::validate;
use crate::inventory::DetailLevel;

/// Build the inventory document for the given detail level.
///
/// Host-list handling and validation are identical for both levels; only
/// variable population differs.
pub fn generate(
    level: DetailLevel,
    state: &WizardState,
) -> Result<InventoryDocument, ValidationError> {
    validate(level, state)?;

    let login_user = state
        .login_user()
        .ok_or_else(|| ValidationError::new("a login username is required"))?;
    let mut document = InventoryDocument::new(login_user);
    let mode = state.network_mode();

    for node in state.nodes() {
        let vars = host_vars(level, &node, mode);
        let groups = &mut document.all.children;
        match node.parent {
            None => groups.baremetal.hosts.insert(node.name.to_string(), vars),
            Some(_) => groups.containers.hosts.insert(node.name.to_string(), vars),
        };

        if level == DetailLevel::Full {
            let roles = &mut groups.microk8s.children;
            if node.is_control_plane() {
                roles.microk8s_control_plane.add(node.name);
            }
            if node.is_worker() {
                roles.microk8s_workers.add(node.name);
            }
            if node.has_gpu() {
                groups.gpu_hosts.add(node.name);
            }
        }
    }

    if level == DetailLevel::Full {
        populate_global_vars(&mut document, state);
    }

    debug!(
        "Generated {} inventory with {} hosts",
        level,
        document.hostnames().len()
    );
    Ok(document)
}

fn host_vars(level: DetailLevel, node: &NodeView<'_>, mode: Option<NetworkMode>) -> HostVars {
    let mut vars = HostVars {
        ansible_host: node.address.trim().to_string(),
        ..Default::default()
    };
    if level == DetailLevel::Minimal {
        return vars;
    }

    vars.lan_ip = Some(node.address.trim().to_string());
    vars.node_roles = node.roles.to_vec();
    vars.node_roles.sort();
    vars.node_roles.dedup();
    vars.parent_host = node.parent.map(str::to_string);

    if mode == Some(NetworkMode::Overlay) {
        if let Some(overlay) = node.overlay_address {
            let overlay = overlay.trim().to_string();
            // Once the overlay is up, the playbooks reach hosts through it
            vars.ansible_host = overlay.clone();
            vars.overlay_ip = Some(overlay);
        }
    }

    if let Some(hw) = node.hardware {
        vars.cpu_cores = Some(hw.cpu_cores);
        vars.memory_gb = Some(hw.memory_gb);
        vars.disk_gb = Some(hw.disk_gb);
        vars.architecture = hw.architecture.clone();
        vars.has_gpu = Some(hw.gpu_detected);
        if hw.gpu_detected {
            vars.gpu_model = hw.gpu_model.clone();
            vars.gpu_count = Some(hw.gpu_count);
        }
    }
    if node.parent.is_some() {
        vars.gpu_passthrough = Some(node.gpu_passthrough);
    }

    vars
}

fn populate_global_vars(document: &mut InventoryDocument, state: &WizardState) {
    let vars = &mut document.all.vars;
    vars.cluster_name = state.cluster_name.clone();
    vars.domain_name = state.domain_name.clone();
    vars.admin_username = state.admin_username.clone();
    vars.network_mode = state.network_mode();

    if let Some(network) = state.network.as_ref() {
        vars.lan_cidr = network.lan_cidr.clone();
        if network.mode == Some(NetworkMode::Overlay) {
            vars.overlay_network_id = network.overlay_network_id.clone();
            vars.overlay_cidr = network.overlay_cidr.clone();
        }
        vars.load_balancer_range = network
            .load_balancer_range
            .as_ref()
            .map(|range| format!("{}-{}", range.start.trim(), range.end.trim()));
        vars.ingress_ips = network.ingress_ips.iter().map(|ip| ip.trim().to_string()).collect();
    }

    vars.credentials = state
        .credential_refs
        .iter()
        .map(|(name, env)| (name.clone(), format!("{{{{ lookup('env', '{env}') }}}}")))
        .collect();
}
