//! Wizard state validation shared by every detail level

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::errors::ValidationError;
use crate::inventory::document::RESERVED_VARS;
use crate::inventory::model::{NetworkMode, NetworkSettings, NodeView, WizardState};
use crate::inventory::DetailLevel;

/// Parse a strict dotted-quad IPv4 address
pub fn parse_ipv4(value: &str) -> Option<Ipv4Addr> {
    let value = value.trim();
    if value.split('.').count() != 4 {
        return None;
    }
    value.parse::<Ipv4Addr>().ok()
}

fn parse_cidr(value: &str) -> Option<Ipv4Net> {
    value.trim().parse::<Ipv4Net>().ok()
}

/// Validate the wizard state for the requested detail level.
///
/// Every problem found is collected; the caller gets them all at once.
pub fn validate(level: DetailLevel, state: &WizardState) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let nodes = state.nodes();

    if state.hosts.is_empty() {
        errors.push("at least one host is required");
    }
    if state.login_user().is_none() {
        errors.push("a login username is required");
    }

    check_names(&nodes, &mut errors);
    check_lan_addresses(&nodes, &mut errors);

    if level == DetailLevel::Full && !state.hosts.is_empty() {
        check_roles(&nodes, &mut errors);
        match state.network_mode() {
            None => errors.push("a network mode (lan or overlay) must be selected"),
            Some(NetworkMode::Lan) => {}
            Some(NetworkMode::Overlay) => check_overlay(&nodes, state.network.as_ref(), &mut errors),
        }
        if let Some(network) = state.network.as_ref() {
            check_network(network, &nodes, &mut errors);
            check_ingress_addresses(network, &nodes, &mut errors);
        }
        check_credential_refs(state, &mut errors);
    }

    errors.into_result()
}

fn check_names(nodes: &[NodeView<'_>], errors: &mut ValidationError) {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for node in nodes {
        if node.name.trim().is_empty() {
            errors.push(format!("host with address '{}' has no hostname", node.address));
            continue;
        }
        *seen.entry(node.name).or_default() += 1;
    }
    for (name, count) in seen {
        if count > 1 {
            errors.push(format!("hostname '{name}' is used {count} times"));
        }
    }
}

fn check_lan_addresses(nodes: &[NodeView<'_>], errors: &mut ValidationError) {
    let mut by_address: BTreeMap<Ipv4Addr, Vec<String>> = BTreeMap::new();
    for node in nodes {
        match parse_ipv4(node.address) {
            Some(ip) => by_address.entry(ip).or_default().push(node.name.to_string()),
            None => errors.push(format!(
                "host '{}': '{}' is not a valid IPv4 address",
                node.name, node.address
            )),
        }
    }
    report_duplicates("address", &by_address, errors);
}

fn check_roles(nodes: &[NodeView<'_>], errors: &mut ValidationError) {
    for node in nodes {
        // A server that only carries containers does not join the cluster itself
        if node.roles.is_empty() && !node.has_containers {
            errors.push(format!("host '{}' has no role assigned", node.name));
        }
    }

    let control_planes: Vec<&str> = nodes
        .iter()
        .filter(|n| n.is_control_plane())
        .map(|n| n.name)
        .collect();
    match control_planes.len() {
        0 => errors.push("exactly one host must carry the control-plane role, found none"),
        1 => {}
        n => errors.push(format!(
            "exactly one host must carry the control-plane role, found {n}: {}",
            control_planes.join(", ")
        )),
    }

    if !nodes.iter().any(|n| n.is_worker()) && !control_planes.is_empty() {
        errors.push("at least one worker is required, or the control-plane host must also be a worker");
    }
}

fn check_overlay(
    nodes: &[NodeView<'_>],
    network: Option<&NetworkSettings>,
    errors: &mut ValidationError,
) {
    let overlay_net = network
        .and_then(|n| n.overlay_cidr.as_deref())
        .and_then(parse_cidr);

    let mut by_address: BTreeMap<Ipv4Addr, Vec<String>> = BTreeMap::new();
    for node in nodes.iter().filter(|n| !n.roles.is_empty()) {
        let Some(raw) = node.overlay_address else {
            errors.push(format!("host '{}' has no overlay address", node.name));
            continue;
        };
        let Some(ip) = parse_ipv4(raw) else {
            errors.push(format!(
                "host '{}': overlay address '{raw}' is not a valid IPv4 address",
                node.name
            ));
            continue;
        };
        if let Some(net) = overlay_net {
            if !net.contains(&ip) {
                errors.push(format!(
                    "host '{}': overlay address {ip} is outside the overlay network {net}",
                    node.name
                ));
            }
        }
        by_address.entry(ip).or_default().push(node.name.to_string());
    }
    report_duplicates("overlay address", &by_address, errors);

    // Overlay addresses must not collide with another host's LAN address either
    for node in nodes {
        let Some(lan) = parse_ipv4(node.address) else {
            continue;
        };
        if let Some(owners) = by_address.get(&lan) {
            let others: Vec<String> = owners.iter().filter(|o| *o != node.name).cloned().collect();
            if !others.is_empty() {
                let mut involved = others.clone();
                involved.push(node.name.to_string());
                errors.push(format!(
                    "address {lan} is both the LAN address of '{}' and the overlay address of {}",
                    node.name,
                    others.join(", ")
                ));
                errors.add_conflict(&involved);
            }
        }
    }
}

fn check_network(network: &NetworkSettings, nodes: &[NodeView<'_>], errors: &mut ValidationError) {
    if let Some(cidr) = network.lan_cidr.as_deref() {
        match parse_cidr(cidr) {
            Some(net) => {
                for node in nodes {
                    if let Some(ip) = parse_ipv4(node.address) {
                        if !net.contains(&ip) {
                            errors.push(format!(
                                "host '{}': address {ip} is outside the LAN network {net}",
                                node.name
                            ));
                        }
                    }
                }
            }
            None => errors.push(format!("LAN network '{cidr}' is not a valid IPv4 CIDR")),
        }
    }

    if let Some(cidr) = network.overlay_cidr.as_deref() {
        if parse_cidr(cidr).is_none() {
            errors.push(format!("overlay network '{cidr}' is not a valid IPv4 CIDR"));
        }
    }

    let range = match network.load_balancer_range.as_ref() {
        Some(range) => range,
        None => {
            if !network.ingress_ips.is_empty() {
                errors.push("ingress addresses require a load balancer range");
            }
            return;
        }
    };

    let start = parse_ipv4(&range.start);
    let end = parse_ipv4(&range.end);
    if start.is_none() {
        errors.push(format!("load balancer range start '{}' is not a valid IPv4 address", range.start));
    }
    if end.is_none() {
        errors.push(format!("load balancer range end '{}' is not a valid IPv4 address", range.end));
    }
    let (Some(start), Some(end)) = (start, end) else {
        return;
    };
    if start > end {
        errors.push(format!("load balancer range start {start} is after its end {end}"));
        return;
    }

    for ip in network.ingress_ips.iter().filter_map(|raw| parse_ipv4(raw)) {
        if ip < start || ip > end {
            errors.push(format!(
                "ingress address {ip} is outside the load balancer range {start}-{end}"
            ));
        }
    }
}

/// Ingress addresses are unique and never double as a host address
fn check_ingress_addresses(
    network: &NetworkSettings,
    nodes: &[NodeView<'_>],
    errors: &mut ValidationError,
) {
    let overlay = network.mode == Some(NetworkMode::Overlay);
    let mut hosts: BTreeMap<Ipv4Addr, Vec<String>> = BTreeMap::new();
    for node in nodes {
        let overlay_address = node.overlay_address.filter(|_| overlay);
        for ip in [Some(node.address), overlay_address]
            .into_iter()
            .flatten()
            .filter_map(parse_ipv4)
        {
            hosts.entry(ip).or_default().push(node.name.to_string());
        }
    }

    let mut seen: BTreeMap<Ipv4Addr, usize> = BTreeMap::new();
    for raw in &network.ingress_ips {
        let Some(ip) = parse_ipv4(raw) else {
            errors.push(format!("ingress address '{raw}' is not a valid IPv4 address"));
            continue;
        };
        *seen.entry(ip).or_default() += 1;
    }

    for (ip, count) in seen {
        if count > 1 {
            errors.push(format!("ingress address {ip} is listed {count} times"));
        }
        if let Some(owners) = hosts.get(&ip) {
            errors.push(format!(
                "ingress address {ip} is already used by {}",
                owners.join(", ")
            ));
            errors.add_conflict(owners);
        }
    }
}

/// Credential references become inventory variables and environment lookups
fn check_credential_refs(state: &WizardState, errors: &mut ValidationError) {
    for (name, env) in &state.credential_refs {
        if RESERVED_VARS.contains(&name.as_str()) {
            errors.push(format!(
                "credential '{name}' would replace the inventory variable of the same name"
            ));
        } else if !is_identifier(name) {
            errors.push(format!("credential name '{name}' is not a valid variable name"));
        }
        if !is_identifier(env) {
            errors.push(format!(
                "credential '{name}': '{env}' is not a valid environment variable name"
            ));
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn report_duplicates(
    label: &str,
    by_address: &BTreeMap<Ipv4Addr, Vec<String>>,
    errors: &mut ValidationError,
) {
    for (ip, owners) in by_address {
        if owners.len() > 1 {
            errors.push(format!("{label} {ip} is shared by {}", owners.join(", ")));
            errors.add_conflict(owners);
        }
    }
}
