//! Known playbooks

use crate::deploy::job::{Job, Phase};
use crate::inventory::DetailLevel;

#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub phase: Phase,
    pub title: &'static str,
    pub executable: &'static str,
    pub inventory: DetailLevel,
}

impl CatalogEntry {
    pub fn to_job(&self) -> Job {
        Job::new(self.id, self.phase, self.title, self.executable).with_inventory(self.inventory)
    }
}

const fn entry(
    id: &'static str,
    phase: Phase,
    title: &'static str,
    executable: &'static str,
    inventory: DetailLevel,
) -> CatalogEntry {
    CatalogEntry { id, phase, title, executable, inventory }
}

use DetailLevel::{Full, Minimal};
use Phase::*;

pub const CATALOG: &[CatalogEntry] = &[
    // Trust is not established yet, so these run against the minimal inventory
    entry("setup-ssh-keys", Initial, "Setup SSH keys", "ansible/00_initial_setup/10_setup_ssh_keys.yaml", Minimal),
    entry("test-ssh-connectivity", Initial, "Test SSH connectivity", "ansible/00_initial_setup/18_test_ssh_connectivity.yaml", Minimal),
    entry("setup-env", Initial, "Prepare environment", "ansible/00_initial_setup/20_setup_env.yaml", Full),
    entry("lxd-setup", Infrastructure, "Setup LXD cluster", "ansible/10_baremetal_infra/10_setup_lxd_cluster.yaml", Full),
    entry("lxd-containers", Infrastructure, "Create LXD containers", "ansible/10_baremetal_infra/30_create_containers.yaml", Full),
    entry("zerotier-setup", Networking, "Setup ZeroTier overlay", "ansible/30_networking/10_setup_zerotier.yaml", Full),
    entry("dns-setup", Networking, "Setup DNS", "ansible/30_networking/20_setup_dns.yaml", Full),
    entry("microk8s-setup", Kubernetes, "Deploy MicroK8s control plane", "ansible/20_lxd_setup/20_deploy_microk8s.yaml", Full),
    entry("microk8s-join-workers", Kubernetes, "Join MicroK8s workers", "ansible/40_thinkube/core/infrastructure/microk8s/20_join_workers.yaml", Full),
    entry("coredns-setup", Kubernetes, "Configure CoreDNS", "ansible/40_thinkube/core/infrastructure/coredns/10_deploy.yaml", Full),
    entry("gpu-operator", Kubernetes, "Deploy GPU operator", "ansible/40_thinkube/core/infrastructure/gpu_operator/10_deploy.yaml", Full),
    entry("keycloak-deploy", Core, "Deploy Keycloak", "ansible/40_thinkube/core/keycloak/10_deploy.yaml", Full),
    entry("harbor-deploy", Core, "Deploy Harbor", "ansible/40_thinkube/core/harbor/10_deploy.yaml", Full),
    entry("test-microk8s", Test, "Test MicroK8s", "ansible/40_thinkube/core/infrastructure/microk8s/18_test.yaml", Full),
    entry("test-keycloak", Test, "Test Keycloak", "ansible/40_thinkube/core/keycloak/18_test.yaml", Full),
    entry("test-harbor", Test, "Test Harbor", "ansible/40_thinkube/core/harbor/18_test.yaml", Full),
    entry("rollback-lxd", Rollback, "Remove LXD cluster", "ansible/10_baremetal_infra/19_rollback_lxd_cluster.yaml", Full),
    entry("rollback-containers", Rollback, "Destroy LXD containers", "ansible/10_baremetal_infra/39_rollback_containers.yaml", Full),
    entry("rollback-zerotier", Rollback, "Leave ZeroTier network", "ansible/30_networking/19_rollback_zerotier.yaml", Full),
    entry("rollback-dns", Rollback, "Reset DNS", "ansible/30_networking/29_rollback_dns.yaml", Full),
    entry("rollback-microk8s", Rollback, "Remove MicroK8s", "ansible/20_lxd_setup/29_rollback_microk8s.yaml", Full),
    entry("rollback-coredns", Rollback, "Reset CoreDNS", "ansible/40_thinkube/core/infrastructure/coredns/19_rollback.yaml", Full),
    entry("rollback-gpu-operator", Rollback, "Remove GPU operator", "ansible/40_thinkube/core/infrastructure/gpu_operator/19_rollback.yaml", Full),
    entry("rollback-keycloak", Rollback, "Remove Keycloak", "ansible/40_thinkube/core/keycloak/19_rollback.yaml", Full),
    entry("rollback-harbor", Rollback, "Remove Harbor", "ansible/40_thinkube/core/harbor/19_rollback.yaml", Full),
    entry("diagnostic", Diagnostic, "Run diagnostics", "ansible/00_initial_setup/99_diagnostics.yaml", Minimal),
];

/// Short names accepted on the playbook stream
pub const ALIASES: &[&str] = &[
    "setup-ssh-keys",
    "test-ssh-connectivity",
    "microk8s-setup",
    "keycloak-deploy",
    "harbor-deploy",
];

pub const PLAYBOOK_PREFIX: &str = "ansible/";

pub fn find(id: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.id == id)
}

pub fn job(id: &str) -> Option<Job> {
    find(id).map(CatalogEntry::to_job)
}

pub fn find_by_executable(executable: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.executable == executable)
}

/// Resolve a stream address to an executable reference
pub fn resolve_playbook(name: &str) -> Result<String, String> {
    if ALIASES.contains(&name) {
        if let Some(entry) = find(name) {
            return Ok(entry.executable.to_string());
        }
    }
    if name.starts_with(PLAYBOOK_PREFIX) && !name.split('/').any(|part| part == "..") {
        return Ok(name.to_string());
    }
    Err(format!("Unknown playbook: {}", name))
}

/// Job to run for a resolved executable reference
pub fn job_for_executable(executable: &str) -> Job {
    match find_by_executable(executable) {
        Some(entry) => entry.to_job(),
        None => {
            let name = executable
                .rsplit('/')
                .next()
                .unwrap_or(executable)
                .trim_end_matches(".yaml")
                .trim_end_matches(".yml");
            Job::new(name, Phase::Diagnostic, name, executable)
        }
    }
}
