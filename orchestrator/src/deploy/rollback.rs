//! Compensating jobs for rollback

use std::collections::{BTreeMap, BTreeSet};

use crate::deploy::catalog;
use crate::deploy::job::Job;
use crate::deploy::queue::Queue;
use crate::deploy::result::ExecutionResult;

/// Forward job id -> compensating job id
pub const ROLLBACK_MAP: &[(&str, &str)] = &[
    ("lxd-setup", "rollback-lxd"),
    ("lxd-containers", "rollback-containers"),
    ("zerotier-setup", "rollback-zerotier"),
    ("dns-setup", "rollback-dns"),
    ("microk8s-setup", "rollback-microk8s"),
    ("coredns-setup", "rollback-coredns"),
    ("gpu-operator", "rollback-gpu-operator"),
    ("keycloak-deploy", "rollback-keycloak"),
    ("harbor-deploy", "rollback-harbor"),
];

/// Compensating job for a forward job, if it is reversible
pub fn compensating_job(job_id: &str) -> Option<Job> {
    ROLLBACK_MAP
        .iter()
        .find(|(forward, _)| *forward == job_id)
        .and_then(|(_, rollback)| catalog::job(rollback))
}

/// A compensating job and the forward position it undoes
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRollback {
    pub forward_index: usize,
    pub forward_id: String,
    pub job: Job,
}

/// Compensating jobs for every attempted job up to the cursor, last attempted
/// first. Jobs already undone are skipped until they run again.
pub fn rollback_plan(
    queue: &Queue,
    results: &BTreeMap<String, ExecutionResult>,
    rolled_back: &BTreeSet<String>,
) -> Vec<PlannedRollback> {
    let last = queue.cursor().min(queue.len().saturating_sub(1));

    (0..=last)
        .rev()
        .filter_map(|index| {
            let forward = queue.get(index)?;
            // Only jobs that were actually attempted left anything to undo
            results.get(&forward.id)?;
            if rolled_back.contains(&forward.id) {
                return None;
            }
            let job = compensating_job(&forward.id)?;
            Some(PlannedRollback {
                forward_index: index,
                forward_id: forward.id.clone(),
                job,
            })
        })
        .collect()
}
