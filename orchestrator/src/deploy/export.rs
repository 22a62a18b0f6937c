//! Plain-text log bundle of a deployment

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::deploy::job::Job;
use crate::deploy::result::ExecutionResult;
use crate::deploy::state::DeploymentState;

/// Render every job of the deployment, in queue order, followed by the
/// rollback and auxiliary runs. Logs are stored scrubbed, so nothing here
/// can carry a secret.
pub fn render(state: &DeploymentState, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Deployment log export");
    if !state.deployment_id.is_empty() {
        let _ = writeln!(out, "Deployment: {}", state.deployment_id);
    }
    let _ = writeln!(out, "Status: {}", state.status());
    if let Some(error) = state.fsm.error() {
        let _ = writeln!(out, "Error: {}", error);
    }
    let _ = writeln!(out, "Progress: {}/{}", state.queue.cursor(), state.queue.len());
    if let Some(started) = state.started_at {
        let _ = writeln!(out, "Started: {}", started.to_rfc3339());
    }
    let _ = writeln!(out, "Generated: {}", generated_at.to_rfc3339());

    let total = state.queue.len();
    for (index, job) in state.queue.jobs().iter().enumerate() {
        let mut header = format!("[{}/{}] {}", index + 1, total, job.id);
        if state.is_rolled_back(&job.id) {
            header.push_str(" (rolled back)");
        }
        section(&mut out, &header, job, state.results.get(&job.id));
    }

    if let Some(rollback) = &state.rollback {
        let _ = writeln!(out, "\n######## Rollback ########");
        for job in rollback.queue.jobs() {
            section(&mut out, &job.id, job, rollback.results.get(&job.id));
        }
    }

    if !state.auxiliary.is_empty() {
        let _ = writeln!(out, "\n######## Auxiliary runs ########");
        for run in &state.auxiliary {
            section(&mut out, &job_label(&run.job), &run.job, run.result.as_ref());
        }
    }

    out
}

fn job_label(job: &Job) -> String {
    format!("{} ({})", job.id, job.executable)
}

fn section(out: &mut String, header: &str, job: &Job, result: Option<&ExecutionResult>) {
    let _ = writeln!(out, "\n==== {}: {} ====", header, job.title);
    match result {
        Some(result) => {
            let _ = writeln!(out, "Status: {}", result.status);
            let _ = writeln!(out, "Completed: {}", result.completed_at.to_rfc3339());
            if let Some(code) = result.return_code {
                let _ = writeln!(out, "Return code: {}", code);
            }
            if let Some(reason) = &result.reason {
                let _ = writeln!(out, "Reason: {}", reason);
            }
            if !result.log.is_empty() {
                out.push('\n');
                out.push_str(&result.log);
                if !result.log.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        None => {
            let _ = writeln!(out, "Status: not run");
        }
    }
}
