//! Playbook runner tests against shell scripts standing in for the playbook tool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use orchestrator::deploy::job::{Job, Phase};
use orchestrator::deploy::result::ExecutionStatus;
use orchestrator::engine::{
    AnsibleRunner, ExecutionEnvironment, ExecutionRequest, PlaybookRunner, RunnerOptions,
};
use orchestrator::transport::channel::ExecutionChannel;
use orchestrator::transport::message::EventKind;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    runner: AnsibleRunner,
}

impl Fixture {
    fn new(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runner = AnsibleRunner::new(RunnerOptions {
            program: "/bin/sh".to_string(),
            base_args: Vec::new(),
            playbook_root: dir.path().to_path_buf(),
            work_dir: dir.path().join("work"),
            timeout,
            kill_grace: Duration::from_millis(500),
        });
        Self { dir, runner }
    }

    /// Write a script; it is invoked as `sh <script> -i <inventory> -e @<vars>`
    fn script(&self, name: &str, body: &str) -> String {
        std::fs::write(self.dir.path().join(name), body).unwrap();
        name.to_string()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn request(&self, executable: &str, environment: ExecutionEnvironment) -> ExecutionRequest {
        ExecutionRequest {
            job: Job::new("test-job", Phase::Initial, "Test job", executable)
                .with_param("greeting", "hello"),
            environment,
            inventory: "all:\n  hosts: {}".to_string(),
        }
    }
}

fn work_dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn test_successful_run_streams_classified_events() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let script = fixture.script(
        "success.sh",
        "echo 'PLAY [Setup environment] ****'\n\
         echo 'TASK [Install packages] ****'\n\
         echo 'ok: [node1]'\n\
         echo 'some raw output'\n\
         exit 0\n",
    );
    let channel = ExecutionChannel::new(script.clone());

    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel.clone())
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.return_code, Some(0));
    assert!(result.reason.is_none());
    assert!(result.log.contains("TASK [Install packages]"));

    let kinds: Vec<EventKind> = channel.events().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Start));
    assert_eq!(kinds.last(), Some(&EventKind::Complete));
    assert!(kinds.contains(&EventKind::Play));
    assert!(kinds.contains(&EventKind::Task));
    assert!(kinds.contains(&EventKind::Ok));
    assert!(kinds.contains(&EventKind::Output));
    assert!(channel.is_closed());

    // Per-execution files are removed afterwards
    assert!(work_dir_is_empty(&fixture.path("work")));
}

#[tokio::test]
async fn test_non_zero_exit_is_a_failure() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let script = fixture.script("fail.sh", "echo 'fatal: [node1]: FAILED!'\nexit 3\n");
    let channel = ExecutionChannel::new(script.clone());

    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel.clone())
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.return_code, Some(3));
    assert!(result.reason.as_deref().unwrap().contains("exit code 3"));

    let terminal = channel.terminal_event().unwrap();
    assert_eq!(terminal.kind, EventKind::Error);
    assert_eq!(terminal.status, Some(ExecutionStatus::Failed));
    assert_eq!(terminal.return_code, Some(3));
}

#[tokio::test]
async fn test_inventory_and_params_reach_the_process() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let script = fixture.script("files.sh", "cat \"$2\"\ncat \"${4#@}\"\n");
    let channel = ExecutionChannel::new(script.clone());

    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel)
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.log.contains("hosts: {}"));
    assert!(result.log.contains("greeting: hello"));
}

#[tokio::test]
async fn test_missing_program_fails_without_return_code() {
    let dir = tempfile::tempdir().unwrap();
    let runner = AnsibleRunner::new(RunnerOptions {
        program: dir.path().join("no-such-program").display().to_string(),
        base_args: Vec::new(),
        playbook_root: dir.path().to_path_buf(),
        work_dir: dir.path().join("work"),
        timeout: Duration::from_secs(5),
        kill_grace: Duration::from_millis(100),
    });
    let channel = ExecutionChannel::new("playbook.yaml");
    let request = ExecutionRequest {
        job: Job::new("missing", Phase::Initial, "Missing", "playbook.yaml"),
        environment: ExecutionEnvironment::new(),
        inventory: String::new(),
    };

    let result = runner.execute(request, channel.clone()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.return_code, None);
    assert!(result.reason.as_deref().unwrap().contains("failed to start"));
    assert_eq!(channel.terminal_event().unwrap().kind, EventKind::Error);
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_the_process() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let fixture = Fixture::new(Duration::from_millis(500));
    let pid_file = fixture.path("sleep.pid");
    let script = fixture.script(
        "hang.sh",
        &format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display()),
    );
    let channel = ExecutionChannel::new(script.clone());

    let started = Instant::now();
    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel.clone())
        .await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.reason.as_deref().unwrap().contains("timed out"));
    assert_eq!(channel.terminal_event().unwrap().status, Some(ExecutionStatus::Timeout));

    // The process no longer exists
    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(kill(Pid::from_raw(pid), None).is_err());
}

/// Whether `pid` names a live process; zombies awaiting their reaper count as gone
#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map_or(true, |state| state != "Z"),
        Err(_) => true,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_background_descendants() {
    let fixture = Fixture::new(Duration::from_millis(500));
    let pid_file = fixture.path("grandchild.pid");
    let script = fixture.script(
        "spawner.sh",
        &format!(
            "sleep 60 &\necho $! > '{}'\necho 'TASK [Wait for helper] ****'\nwait\n",
            pid_file.display()
        ),
    );
    let channel = ExecutionChannel::new(script.clone());

    let started = Instant::now();
    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel)
        .await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(pid) {
        assert!(Instant::now() < deadline, "background process {pid} survived the timeout");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_cancel_stops_a_running_playbook() {
    let fixture = Arc::new(Fixture::new(Duration::from_secs(60)));
    let script = fixture.script("long.sh", "echo 'TASK [Wait forever] ****'\nexec sleep 30\n");
    let channel = ExecutionChannel::new(script.clone());

    let task = {
        let fixture = fixture.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            fixture
                .runner
                .execute(fixture.request(&script, ExecutionEnvironment::new()), channel)
                .await
        })
    };

    // Wait for the process to produce output
    let deadline = Instant::now() + Duration::from_secs(10);
    while !channel.events().iter().any(|e| e.kind == EventKind::Task) {
        assert!(Instant::now() < deadline, "playbook never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let started = Instant::now();
    channel.cancel();
    channel.cancel();
    let result = task.await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(channel.terminal_event().unwrap().status, Some(ExecutionStatus::Cancelled));

    // Cancelling a finished execution changes nothing
    channel.cancel();
    assert_eq!(channel.events().iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_stdout_and_stderr_keep_their_order() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let script = fixture.script(
        "interleaved.sh",
        "echo first\necho second >&2\necho third\necho fourth >&2\n",
    );
    let channel = ExecutionChannel::new(script.clone());

    let result = fixture
        .runner
        .execute(fixture.request(&script, ExecutionEnvironment::new()), channel.clone())
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    let output: Vec<String> = channel
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::Output)
        .map(|e| e.message)
        .collect();
    assert_eq!(output, vec!["first", "second", "third", "fourth"]);
}

#[tokio::test]
async fn test_secrets_are_passed_but_never_recorded() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let script = fixture.script(
        "secret.sh",
        "echo \"become=$ANSIBLE_BECOME_PASSWORD\"\necho \"ssh=$ANSIBLE_SSH_PASSWORD\" >&2\necho \"extra=$THINKUBE_EXTRA\"\n",
    );
    let channel = ExecutionChannel::new(script.clone());
    let environment = ExecutionEnvironment::new()
        .with_become_password("hunter2-become")
        .with_ssh_password("hunter2-ssh")
        .with_var("THINKUBE_EXTRA", "visible");

    let result = fixture
        .runner
        .execute(fixture.request(&script, environment), channel.clone())
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.log.contains("become=********"));
    assert!(result.log.contains("ssh=********"));
    assert!(!result.log.contains("hunter2"));
    assert!(result.log.contains("extra=visible"));
    for event in channel.events() {
        assert!(!event.message.contains("hunter2"));
    }
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let fixture = Fixture::new(Duration::from_secs(10));
    let ok = fixture.script("ok.sh", "echo first\n");
    let bad = fixture.script("bad.sh", "echo second\nexit 1\n");
    let ok_channel = ExecutionChannel::new(ok.clone());
    let bad_channel = ExecutionChannel::new(bad.clone());

    let (ok_result, bad_result) = tokio::join!(
        fixture
            .runner
            .execute(fixture.request(&ok, ExecutionEnvironment::new()), ok_channel.clone()),
        fixture
            .runner
            .execute(fixture.request(&bad, ExecutionEnvironment::new()), bad_channel.clone()),
    );

    assert_eq!(ok_result.status, ExecutionStatus::Success);
    assert_eq!(bad_result.status, ExecutionStatus::Failed);
    assert_ne!(ok_result.execution_id, bad_result.execution_id);
    assert!(ok_result.log.contains("first") && !ok_result.log.contains("second"));
    assert!(bad_result.log.contains("second") && !bad_result.log.contains("first"));
}
