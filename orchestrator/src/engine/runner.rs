//! Playbook process execution

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::deploy::job::Job;
use crate::deploy::result::{ExecutionResult, ExecutionStatus};
use crate::engine::classify::LineClassifier;
use crate::engine::environment::{ExecutionEnvironment, TOOL_ENV};
use crate::engine::lines::LineBuffer;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::transport::channel::ExecutionChannel;
use crate::transport::message::ExecutionEvent;

const READ_CHUNK: usize = 4096;

/// Everything needed to run one job once
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job: Job,
    pub environment: ExecutionEnvironment,
    /// Inventory document, already serialized
    pub inventory: String,
}

/// Runs a job to completion, streaming its events.
///
/// Implementations publish exactly one terminal event on the channel and
/// never retry on their own.
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) -> ExecutionResult;
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Program executing playbooks
    pub program: String,

    /// Arguments placed before the playbook path
    pub base_args: Vec<String>,

    /// Root relative executable references resolve against; also the working directory
    pub playbook_root: PathBuf,

    /// Scratch space for per-execution inventory and vars files
    pub work_dir: PathBuf,

    pub timeout: Duration,

    /// Wait between the termination signal and a forced kill
    pub kill_grace: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            base_args: vec!["-v".to_string()],
            playbook_root: PathBuf::from("thinkube"),
            work_dir: std::env::temp_dir().join("thinkube-installer-work"),
            timeout: Duration::from_secs(300),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// Why the process was stopped before it exited on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    Timeout,
}

struct ProcessOutcome {
    stopped: Option<StopReason>,
    exit: Option<ExitStatus>,
}

/// Runs playbooks as external processes
pub struct AnsibleRunner {
    options: RunnerOptions,
}

impl AnsibleRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    fn playbook_path(&self, executable: &str) -> PathBuf {
        let path = Path::new(executable);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.options.playbook_root.join(path)
        }
    }

    async fn run_process(
        &self,
        request: &ExecutionRequest,
        files: &ExecutionFiles,
        recorder: &mut Recorder<'_>,
        cancel: CancellationToken,
    ) -> Result<ProcessOutcome, OrchestratorError> {
        let playbook = self.playbook_path(&request.job.executable);

        let mut cmd = Command::new(&self.options.program);
        cmd.args(&self.options.base_args)
            .arg(&playbook)
            .arg("-i")
            .arg(&files.inventory)
            .arg("-e")
            .arg(format!("@{}", files.vars.display()))
            .envs(TOOL_ENV.iter().copied())
            .envs(request.environment.process_env())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.options.playbook_root.is_dir() {
            cmd.current_dir(&self.options.playbook_root);
            let config = self.options.playbook_root.join("ansible.cfg");
            if config.is_file() {
                cmd.env("ANSIBLE_CONFIG", config);
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(unix)]
        let output = combined_output(&mut cmd)?;
        #[cfg(not(unix))]
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!(
            job = %request.job.id,
            program = %self.options.program,
            playbook = %playbook.display(),
            "Spawning playbook process"
        );
        let spawned = cmd.spawn();
        // Drops the parent's copies of the pipe's write end
        drop(cmd);
        let mut child = spawned.map_err(|e| {
            OrchestratorError::ProcessError(format!(
                "failed to start {}: {}",
                self.options.program, e
            ))
        })?;

        #[cfg(unix)]
        let mut output = Some(output);
        #[cfg(not(unix))]
        let mut output = sequential_output(&mut child);

        let environment = &request.environment;
        let mut lines = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        // Read until every writer closed the pipe, or until told to stop
        let mut stopped = loop {
            if output.is_none() {
                break None;
            }
            tokio::select! {
                _ = cancel.cancelled() => break Some(StopReason::Cancelled),
                _ = &mut deadline => break Some(StopReason::Timeout),
                read = read_chunk(&mut output, &mut chunk) => {
                    match read {
                        Ok(n) if n > 0 => {
                            for line in lines.push(&chunk[..n], environment) {
                                recorder.line(&line);
                            }
                        }
                        result => {
                            if let Err(e) = result {
                                warn!(job = %request.job.id, "Failed to read output: {}", e);
                            }
                            output = None;
                        }
                    }
                }
            }
        };

        if let Some(line) = lines.finish(environment) {
            recorder.line(&line);
        }

        let mut exit = None;
        if stopped.is_none() {
            tokio::select! {
                _ = cancel.cancelled() => stopped = Some(StopReason::Cancelled),
                _ = &mut deadline => stopped = Some(StopReason::Timeout),
                status = child.wait() => exit = Some(status?),
            }
        }

        if let Some(reason) = stopped {
            info!(job = %request.job.id, ?reason, "Stopping playbook process");
            exit = terminate(&mut child, self.options.kill_grace).await;
        }

        Ok(ProcessOutcome { stopped, exit })
    }
}

#[async_trait]
impl PlaybookRunner for AnsibleRunner {
    async fn execute(
        &self,
        request: ExecutionRequest,
        channel: Arc<ExecutionChannel>,
    ) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let mut recorder = Recorder::new(channel.clone(), &request.environment, &request.job.id);

        info!(job = %request.job.id, %execution_id, "Executing {}", request.job.executable);
        recorder.publish(ExecutionEvent::start(&request.job.executable));

        let outcome = match ExecutionFiles::write(&self.options.work_dir, execution_id, &request).await {
            Ok(files) => {
                let outcome = self
                    .run_process(&request, &files, &mut recorder, channel.cancel_token())
                    .await;
                files.remove().await;
                outcome
            }
            Err(e) => Err(e),
        };

        let (status, return_code, reason) = match outcome {
            Ok(ProcessOutcome { stopped: Some(StopReason::Cancelled), exit }) => (
                ExecutionStatus::Cancelled,
                exit.and_then(|s| s.code()),
                "Playbook execution cancelled".to_string(),
            ),
            Ok(ProcessOutcome { stopped: Some(StopReason::Timeout), exit }) => (
                ExecutionStatus::Timeout,
                exit.and_then(|s| s.code()),
                format!(
                    "Playbook timed out after {}s",
                    self.options.timeout.as_secs()
                ),
            ),
            Ok(ProcessOutcome { stopped: None, exit }) => {
                let code = exit.and_then(|s| s.code());
                if code == Some(0) {
                    (ExecutionStatus::Success, code, String::new())
                } else {
                    (
                        ExecutionStatus::Failed,
                        code,
                        match code {
                            Some(code) => format!("Playbook execution failed with exit code {}", code),
                            None => "Playbook process was terminated by a signal".to_string(),
                        },
                    )
                }
            }
            Err(e) => {
                error!(job = %request.job.id, "Execution error: {}", e);
                (ExecutionStatus::Failed, None, e.to_string())
            }
        };

        let terminal = if status.is_success() {
            ExecutionEvent::complete(return_code.unwrap_or(0))
        } else {
            ExecutionEvent::error(status, reason.clone(), return_code)
        };
        recorder.publish(terminal);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            job = %request.job.id,
            %execution_id,
            %status,
            duration_ms,
            tasks = recorder.tasks(),
            "Execution finished"
        );

        ExecutionResult {
            execution_id,
            job_id: request.job.id.clone(),
            status,
            log: recorder.into_log(),
            completed_at: Utc::now(),
            return_code,
            duration_ms,
            reason: if status.is_success() { None } else { Some(reason) },
        }
    }
}

/// Process output as one stream
type OutputReader = Pin<Box<dyn AsyncRead + Send>>;

/// Point stdout and stderr at the same pipe so lines keep their write order
#[cfg(unix)]
fn combined_output(cmd: &mut Command) -> Result<OutputReader, OrchestratorError> {
    use std::os::fd::AsRawFd;

    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use nix::unistd::pipe;
    use tokio::net::unix::pipe::Receiver;

    let pipe_error =
        |e: nix::Error| OrchestratorError::ProcessError(format!("failed to create output pipe: {}", e));
    let (read, write) = pipe().map_err(pipe_error)?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(pipe_error)?;
    }

    let write_err = write.try_clone()?;
    cmd.stdout(Stdio::from(write)).stderr(Stdio::from(write_err));
    Ok(Box::pin(Receiver::from_owned_fd(read)?))
}

/// Without shared pipes stderr follows stdout once stdout closes
#[cfg(not(unix))]
fn sequential_output(child: &mut Child) -> Option<OutputReader> {
    let stdout = child.stdout.take()?;
    let stderr = child.stderr.take()?;
    Some(Box::pin(stdout.chain(stderr)))
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

/// Terminate the process group: polite signal, grace period, then kill
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    signal_group(child, Signal::Terminate);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            // Leader is gone; take down anything it left behind
            signal_group(child, Signal::Kill);
            Some(status)
        }
        _ => {
            warn!("Process ignored termination, killing it");
            signal_group(child, Signal::Kill);
            if let Err(e) = child.kill().await {
                debug!("Kill after grace period: {}", e);
            }
            child.wait().await.ok()
        }
    }
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    // ESRCH just means the group is already gone
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        trace!("killpg({}, {:?}): {}", pid, signal, e);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.start_kill();
}

/// Inventory and vars files of one execution
struct ExecutionFiles {
    dir: Dir,
    inventory: PathBuf,
    vars: PathBuf,
}

impl ExecutionFiles {
    async fn write(
        work_dir: &Path,
        execution_id: Uuid,
        request: &ExecutionRequest,
    ) -> Result<Self, OrchestratorError> {
        let dir = Dir::new(work_dir.join(execution_id.to_string()));
        dir.create().await?;

        let inventory = dir.file("inventory.yaml");
        let mut inventory_text = request.inventory.clone();
        if !inventory_text.ends_with('\n') {
            inventory_text.push('\n');
        }
        inventory.write_private(&inventory_text).await?;

        let vars = dir.file("vars.yml");
        vars.write_private(&serde_yaml::to_string(&request.job.params)?).await?;

        Ok(Self {
            inventory: inventory.path().to_path_buf(),
            vars: vars.path().to_path_buf(),
            dir,
        })
    }

    async fn remove(&self) {
        if let Err(e) = self.dir.delete().await {
            warn!("Failed to remove {}: {}", self.dir.path().display(), e);
        }
    }
}

/// Turns output lines into events and keeps the scrubbed log
struct Recorder<'a> {
    channel: Arc<ExecutionChannel>,
    environment: &'a ExecutionEnvironment,
    job_id: &'a str,
    classifier: LineClassifier,
    log: String,
}

impl<'a> Recorder<'a> {
    fn new(
        channel: Arc<ExecutionChannel>,
        environment: &'a ExecutionEnvironment,
        job_id: &'a str,
    ) -> Self {
        Self {
            channel,
            environment,
            job_id,
            classifier: LineClassifier::new(),
            log: String::new(),
        }
    }

    /// Lines arrive scrubbed from the line buffer
    fn line(&mut self, line: &str) {
        trace!(job = %self.job_id, "{}", line);
        let event = self.classifier.event(line);
        self.publish(event);
    }

    fn tasks(&self) -> u32 {
        self.classifier.task_count()
    }

    fn publish(&mut self, mut event: ExecutionEvent) {
        event.message = self.environment.scrub(&event.message);
        self.log.push_str(&event.message);
        self.log.push('\n');
        self.channel.publish(event);
    }

    fn into_log(self) -> String {
        self.log
    }
}
