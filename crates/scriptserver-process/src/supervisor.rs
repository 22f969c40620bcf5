//! Process supervisor
//!
//! One task per run owns the [`Child`]. It forwards console lines from both
//! output pipes, writes queued input to stdin, and performs the stop
//! sequence. Exactly one [`ProcessEvent::Stopped`] is emitted per run,
//! whether the process was stopped or exited on its own.

use crate::lines::LineSplitter;
use scriptserver_core::{JavaConfig, Result, ScriptServerError};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

const READ_CHUNK_LEN: usize = 8192;

/// How long to keep forwarding buffered output after the process exits
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What to run and how to wire its stdio
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Echo the process's stdout and stderr to ours
    pub pipe_stdout: bool,
    /// Forward our stdin lines to the process
    pub pipe_stdin: bool,
    /// Written to stdin on stop; `None` kills immediately
    pub stop_command: Option<String>,
    /// Grace period after `stop_command` before the process is killed
    pub stop_timeout: Duration,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            pipe_stdout: false,
            pipe_stdin: false,
            stop_command: None,
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// `java <jvm-args> -jar <jar> nogui` in the configured server directory
    pub fn java(config: &JavaConfig) -> Self {
        Self {
            program: config.executable.clone(),
            args: config.command_args(),
            working_dir: Some(config.path.clone()),
            pipe_stdout: config.pipe_stdout,
            pipe_stdin: config.pipe_stdin,
            stop_command: config.graceful_stop_command().map(str::to_string),
            stop_timeout: config.stop_timeout(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stop_command(mut self, command: impl Into<String>, timeout: Duration) -> Self {
        self.stop_command = Some(command.into());
        self.stop_timeout = timeout;
        self
    }
}

/// Output of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of stdout or stderr
    Console(String),
    /// The process is gone; `code` is `None` when it was killed by a signal
    Stopped { code: Option<i32> },
}

struct RunningProcess {
    pid: Option<u32>,
    /// Cleared just before `Stopped` is emitted
    alive: Arc<AtomicBool>,
    stdin: mpsc::UnboundedSender<String>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Owns at most one child process at a time
pub struct ProcessSupervisor {
    events: broadcast::Sender<ProcessEvent>,
    running: Mutex<Option<RunningProcess>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            events,
            running: Mutex::new(None),
        }
    }

    /// Subscribe to console lines and exit notifications. Subscribe before
    /// [`ProcessSupervisor::start`] to see the first lines.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Spawn the process. Fails with [`ScriptServerError::AlreadyRunning`]
    /// while a previous run is still alive.
    pub async fn start(&self, spec: LaunchSpec) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(RunningProcess::is_alive) {
            return Err(ScriptServerError::AlreadyRunning);
        }
        if let Some(previous) = running.take() {
            release_stdin(&previous.stdin);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ScriptServerError::Process(format!("Failed to spawn {}: {}", spec.program, e))
        })?;
        let pid = child.id();
        info!("Started {} (pid {:?})", spec.program, pid);

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let child_stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let readers = vec![
            tokio::spawn(read_lines(
                stdout,
                line_tx.clone(),
                spec.pipe_stdout.then(tokio::io::stdout),
            )),
            tokio::spawn(read_lines(
                stderr,
                line_tx,
                spec.pipe_stdout.then(tokio::io::stderr),
            )),
        ];

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if spec.pipe_stdin {
            forward_stdin(stdin_tx.clone());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(
            ProcessTask {
                child,
                stdin: Some(child_stdin),
                stop_command: spec.stop_command,
                stop_timeout: spec.stop_timeout,
                events: self.events.clone(),
                alive: alive.clone(),
            }
            .run(line_rx, stdin_rx, stop_rx, readers),
        );

        *running = Some(RunningProcess {
            pid,
            alive,
            stdin: stdin_tx,
            stop: Some(stop_tx),
            task,
        });
        Ok(())
    }

    /// Stop the process and wait for it to exit. No console events are
    /// emitted after this returns. Calling it with nothing running is a
    /// no-op.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            debug!("Stop requested with no process running");
            return;
        };

        release_stdin(&running.stdin);
        if let Some(stop) = running.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = running.task.await {
            error!("Process task failed: {}", e);
        }
    }

    /// Write `text` to the process's stdin, appending a newline if missing
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        let running = self.running.lock().await;
        let running = running
            .as_ref()
            .filter(|r| r.is_alive())
            .ok_or(ScriptServerError::NotRunning)?;

        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        running
            .stdin
            .send(line)
            .map_err(|_| ScriptServerError::NotRunning)
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(RunningProcess::is_alive)
    }

    /// OS process id of the current run
    pub async fn pid(&self) -> Option<u32> {
        self.running
            .lock()
            .await
            .as_ref()
            .filter(|r| r.is_alive())
            .and_then(|r| r.pid)
    }
}

impl RunningProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.task.is_finished()
    }
}

fn missing_pipe(name: &str) -> ScriptServerError {
    ScriptServerError::Process(format!("Child {} was not captured", name))
}

struct ProcessTask {
    child: Child,
    stdin: Option<ChildStdin>,
    stop_command: Option<String>,
    stop_timeout: Duration,
    events: broadcast::Sender<ProcessEvent>,
    alive: Arc<AtomicBool>,
}

impl ProcessTask {
    async fn run(
        mut self,
        mut lines: mpsc::UnboundedReceiver<String>,
        mut input: mpsc::UnboundedReceiver<String>,
        mut stop: oneshot::Receiver<()>,
        readers: Vec<JoinHandle<()>>,
    ) {
        let mut stop_requested = false;
        let mut kill_at: Option<Instant> = None;

        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,

                Some(line) = lines.recv() => self.emit(ProcessEvent::Console(line)),

                Some(text) = input.recv() => self.write_stdin(&text).await,

                _ = &mut stop, if !stop_requested => {
                    stop_requested = true;
                    kill_at = self.begin_stop().await;
                }

                _ = wait_until(kill_at) => {
                    warn!("Process did not exit within {:?}, killing it", self.stop_timeout);
                    kill_at = None;
                    self.kill();
                }
            }
        };

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!("Failed to wait for process: {}", e);
                None
            }
        };

        // Output written just before exit may still be in flight
        let _ = timeout(DRAIN_TIMEOUT, async {
            while let Some(line) = lines.recv().await {
                self.emit(ProcessEvent::Console(line));
            }
        })
        .await;
        for reader in readers {
            reader.abort();
        }

        if stop_requested {
            info!("Process stopped (exit code {:?})", code);
        } else {
            warn!("Process exited unexpectedly (exit code {:?})", code);
        }
        self.alive.store(false, Ordering::Release);
        self.emit(ProcessEvent::Stopped { code });
    }

    /// Send the stop command, or kill right away if there is none. Returns
    /// the kill deadline for a graceful stop.
    async fn begin_stop(&mut self) -> Option<Instant> {
        let Some(command) = self.stop_command.clone() else {
            self.kill();
            return None;
        };

        info!("Stopping process with {:?}", command);
        self.write_stdin(&format!("{}\n", command)).await;
        Some(Instant::now() + self.stop_timeout)
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill process: {}", e);
        }
    }

    async fn write_stdin(&mut self, text: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            debug!("Dropping input, stdin is closed: {:?}", text);
            return;
        };

        let result = async {
            stdin.write_all(text.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to write to process stdin: {}", e);
            self.stdin = None;
        }
    }

    fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Split one output pipe into lines, copying the raw bytes to `echo` when
/// set. A trailing partial line is flushed at end of stream.
async fn read_lines<R, W>(mut pipe: R, lines: mpsc::UnboundedSender<String>, mut echo: Option<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut chunk = vec![0u8; READ_CHUNK_LEN];

    loop {
        let len = match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => {
                warn!("Failed to read process output: {}", e);
                break;
            }
        };

        if let Some(out) = echo.as_mut() {
            let _ = out.write_all(&chunk[..len]).await;
            let _ = out.flush().await;
        }
        for line in splitter.push(&chunk[..len]) {
            if lines.send(line).is_err() {
                return;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        let _ = lines.send(line);
    }
}

/// Where lines typed on our stdin go. Only the latest run started with
/// `pipe_stdin` receives them.
static STDIN_ROUTE: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>> =
    std::sync::Mutex::new(None);
static STDIN_READER: Once = Once::new();

/// Route our stdin to `input`, starting the reader thread on first use
fn forward_stdin(input: mpsc::UnboundedSender<String>) {
    *STDIN_ROUTE.lock().unwrap_or_else(PoisonError::into_inner) = Some(input);
    STDIN_READER.call_once(|| {
        let spawned = thread::Builder::new()
            .name("scriptserver-stdin".to_string())
            .spawn(read_stdin);
        if let Err(e) = spawned {
            warn!("Failed to start stdin reader: {}", e);
        }
    });
}

/// Stop routing stdin to `input` if it is the current target
fn release_stdin(input: &mpsc::UnboundedSender<String>) {
    let mut route = STDIN_ROUTE.lock().unwrap_or_else(PoisonError::into_inner);
    if route.as_ref().is_some_and(|current| current.same_channel(input)) {
        *route = None;
    }
}

#[cfg(test)]
fn stdin_routed_to(input: &mpsc::UnboundedSender<String>) -> bool {
    STDIN_ROUTE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|current| current.same_channel(input))
}

/// Blocking stdin loop. Runs on a plain thread that is never joined, so a
/// pending read does not hold up runtime shutdown.
fn read_stdin() {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                return;
            }
        };

        let route = STDIN_ROUTE.lock().unwrap_or_else(PoisonError::into_inner);
        match route.as_ref() {
            Some(input) => {
                let _ = input.send(format!("{}\n", line));
            }
            None => debug!("No process to forward stdin to: {:?}", line),
        }
    }
    debug!("Stdin closed");
}
