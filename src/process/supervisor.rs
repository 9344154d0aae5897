//! Concurrent process supervision with all-or-nothing liveness

use super::shutdown_requested;
use crate::chain::ChainDescriptor;
use crate::error::{MeshError, MeshResult};

use std::fs::OpenOptions;
use std::future::Future;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How much of a process's stderr is kept for error reports
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for stderr to drain after a process exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Final state of one supervised process
#[derive(Debug)]
enum ExitOutcome {
    /// The process ended on its own
    Exited { status: ExitStatus, stderr: String },
    /// The process was stopped by the shutdown path
    Killed,
    /// The process could not be started or waited on
    Failed(MeshError),
}

#[derive(Debug)]
struct ExitReport {
    chain: String,
    outcome: ExitOutcome,
}

/// Cloneable trigger for the group-wide shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request that every process stop. Only the first call has any effect;
    /// it returns true, later calls return false.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Starts every chain process and stops them all together
pub struct ProcessSupervisor {
    shutdown: ShutdownHandle,
    reports: mpsc::UnboundedReceiver<ExitReport>,
    tracked: usize,
    killed: Vec<String>,
}

impl ProcessSupervisor {
    /// Spawn one supervising task per chain. Must be called within a Tokio runtime.
    pub fn start(chains: &[Arc<ChainDescriptor>], log_file_name: Option<&str>) -> Self {
        let shutdown = ShutdownHandle::new();
        let (report_tx, reports) = mpsc::unbounded_channel();

        for chain in chains {
            let log_path = chain.log_path(log_file_name);
            tokio::spawn(supervise_chain(
                chain.clone(),
                log_path,
                shutdown.subscribe(),
                report_tx.clone(),
            ));
        }

        info!("Launching {} chains", chains.len());

        Self {
            shutdown,
            reports,
            tracked: chains.len(),
            killed: Vec::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Chains stopped by the shutdown path, in the order they stopped
    pub fn killed(&self) -> &[String] {
        &self.killed
    }

    /// Wait until every process has ended.
    ///
    /// The first process failure stops all others and is returned as the
    /// error. `interrupt` completing also stops all processes, and the run
    /// then ends without error even if processes fail concurrently.
    pub async fn run<F>(&mut self, interrupt: F) -> MeshResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let mut remaining = self.tracked;
        let mut interrupted = false;
        let mut failure: Option<MeshError> = None;

        while remaining > 0 {
            tokio::select! {
                biased;

                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    info!("Shutdown signal received, stopping all chains");
                    self.shutdown.trigger();
                }

                report = self.reports.recv() => {
                    let Some(report) = report else {
                        break;
                    };
                    remaining -= 1;
                    self.handle_report(report, &mut failure);
                }
            }
        }

        if interrupted {
            if let Some(err) = failure {
                debug!("Ignoring failure during interrupt shutdown: {}", err);
            }
            return Ok(());
        }

        match failure {
            Some(err) => Err(err),
            None => {
                info!("All chains have exited");
                Ok(())
            }
        }
    }

    fn handle_report(&mut self, report: ExitReport, failure: &mut Option<MeshError>) {
        let ExitReport { chain, outcome } = report;

        match outcome {
            ExitOutcome::Killed => {
                info!("Chain {} stopped", chain);
                crate::metrics::record_process_exit(&chain, "killed");
                self.killed.push(chain);
            }
            ExitOutcome::Exited { status, .. } if status.success() => {
                warn!("Chain {} exited cleanly", chain);
                crate::metrics::record_process_exit(&chain, "exited");
            }
            ExitOutcome::Exited { status, stderr } => {
                crate::metrics::record_process_exit(&chain, "failed");
                self.fail(
                    MeshError::ProcessExit {
                        chain,
                        status: status.to_string(),
                        stderr,
                    },
                    failure,
                );
            }
            ExitOutcome::Failed(err) => {
                crate::metrics::record_process_exit(&chain, "failed");
                self.fail(err, failure);
            }
        }
    }

    /// Record the first failure and stop everything else
    fn fail(&self, err: MeshError, failure: &mut Option<MeshError>) {
        if failure.is_some() || self.shutdown.is_triggered() {
            warn!("Chain failure during shutdown: {}", err);
            return;
        }

        error!("{}", err);
        error!("Stopping all chains");
        self.shutdown.trigger();
        *failure = Some(err);
    }
}

/// Run one chain until it exits or shutdown is requested
async fn supervise_chain(
    chain: Arc<ChainDescriptor>,
    log_path: std::path::PathBuf,
    mut shutdown: watch::Receiver<bool>,
    reports: mpsc::UnboundedSender<ExitReport>,
) {
    let identity = chain.identity().to_string();

    let outcome = match spawn_chain(&chain, &log_path) {
        Err(err) => ExitOutcome::Failed(err),
        Ok(mut child) => {
            info!(
                "Started chain {} (pid {}), logging to {}",
                identity,
                child.id().unwrap_or_default(),
                log_path.display()
            );

            let stderr_task: Option<JoinHandle<String>> =
                child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = shutdown_requested(&mut shutdown) => None,
            };

            match exited {
                Some(Ok(status)) => ExitOutcome::Exited {
                    status,
                    stderr: collect_stderr(stderr_task).await,
                },
                Some(Err(e)) => ExitOutcome::Failed(MeshError::Spawn {
                    chain: identity.clone(),
                    message: format!("failed to wait on process: {}", e),
                }),
                None => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill chain {}: {}", identity, e);
                    }
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    ExitOutcome::Killed
                }
            }
        }
    };

    // The supervisor only stops listening once every report is in
    let _ = reports.send(ExitReport {
        chain: identity,
        outcome,
    });
}

fn spawn_chain(chain: &ChainDescriptor, log_path: &Path) -> MeshResult<Child> {
    let spawn_err = |message: String| MeshError::Spawn {
        chain: chain.identity().to_string(),
        message,
    };

    let executable = chain.executable().ok_or_else(|| {
        spawn_err(format!(
            "no executable found in {}",
            chain.chain_dir().display()
        ))
    })?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| spawn_err(format!("cannot open log {}: {}", log_path.display(), e)))?;

    debug!(
        "Spawning {} {:?} for chain {}",
        executable.display(),
        chain.launch_args(),
        chain.identity()
    );

    Command::new(executable)
        .args(chain.launch_args())
        .current_dir(chain.chain_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_err(format!("{}: {}", executable.display(), e)))
}

/// Read a stream to its end, keeping only the last `STDERR_TAIL_BYTES`
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&tail).into_owned()
}

async fn collect_stderr(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };

    // A grandchild can hold the pipe open after the process exits
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
        Ok(Ok(stderr)) => stderr,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NodeVendor;
    use crate::rpc::{HttpTransport, RpcClient};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TEST_TIMEOUT: Duration = Duration::from_secs(15);

    fn chain(
        base: &TempDir,
        name: &str,
        executable: Option<&str>,
        script: &str,
    ) -> Arc<ChainDescriptor> {
        let chain_dir = base.path().join(name);
        std::fs::create_dir_all(&chain_dir).unwrap();
        let transport = HttpTransport::new("127.0.0.1", 8545).unwrap();

        Arc::new(ChainDescriptor::new(
            name.to_string(),
            chain_dir,
            executable.map(PathBuf::from),
            vec!["-c".to_string(), script.to_string()],
            8545,
            30303,
            NodeVendor::Geth,
            RpcClient::new(Arc::new(transport)),
        ))
    }

    fn shell(base: &TempDir, name: &str, script: &str) -> Arc<ChainDescriptor> {
        chain(base, name, Some("/bin/sh"), script)
    }

    fn sorted(names: &[String]) -> Vec<String> {
        let mut names = names.to_vec();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_failure_kills_remaining_processes() {
        let base = TempDir::new().unwrap();
        let chains = vec![
            shell(&base, "alpha", "sleep 30"),
            shell(&base, "beta", "echo boom >&2; exit 3"),
            shell(&base, "gamma", "sleep 30"),
        ];

        let mut supervisor = ProcessSupervisor::start(&chains, None);
        let result = tokio::time::timeout(TEST_TIMEOUT, supervisor.run(std::future::pending()))
            .await
            .expect("supervisor did not finish");

        match result {
            Err(MeshError::ProcessExit { chain, stderr, .. }) => {
                assert_eq!(chain, "beta");
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(sorted(supervisor.killed()), vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn test_interrupt_kills_everything_cleanly() {
        let base = TempDir::new().unwrap();
        let chains = vec![
            shell(&base, "alpha", "sleep 30"),
            shell(&base, "beta", "sleep 30"),
            shell(&base, "gamma", "sleep 30"),
        ];

        let mut supervisor = ProcessSupervisor::start(&chains, None);
        let interrupt = tokio::time::sleep(Duration::from_millis(200));
        let result = tokio::time::timeout(TEST_TIMEOUT, supervisor.run(interrupt))
            .await
            .expect("supervisor did not finish");

        assert!(result.is_ok());
        assert_eq!(sorted(supervisor.killed()), vec!["alpha", "beta", "gamma"]);
        assert!(supervisor.shutdown_handle().is_triggered());
    }

    #[tokio::test]
    async fn test_interrupt_wins_over_concurrent_failure() {
        let base = TempDir::new().unwrap();
        let chains = vec![
            shell(&base, "alpha", "exit 1"),
            shell(&base, "beta", "sleep 30"),
        ];

        let mut supervisor = ProcessSupervisor::start(&chains, None);
        let result = tokio::time::timeout(TEST_TIMEOUT, supervisor.run(async {}))
            .await
            .expect("supervisor did not finish");

        assert!(result.is_ok());
        assert!(supervisor.killed().contains(&"beta".to_string()));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let base = TempDir::new().unwrap();
        let chains = vec![
            chain(&base, "alpha", None, ""),
            shell(&base, "beta", "sleep 30"),
        ];

        let mut supervisor = ProcessSupervisor::start(&chains, None);
        let result = tokio::time::timeout(TEST_TIMEOUT, supervisor.run(std::future::pending()))
            .await
            .expect("supervisor did not finish");

        assert!(matches!(result, Err(MeshError::Spawn { ref chain, .. }) if chain == "alpha"));
        assert_eq!(supervisor.killed(), &["beta".to_string()]);
    }

    #[tokio::test]
    async fn test_clean_exit_is_not_a_failure_and_stdout_is_logged() {
        let base = TempDir::new().unwrap();
        let chains = vec![shell(&base, "alpha", "echo hello; exit 0")];

        let mut supervisor = ProcessSupervisor::start(&chains, Some("node.out"));
        let result = tokio::time::timeout(TEST_TIMEOUT, supervisor.run(std::future::pending()))
            .await
            .expect("supervisor did not finish");

        assert!(result.is_ok());
        assert!(supervisor.killed().is_empty());
        let log = std::fs::read_to_string(base.path().join("alpha").join("node.out")).unwrap();
        assert_eq!(log.trim(), "hello");
    }

    #[test]
    fn test_shutdown_triggers_once() {
        let handle = ShutdownHandle::new();
        let mut rx = handle.subscribe();
        assert!(!handle.is_triggered());
        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert!(handle.is_triggered());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes() {
        let data = vec![b'a'; STDERR_TAIL_BYTES + 10]
            .into_iter()
            .chain(b"END".iter().copied())
            .collect::<Vec<u8>>();
        let tail = read_tail(&data[..]).await;
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("END"));
    }
}
