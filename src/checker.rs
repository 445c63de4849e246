//! Checker subprocess execution.
//!
//! Checkers are opaque executables speaking a fixed CLI contract:
//! `checker check <ip>` / `checker put|get <ip> <private_data> <flag> <vuln>`,
//! exit code in {101, 102, 103, 104, 110}, stdout = public message, stderr =
//! private message. Runs are bounded by a semaphore so a slow service can
//! never occupy the whole runtime, and by a two-phase timeout: SIGTERM at
//! `checker_timeout`, SIGKILL three seconds later.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::structs::flag::Flag;
use crate::structs::status::{Action, CheckerVerdict, TaskStatus};
use crate::structs::task::Task;
use crate::structs::team::Team;

/// Captured stdout/stderr are truncated to this many bytes.
const OUTPUT_CAP: usize = 1024;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounded pool gating concurrent checker subprocesses.
#[derive(Clone)]
pub struct CheckerPool {
    permits: Arc<Semaphore>,
}

impl CheckerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }
}

/// One checker invocation bound to a (team, task) pair and, for PUT/GET, a
/// flag.
pub struct CheckerRunner<'a> {
    pub team: &'a Team,
    pub task: &'a Task,
    pub flag: Option<&'a Flag>,
}

impl CheckerRunner<'_> {
    pub async fn check(&self, pool: &CheckerPool) -> CheckerVerdict {
        self.invoke(pool, Action::Check).await
    }

    pub async fn put(&self, pool: &CheckerPool) -> CheckerVerdict {
        self.invoke(pool, Action::Put).await
    }

    pub async fn get(&self, pool: &CheckerPool) -> CheckerVerdict {
        self.invoke(pool, Action::Get).await
    }

    fn argv(&self, action: Action) -> Option<Vec<String>> {
        let mut argv = vec![
            self.task.checker.clone(),
            action.verb().to_string(),
            self.team.ip.clone(),
        ];
        if action != Action::Check {
            let flag = self.flag?;
            argv.push(flag.private_flag_data.clone());
            argv.push(flag.flag.clone());
            argv.push(flag.vuln_number.unwrap_or(1).to_string());
        }
        Some(argv)
    }

    async fn invoke(&self, pool: &CheckerPool, action: Action) -> CheckerVerdict {
        let Some(argv) = self.argv(action) else {
            return CheckerVerdict {
                status: TaskStatus::CheckFailed,
                action,
                public_message: "Check failed".into(),
                private_message: format!("{action} invoked without a flag"),
                command: String::new(),
            };
        };
        let command = shell_join(&argv);

        // Keeps the number of live checker subprocesses at the pool size no
        // matter how many jobs the workers drain.
        let _permit = pool.permits.acquire().await;

        debug!(team = self.team.id, task = self.task.id, %command, "running checker");
        let outcome = run_checker_process(&argv, &self.task.env_path, self.task.checker_timeout).await;

        let (status, public_message, private_message) = match outcome {
            ProcessOutcome::Exited { code, stdout, stderr } => match TaskStatus::from_code(code) {
                Some(status) => {
                    if status == TaskStatus::CheckFailed {
                        warn!(
                            team = self.team.id,
                            task = self.task.id,
                            code,
                            stdout = %stdout,
                            stderr = %stderr,
                            "{action} reported CHECK_FAILED"
                        );
                    }
                    (status, stdout, stderr)
                }
                None => {
                    warn!(team = self.team.id, task = self.task.id, code, "{action} exited with unknown code");
                    (
                        TaskStatus::CheckFailed,
                        "Check failed".to_string(),
                        format!("Unexpected return code: {code}\nStdout: {stdout}\nStderr: {stderr}"),
                    )
                }
            },
            ProcessOutcome::Signalled => (
                TaskStatus::CheckFailed,
                "Check failed".to_string(),
                format!("{action} terminated by signal"),
            ),
            ProcessOutcome::TimedOut { killed } => {
                if killed {
                    warn!(team = self.team.id, task = self.task.id, "checker forcefully killed during {action}");
                }
                (
                    TaskStatus::Down,
                    "Checker timed out".to_string(),
                    format!("{action} timeout"),
                )
            }
            ProcessOutcome::SpawnFailed(err) => (
                TaskStatus::CheckFailed,
                "Check failed".to_string(),
                format!("Failed to spawn checker: {err}"),
            ),
        };

        CheckerVerdict {
            status,
            action,
            public_message,
            private_message,
            command,
        }
    }
}

enum ProcessOutcome {
    Exited { code: i64, stdout: String, stderr: String },
    Signalled,
    TimedOut { killed: bool },
    SpawnFailed(std::io::Error),
}

async fn run_checker_process(argv: &[String], env_path: &str, timeout_secs: i64) -> ProcessOutcome {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !env_path.is_empty() {
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{env_path}:{path}"));
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return ProcessOutcome::SpawnFailed(err),
    };

    // Drain pipes concurrently so a chatty checker can't block on a full pipe.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_capped(stdout));
    let stderr_task = tokio::spawn(read_capped(stderr));

    let wait = tokio::time::timeout(Duration::from_secs(timeout_secs.max(1) as u64), child.wait()).await;

    match wait {
        Ok(Ok(exit)) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            match exit.code() {
                Some(code) => ProcessOutcome::Exited {
                    code: code as i64,
                    stdout,
                    stderr,
                },
                None => ProcessOutcome::Signalled,
            }
        }
        Ok(Err(err)) => ProcessOutcome::SpawnFailed(err),
        Err(_) => {
            // Graceful phase: SIGTERM, then SIGKILL after the grace period.
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            let killed = match tokio::time::timeout(TERMINATE_TIMEOUT, child.wait()).await {
                Ok(_) => false,
                Err(_) => {
                    let _ = child.kill().await;
                    true
                }
            };
            ProcessOutcome::TimedOut { killed }
        }
    }
}

async fn read_capped(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut captured: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if captured.len() < OUTPUT_CAP {
                    let take = (OUTPUT_CAP - captured.len()).min(n);
                    captured.extend_from_slice(&buf[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&captured).trim().to_string()
}

/// Shell-quoted argv for the `command` column.
fn shell_join(argv: &[String]) -> String {
    argv.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
