use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("command terminated with an unknown error: {0}")]
    ExecutionError(#[from] std::io::Error),

    #[error("command terminated with a non success exit status: {0}")]
    ExitStatusError(ExitStatus),

    #[error("command killed due to cancel request: {0}")]
    Killed(String),

    #[error("command terminated due to timeout: {0}")]
    TimeoutError(String),
}

/// Decides when a running command must be aborted.
pub enum CommandKiller<'a> {
    Never,
    Timeout(Duration),
    TimeoutOrCancel {
        timeout: Duration,
        should_abort: &'a dyn Fn() -> bool,
    },
}

impl<'a> CommandKiller<'a> {
    pub fn never() -> CommandKiller<'static> {
        CommandKiller::Never
    }

    pub fn from_timeout(timeout: Duration) -> CommandKiller<'static> {
        CommandKiller::Timeout(timeout)
    }

    pub fn from(timeout: Duration, should_abort: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller::TimeoutOrCancel { timeout, should_abort }
    }

    fn should_kill(&self, started_at: Instant) -> Option<CommandError> {
        match self {
            CommandKiller::Never => None,
            CommandKiller::Timeout(timeout) => {
                if started_at.elapsed() >= *timeout {
                    return Some(CommandError::TimeoutError(format!(
                        "command took more than {}s to execute",
                        timeout.as_secs()
                    )));
                }
                None
            }
            CommandKiller::TimeoutOrCancel { timeout, should_abort } => {
                if should_abort() {
                    return Some(CommandError::Killed("abort requested".to_string()));
                }
                if started_at.elapsed() >= *timeout {
                    return Some(CommandError::TimeoutError(format!(
                        "command took more than {}s to execute",
                        timeout.as_secs()
                    )));
                }
                None
            }
        }
    }
}

/// External command with line-streamed output.
pub struct EngineCommand {
    bin: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new(bin: &str, args: &[&str], envs: &[(&str, &str)]) -> EngineCommand {
        EngineCommand {
            bin: bin.to_string(),
            args: args.iter().map(|x| x.to_string()).collect(),
            envs: envs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            current_dir: None,
        }
    }

    pub fn with_current_dir(mut self, dir: &Path) -> EngineCommand {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn exec(&mut self, killer: &CommandKiller) -> Result<(), CommandError> {
        self.exec_with_output(&mut |line| debug!("{}", line), &mut |line| debug!("{}", line), killer)
    }

    pub fn exec_with_output(
        &mut self,
        stdout_output: &mut (dyn FnMut(String) + Send),
        stderr_output: &mut (dyn FnMut(String) + Send),
        killer: &CommandKiller,
    ) -> Result<(), CommandError> {
        info!("command: {} {}", self.bin, self.args.join(" "));

        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let started_at = Instant::now();
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CommandError::ExecutionError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdout handle"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            CommandError::ExecutionError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stderr handle"))
        })?;

        let status = thread::scope(|scope| -> Result<ExitStatus, CommandError> {
            let stdout_reader = scope.spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    stdout_output(line);
                }
            });
            let stderr_reader = scope.spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    stderr_output(line);
                }
            });

            let ret = wait_with_killer(&mut child, killer, started_at);
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            ret
        });

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(CommandError::ExitStatusError(status)),
            Err(err) => Err(err),
        }
    }
}

fn wait_with_killer(child: &mut Child, killer: &CommandKiller, started_at: Instant) -> Result<ExitStatus, CommandError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if let Some(kill_reason) = killer.should_kill(started_at) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(kill_reason);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandError, CommandKiller, EngineCommand};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_command_captures_output_lines() {
        let mut lines: Vec<String> = Vec::new();
        let mut cmd = EngineCommand::new("sh", &["-c", "echo hello && echo world"], &[]);
        let ret = cmd.exec_with_output(&mut |line| lines.push(line), &mut |_| {}, &CommandKiller::never());

        assert!(ret.is_ok());
        assert_eq!(lines, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_command_reports_non_zero_exit() {
        let mut cmd = EngineCommand::new("sh", &["-c", "exit 3"], &[]);
        let ret = cmd.exec(&CommandKiller::never());

        assert!(matches!(ret, Err(CommandError::ExitStatusError(_))));
    }

    #[test]
    fn test_command_killed_on_timeout() {
        let mut cmd = EngineCommand::new("sleep", &["30"], &[]);
        let ret = cmd.exec(&CommandKiller::from_timeout(Duration::from_millis(200)));

        assert!(matches!(ret, Err(CommandError::TimeoutError(_))));
    }

    #[test]
    fn test_command_killed_on_cancel() {
        let canceled = AtomicBool::new(true);
        let should_abort = || canceled.load(Ordering::Relaxed);
        let mut cmd = EngineCommand::new("sleep", &["30"], &[]);
        let ret = cmd.exec(&CommandKiller::from(Duration::from_secs(60), &should_abort));

        assert!(matches!(ret, Err(CommandError::Killed(_))));
    }
}
