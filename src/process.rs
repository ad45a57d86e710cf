//! External tool invocation.
//!
//! The prober and the audio extractor never spawn processes directly; they go
//! through a [`CommandRunner`] so tests can substitute a spy and callers can
//! impose a kill deadline.

use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long pipe readers may keep draining after a timed-out child is killed.
/// A grandchild holding the pipe open can outlive the child.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

enum Wait {
    Exited(Option<i32>),
    TimedOut,
}

/// Captured result of one external process run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Diagnostic text written to stderr, trimmed
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs an external program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ProcessOutput>;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child if it has not exited after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ProcessOutput> {
        tracing::debug!(program, ?args, "spawning external tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Both pipes are drained concurrently so a chatty stderr cannot block
        // the child while we wait on stdout.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit_code = match self.timeout {
            Some(timeout) => match wait_with_deadline(&mut child, timeout, program)? {
                Wait::Exited(code) => code,
                Wait::TimedOut => {
                    let deadline = Instant::now() + DRAIN_GRACE;
                    reap_reader(stdout, deadline, program);
                    reap_reader(stderr, deadline, program);
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} did not finish within {:?}", program, timeout),
                    ));
                }
            },
            None => child.wait()?.code(),
        };

        Ok(ProcessOutput {
            exit_code,
            stdout: join_reader(stdout)?,
            stderr: join_reader(stderr)?,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(handle: thread::JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe reader thread panicked"))?
}

/// Join a reader of a killed child, giving up at `deadline`. A reader still
/// blocked after that is left to finish on its own.
fn reap_reader(handle: thread::JoinHandle<io::Result<Vec<u8>>>, deadline: Instant, program: &str) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::debug!(program, "pipe still held open after kill, detaching reader");
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = join_reader(handle);
    true
}

fn wait_with_deadline(child: &mut Child, timeout: Duration, program: &str) -> io::Result<Wait> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Wait::Exited(status.code()));
        }
        if Instant::now() >= deadline {
            tracing::warn!(program, timeout_secs = timeout.as_secs_f64(), "killing external tool");
            child.kill()?;
            child.wait()?;
            return Ok(Wait::TimedOut);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_success() {
        let ok = ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let killed = ProcessOutput {
            exit_code: None,
            stderr: b"  boom\n".to_vec(),
            ..Default::default()
        };
        assert!(!killed.success());
        assert_eq!(killed.stderr_text(), "boom");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let runner = SystemRunner::new();
        let result = runner.run("definitely-not-a-real-binary-4711", &[]);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout_and_exit_code() {
        let runner = SystemRunner::new();
        let out = runner
            .run("sh", &["-c".into(), "printf abc; echo err >&2; exit 3".into()])
            .unwrap();
        assert_eq!(out.stdout, b"abc");
        assert_eq!(out.stderr_text(), "err");
        assert_eq!(out.exit_code, Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let runner = SystemRunner::with_timeout(Some(Duration::from_millis(100)));
        let err = runner
            .run("sh", &["-c".into(), "sleep 5".into()])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_with_grandchild_holding_pipes() {
        let runner = SystemRunner::with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        let err = runner
            .run("sh", &["-c".into(), "sleep 5 & sleep 5".into()])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_reap_reader_bounded() {
        let done = thread::spawn(|| Ok(b"out".to_vec()));
        assert!(reap_reader(done, Instant::now() + Duration::from_secs(2), "test"));

        let stuck = thread::spawn(|| {
            thread::sleep(Duration::from_secs(2));
            Ok(Vec::new())
        });
        let started = Instant::now();
        assert!(!reap_reader(stuck, Instant::now() + Duration::from_millis(50), "test"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
