//! Child-process transport for a stdio MCP server
//!
//! Owns the server process and its three pipes:
//! - stdin: newline-terminated JSON-RPC lines written by the client
//! - stdout: newline-terminated JSON-RPC lines read on demand with a deadline
//! - stderr: drained continuously by a background task into a
//!   [`DiagnosticLog`], so a chatty server can never fill the pipe and stall

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{Error, Result};

use super::diagnostics::DiagnosticLog;

/// How long to wait for the exit status once stdout has closed
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(1);

/// How long `stop` waits for the stderr drain task before aborting it.
/// Grandchildren (e.g. servers started through `npx`) can keep stderr open.
const DRAIN_JOIN_LIMIT: Duration = Duration::from_millis(500);

/// Line reader that keeps partial lines across cancelled reads
///
/// `read_until` leaves already-consumed bytes in the buffer when its future is
/// dropped, so keeping the buffer between calls makes `next_line` safe to use
/// under a timeout.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next line without its terminator; `None` at end of stream
    ///
    /// Invalid UTF-8 is replaced rather than treated as an error.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Connection to a spawned MCP server
pub struct Transport {
    /// Server subprocess
    child: Child,
    /// Buffered writer for server stdin; `None` once closed
    writer: Option<BufWriter<ChildStdin>>,
    /// Line reader for server stdout; `None` once end of stream was seen
    reader: Option<LineReader<BufReader<ChildStdout>>>,
    /// Server stderr lines
    diagnostics: DiagnosticLog,
    /// Background stderr drain
    drain: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Transport {
    /// Spawn the server described by `command_line`
    ///
    /// The command line is split with POSIX shell-word rules; no shell is
    /// involved. Must be called from within a Tokio runtime.
    pub fn start(command_line: &str, diagnostic_capacity: usize) -> Result<Self> {
        let argv = shell_words::split(command_line).map_err(|e| {
            Error::ServerStartFailed(format!("Invalid command line '{}': {}", command_line, e))
        })?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ServerStartFailed("Server command line is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::ServerStartFailed(format!("Failed to start {}: {}", program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ServerStartFailed("Failed to get server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ServerStartFailed("Failed to get server stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ServerStartFailed("Failed to get server stderr".to_string()))?;

        tracing::info!(pid = ?child.id(), "Started MCP server: {}", command_line);

        let diagnostics = DiagnosticLog::new(diagnostic_capacity);
        let drain = tokio::spawn(drain_diagnostics(stderr, diagnostics.clone()));

        Ok(Self {
            child,
            writer: Some(BufWriter::new(stdin)),
            reader: Some(LineReader::new(BufReader::new(stdout))),
            diagnostics,
            drain: Some(drain),
            stopped: false,
        })
    }

    /// Write one line to the server and flush it
    ///
    /// Fails with `Timeout` if the server stops reading stdin and the write
    /// cannot complete before `deadline`. A line cut short that way would
    /// corrupt the stream, so stdin is closed afterwards.
    pub async fn write_line(&mut self, line: &str, deadline: Instant) -> Result<()> {
        let started = Instant::now();
        let writer = self.writer.as_mut().ok_or(Error::TransportUnavailable)?;

        match tokio::time::timeout_at(deadline, write_line_to(writer, line)).await {
            Err(_) => {
                tracing::warn!("MCP server is not reading stdin; closing it");
                self.writer = None;
                Err(Error::timeout(
                    "input to the MCP server",
                    deadline.saturating_duration_since(started),
                ))
            }
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("Server stdin closed: {}", e);
                self.writer = None;
                Err(Error::TransportUnavailable)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
        }
    }

    /// Wait for the next non-blank line on the server's stdout
    ///
    /// Fails with `Timeout` once `deadline` passes and with `ProcessExited`
    /// when stdout reaches end of stream.
    pub async fn read_line(&mut self, deadline: Instant) -> Result<String> {
        let started = Instant::now();
        let reader = self.reader.as_mut().ok_or(Error::TransportUnavailable)?;

        loop {
            match tokio::time::timeout_at(deadline, reader.next_line()).await {
                Err(_) => {
                    return Err(Error::timeout(
                        "output from the MCP server",
                        deadline.saturating_duration_since(started),
                    ))
                }
                Ok(Ok(Some(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(line);
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(Error::Io(e)),
            }
        }

        self.reader = None;
        let code = self.exit_code_after_eof(deadline).await;
        Err(Error::ProcessExited(code))
    }

    async fn exit_code_after_eof(&mut self, deadline: Instant) -> Option<i32> {
        let wait = EXIT_STATUS_WAIT.min(deadline.saturating_duration_since(Instant::now()));
        match tokio::time::timeout(wait, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                tracing::warn!("Failed to collect MCP server exit status: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("MCP server closed stdout but is still running");
                None
            }
        }
    }

    /// Snapshot of the buffered stderr lines
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Check if the server is still running
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Shut the server down
    ///
    /// Closes stdin, asks the process to terminate, and kills it if it is
    /// still alive after `grace`. Safe to call any number of times and on a
    /// process that already died.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }

        if self.is_running() {
            self.terminate();
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("MCP server exited: {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to wait for MCP server: {}", e),
                Err(_) => {
                    tracing::warn!(
                        "MCP server did not exit within {:?}, killing it",
                        grace
                    );
                    let _ = self.child.kill().await;
                }
            }
        }

        self.reader = None;

        if let Some(mut drain) = self.drain.take() {
            if tokio::time::timeout(DRAIN_JOIN_LIMIT, &mut drain).await.is_err() {
                drain.abort();
            }
        }

        Ok(())
    }

    /// Ask the server to terminate (SIGTERM on unix, kill elsewhere)
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: the pid belongs to our child, which has not been reaped yet
                let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if result == 0 {
                    return;
                }
            }
        }

        let _ = self.child.start_kill();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if !self.stopped {
            // Best-effort since we can't await in drop
            let _ = self.child.start_kill();
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

async fn write_line_to(writer: &mut BufWriter<ChildStdin>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Copy server stderr into the diagnostic log until the stream closes
async fn drain_diagnostics(stderr: ChildStderr, log: DiagnosticLog) {
    let mut reader = LineReader::new(BufReader::new(stderr));
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "mcp_harness::stderr", "{}", line);
                log.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Reading MCP server stderr failed: {}", e);
                break;
            }
        }
    }
    tracing::debug!("MCP server stderr closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_line_reader_strips_terminators() {
        let data = b"first\r\nsecond\nlast".to_vec();
        let mut reader = LineReader::new(tokio::io::BufReader::new(Cursor::new(data)));

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("last"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_reader_replaces_invalid_utf8() {
        let data = b"ok \xff\xfe bytes\n".to_vec();
        let mut reader = LineReader::new(tokio::io::BufReader::new(Cursor::new(data)));

        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.ends_with(" bytes"));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let err = Transport::start("   ", 10).err().unwrap();
        assert!(matches!(err, Error::ServerStartFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = Transport::start("definitely-not-a-real-mcp-server-binary", 10)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ServerStartFailed(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn deadline_in(ms: u64) -> Instant {
            Instant::now() + Duration::from_millis(ms)
        }

        #[tokio::test]
        async fn test_echo_round_trip() {
            let mut transport = Transport::start("cat", 10).unwrap();

            transport
                .write_line("{\"hello\":1}", deadline_in(2000))
                .await
                .unwrap();
            let line = transport.read_line(deadline_in(2000)).await.unwrap();
            assert_eq!(line, "{\"hello\":1}");

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_stderr_is_drained_into_diagnostics() {
            let mut transport = Transport::start(
                "sh -c 'echo out; echo warn one >&2; echo warn two >&2; sleep 5'",
                10,
            )
            .unwrap();

            assert_eq!(transport.read_line(deadline_in(2000)).await.unwrap(), "out");

            let started = Instant::now();
            while transport.diagnostics().len() < 2 && started.elapsed() < Duration::from_secs(2) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert_eq!(
                transport.diagnostics().snapshot(),
                vec!["warn one".to_string(), "warn two".to_string()]
            );

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_read_times_out_promptly() {
            let mut transport = Transport::start("sleep 10", 10).unwrap();

            let started = Instant::now();
            let err = transport.read_line(deadline_in(200)).await.unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_millis(200 + 300));

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_partial_line_survives_timeout() {
            let mut transport =
                Transport::start("sh -c 'printf par; sleep 1; printf \"tial\\n\"; sleep 5'", 10)
                    .unwrap();

            let err = transport.read_line(deadline_in(300)).await.unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));

            let line = transport.read_line(deadline_in(3000)).await.unwrap();
            assert_eq!(line, "partial");

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_process_exit_is_reported() {
            let mut transport = Transport::start("sh -c 'echo bye; exit 3'", 10).unwrap();

            assert_eq!(transport.read_line(deadline_in(2000)).await.unwrap(), "bye");
            let err = transport.read_line(deadline_in(2000)).await.unwrap_err();
            assert!(matches!(err, Error::ProcessExited(Some(3))));

            let err = transport.read_line(deadline_in(2000)).await.unwrap_err();
            assert!(matches!(err, Error::TransportUnavailable));
            assert!(!transport.is_running());

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_stop_is_idempotent() {
            let mut transport = Transport::start("sleep 30", 10).unwrap();
            assert!(transport.is_running());

            let started = Instant::now();
            transport.stop(Duration::from_secs(5)).await.unwrap();
            transport.stop(Duration::from_secs(5)).await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));

            let err = transport.write_line("{}", deadline_in(1000)).await.unwrap_err();
            assert!(matches!(err, Error::TransportUnavailable));
        }

        #[tokio::test]
        async fn test_write_times_out_when_server_stops_reading() {
            let mut transport = Transport::start("sleep 30", 10).unwrap();
            // Far larger than a pipe buffer
            let line = "x".repeat(1024 * 1024);

            let started = Instant::now();
            let err = transport
                .write_line(&line, deadline_in(300))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_millis(300 + 500));

            // The half-written line poisoned stdin
            let err = transport.write_line("{}", deadline_in(300)).await.unwrap_err();
            assert!(matches!(err, Error::TransportUnavailable));

            transport.stop(Duration::from_secs(2)).await.unwrap();
        }

        #[tokio::test]
        async fn test_stop_kills_process_ignoring_sigterm() {
            let mut transport =
                Transport::start("sh -c 'trap \"\" TERM; while true; do sleep 1; done'", 10)
                    .unwrap();
            // Let the shell install its trap
            tokio::time::sleep(Duration::from_millis(200)).await;

            let started = Instant::now();
            transport.stop(Duration::from_millis(300)).await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(3));
            assert!(!transport.is_running());
        }
    }
}
