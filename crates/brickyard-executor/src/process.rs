use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const CHUNK: usize = 8 * 1024;

/// Forward everything `source` yields, chunk by chunk, until it closes.
fn drain<R: Read + Send + 'static>(source: Option<R>) -> Option<Receiver<Vec<u8>>> {
    source.map(|mut r| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; CHUNK];
            loop {
                match r.read(&mut buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        rx
    })
}

/// Gather drained output until the pipe closes or `deadline` passes.
fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(rx) = rx else {
        return out;
    };
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipe still open at deadline, returning partial output");
                break;
            }
        }
    }
    out
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. Output is drained on helper threads so a
/// chatty child cannot fill its pipe and stall. If a descendant keeps the
/// pipes open after the child exits, whatever arrived before the deadline is
/// returned.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> io::Result<Option<Output>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        let now = Instant::now();
        if now >= deadline {
            if let Err(e) = child.kill() {
                warn!("failed to kill timed out process: {e}");
            }
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    };

    Ok(Some(Output {
        status,
        stdout: collect(stdout, deadline),
        stderr: collect(stderr, deadline),
    }))
}
