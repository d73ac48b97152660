//! Child-process plumbing shared by the adapters.

use std::io::{BufRead, BufReader, Read};
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

/// Keep console tools from flashing a window when launched from a GUI process.
pub(crate) fn hide_console(command: &mut Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    let _ = command;
}

/// `program arg arg ...`, for log lines.
pub(crate) fn render(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Background reader that feeds each output line to a callback.
///
/// Lines are decoded lossily and stripped of their line terminator only, so
/// leading tabs survive.
pub(crate) struct LineReader {
    done: mpsc::Receiver<()>,
    join: thread::JoinHandle<()>,
}

impl LineReader {
    pub(crate) fn spawn<R, F>(name: String, stream: R, mut on_line: F) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
        F: FnMut(&str) + Send + 'static,
    {
        let (done_tx, done) = mpsc::channel();
        let join = thread::Builder::new().name(name).spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        on_line(line.trim_end_matches(['\r', '\n']));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "error reading tool output");
                        break;
                    }
                }
            }
            let _ = done_tx.send(());
        })?;
        Ok(Self { done, join })
    }

    /// Wait until `deadline` for the stream to close. Returns `false` if the
    /// reader is still running; it is then left detached.
    pub(crate) fn join_until(self, deadline: Instant) -> bool {
        match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = self.join.join();
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }
}
