//! Operator input.
//!
//! Lines are read on a dedicated OS thread and handed over a channel, so a
//! pending read never keeps the runtime from shutting down.

use std::io::BufRead;

use tokio::sync::mpsc;
use tracing::warn;

pub struct OperatorInput {
    lines: mpsc::Receiver<String>,
}

impl OperatorInput {
    /// Wrap an existing line channel. Input ends when every sender is dropped.
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self { lines }
    }

    /// Read lines from the process's standard input
    pub fn stdin() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Read lines from any blocking reader on a background thread
    pub fn from_reader<R>(mut reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);

        std::thread::spawn(move || {
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = strip_line_ending(String::from_utf8_lossy(&buf).into_owned());
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read operator input: {}", e);
                        break;
                    }
                }
            }
        });

        Self::new(rx)
    }

    /// Next line without its terminator, or `None` once input has ended
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

/// Drop a trailing `\n` or `\r\n`; everything else is kept verbatim.
fn strip_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}
