//! Interactive console collaborator: where authorization prompts are shown
//! and human input is read.

use std::collections::VecDeque;
use std::io::{self, BufRead};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[async_trait]
pub trait Console: Send {
    /// Show `prompt` and read one line. `Ok(None)` means end of input.
    async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Display a labelled message to the operator.
    fn show(&mut self, label: &str, text: &str);
}

/// Console on the process's stdin, with prompts and messages on stderr so
/// stdout stays free for the final answer.
///
/// Lines are read on a detached OS thread and handed over a channel, so a
/// pending read never holds up runtime shutdown after an interrupt.
pub struct StdConsole {
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, lines) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to start console input thread: {e}");
        }
        Self { lines }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdConsole {
    async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(prompt.as_bytes()).await?;
        stderr.flush().await?;

        self.lines.recv().await.transpose()
    }

    fn show(&mut self, label: &str, text: &str) {
        eprintln!("{label} {text}");
    }
}

/// Console fed from a fixed list of lines. Records everything shown.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    lines: VecDeque<String>,
    pub prompts: usize,
    pub shown: Vec<(String, String)>,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        self.prompts += 1;
        Ok(self.lines.pop_front())
    }

    fn show(&mut self, label: &str, text: &str) {
        self.shown.push((label.to_string(), text.to_string()));
    }
}
