//! Terminal collaborators: line input and chat output.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

const FRAME_WIDTH: usize = 60;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("end of input")]
    EndOfInput,

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of user lines.
#[async_trait]
pub trait LineReader: Send {
    /// Read one line without its trailing newline.
    async fn read_line(&mut self) -> Result<String, InputError>;
}

/// Reads lines from standard input on a dedicated thread.
///
/// The blocking read lives outside the tokio runtime, so a pending read never
/// holds up runtime shutdown (for example after Ctrl-C).
pub struct StdinReader {
    lines: mpsc::Receiver<std::io::Result<String>>,
}

impl StdinReader {
    pub fn new() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Read lines from any blocking source.
    pub fn from_reader<R>(source: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || read_lines(source, tx));
        Self { lines: rx }
    }
}

impl Default for StdinReader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_lines<R: BufRead>(mut source: R, tx: mpsc::Sender<std::io::Result<String>>) {
    loop {
        let mut line = String::new();
        let item = match source.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Ok(line)
            }
            Err(e) => Err(e),
        };

        let failed = item.is_err();
        // The receiver is gone once the agent is dropped.
        if tx.blocking_send(item).is_err() || failed {
            return;
        }
    }
}

#[async_trait]
impl LineReader for StdinReader {
    async fn read_line(&mut self) -> Result<String, InputError> {
        match self.lines.recv().await {
            Some(line) => Ok(line?),
            None => Err(InputError::EndOfInput),
        }
    }
}

/// Display side of the chat. Purely observational.
pub trait OutputSink: Send {
    fn banner(&mut self);

    fn prompt(&mut self);

    fn assistant_text(&mut self, text: &str);

    fn tool_call(&mut self, id: &str, name: &str, input: &Value);

    fn tool_result(&mut self, id: &str, output: &str, is_error: bool);
}

/// Writes the chat to any `Write` handle, stdout by default.
pub struct TerminalOutput<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl TerminalOutput {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> TerminalOutput<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        // Display is best-effort; a closed stdout must not stop the loop.
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!("Failed to write output: {}", e);
        }
    }
}

impl<W: Write + Send> OutputSink for TerminalOutput<W> {
    fn banner(&mut self) {
        self.emit("Chat with the agent (Ctrl-C to quit)\n");
    }

    fn prompt(&mut self) {
        self.emit("> ");
    }

    fn assistant_text(&mut self, text: &str) {
        let rule = "─".repeat(FRAME_WIDTH);
        self.emit(&format!("┌{rule}┐\n{text}\n└{rule}┘\n"));
    }

    fn tool_call(&mut self, id: &str, name: &str, input: &Value) {
        self.emit(&format!("Executing tool {name} ({id}) with {input}\n"));
    }

    fn tool_result(&mut self, id: &str, output: &str, is_error: bool) {
        let label = if is_error { "Tool error" } else { "Tool result" };
        self.emit(&format!("{label} ({id}): {}\n", preview(output, 500)));
    }
}

/// Shorten long tool output for display, on a char boundary.
fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
