//! Coordinator/worker message protocol
//!
//! One JSON object per line. Commands travel over the worker's stdin,
//! events over its stdout. Code under test writes to that same stdout, so
//! the coordinator reads frames and passes anything that is not an event
//! through as plain output.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::RunConfig;
use crate::error::{GroveError, TestError};
use crate::models::GroupResult;

/// Coordinator to worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Run {
        test_files: Vec<String>,
        config: RunConfig,
    },
    Terminate,
    Preload {
        module_path: String,
    },
}

/// Worker to coordinator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Ready { pid: u32 },
    FileResult { file: String, result: GroupResult },
    FileSkipped { file: String },
    FileError { file: String, error: TestError },
}

impl Event {
    pub fn file(&self) -> Option<&str> {
        match self {
            Event::Ready { .. } => None,
            Event::FileResult { file, .. }
            | Event::FileSkipped { file }
            | Event::FileError { file, .. } => Some(file),
        }
    }
}

/// Write one message followed by a newline and flush
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), GroveError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. `Ok(None)` on end of stream; blank lines are skipped.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, GroveError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| GroveError::Protocol(format!("bad message {trimmed:?}: {e}")));
    }
}

/// One line of a worker's stdout
#[derive(Debug)]
pub enum Frame<T> {
    Message(T),
    /// Output that is not a protocol message, newline stripped
    Stray(String),
}

/// Read the next frame. `Ok(None)` on end of stream; blank lines are
/// skipped. Invalid UTF-8 is replaced rather than rejected.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<Frame<T>>, GroveError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut bytes = Vec::new();
    loop {
        bytes.clear();
        if reader.read_until(b'\n', &mut bytes).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&bytes);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(match serde_json::from_str(line.trim()) {
            Ok(message) => Frame::Message(message),
            Err(_) => Frame::Stray(line.to_string()),
        }));
    }
}
