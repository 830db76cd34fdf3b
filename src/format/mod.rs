//! Encoders for script results.
//!
//! All three formats consume the same `SqlStatementResponse` sequence the
//! executor produces; none of them re-run anything.

pub mod binary;
pub mod json;
pub mod text;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::db::query::SqlScriptResponse;
use crate::error::Result;

/// Chunks buffered between the running script and a slow reader.
const STREAM_BUFFER: usize = 16;

/// What `Session::execute` hands back, by response format.
#[derive(Debug)]
pub enum ScriptOutput {
    Json(SqlScriptResponse),
    Text(String),
    Binary(ScriptByteStream),
}

impl ScriptOutput {
    /// Writes the output as the CLI prints it.
    pub async fn write_to<W>(self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            ScriptOutput::Json(response) => {
                let mut encoded = serde_json::to_vec_pretty(&response)?;
                encoded.push(b'\n');
                writer.write_all(&encoded).await?;
            }
            ScriptOutput::Text(transcript) => writer.write_all(transcript.as_bytes()).await?,
            ScriptOutput::Binary(mut stream) => {
                stream.copy_to(writer).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}

/// NDJSON chunks of a running script, one per statement, in order.
///
/// Nothing is accumulated: each chunk is produced when its statement finishes
/// and handed to the reader as soon as there is room in the channel. Dropping
/// the stream stops the run after the current statement.
#[derive(Debug)]
pub struct ScriptByteStream {
    receiver: mpsc::Receiver<Bytes>,
}

impl ScriptByteStream {
    pub(crate) fn channel() -> (mpsc::Sender<Bytes>, Self) {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        (sender, Self { receiver })
    }

    /// The next chunk, or `None` once the script has finished.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Copies every remaining chunk to `writer`; returns the bytes written.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next_chunk().await {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Drains the stream into memory. Meant for tests and small scripts.
    pub async fn collect(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}
