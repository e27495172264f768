use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;

/// Captured bytes of one output stream, capped at `limit`.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    dropped: usize,
}

pub type SharedBuffer = Arc<Mutex<OutputBuffer>>;

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn shared(limit: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(limit)))
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        let take = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..take]);
        self.dropped += chunk.len() - take;
    }

    /// Lossy UTF-8 text with trailing newlines trimmed.
    pub fn text(&self) -> String {
        let raw = String::from_utf8_lossy(&self.bytes);
        let trimmed = raw.trim_end_matches(|c| c == '\n' || c == '\r');
        if self.dropped > 0 {
            format!("{trimmed}\n[output truncated: {} bytes dropped]", self.dropped)
        } else {
            trimmed.to_string()
        }
    }
}

/// Copy `reader` into `buffer` until EOF or a read error.
pub(crate) fn spawn_reader<R>(mut reader: R, buffer: SharedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.lock().push(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "output reader stopped");
                    break;
                }
            }
        }
    })
}

/// Wait for readers to hit EOF, at most `grace`. Stragglers are aborted;
/// a grandchild holding the pipe open must not stall the caller.
pub(crate) async fn drain_readers(readers: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(grace, futures::future::join_all(readers))
        .await
        .is_err()
    {
        debug!("output pipes still open after exit, keeping partial output");
        for abort in aborts {
            abort.abort();
        }
    }
}
