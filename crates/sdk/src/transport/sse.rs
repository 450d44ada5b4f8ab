//! Server-sent event decoding and the client's inbound event stream.

use crate::error::{ClientError, ClientResult};
use everything_mcp::protocol::JsonRpcMessage;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Decode every complete event in `buf`, returning the joined `data:` lines
/// of each. Comments and other fields are ignored.
pub fn decode_sse_events(buf: &str) -> Vec<String> {
    let mut decoder = SseDecoder::default();
    let mut out = decoder.push(buf);
    out.extend(decoder.finish());
    out
}

/// Incremental SSE decoder fed with arbitrary chunks of the body.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk; returns the events it completed
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Vec<String> {
        self.pending.extend_from_slice(chunk.as_ref());
        let mut out = Vec::new();

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    out.push(event);
                }
                continue;
            }

            // Ignore comments (keep-alives) and unknown fields
            if line.starts_with(':') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            }
        }

        out
    }

    /// Flush an event left unterminated at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if let Some(data) = String::from_utf8_lossy(&rest).strip_prefix("data:") {
            self.data_lines.push(data.trim_start().to_string());
        }
        self.take_event()
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let event = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(event)
    }
}

/// Messages the server pushes over the session's SSE stream.
///
/// Reading happens on a background task; dropping the stream stops it.
pub struct EventStream {
    receiver: mpsc::Receiver<ClientResult<JsonRpcMessage>>,
    reader: JoinHandle<()>,
}

impl EventStream {
    pub(crate) fn spawn(response: reqwest::Response) -> Self {
        let (event_tx, receiver) = mpsc::channel::<ClientResult<JsonRpcMessage>>(128);

        let reader = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = event_tx.send(Err(ClientError::Http(e))).await;
                        return;
                    }
                };

                for data in decoder.push(&chunk) {
                    let message = JsonRpcMessage::parse(&data).map_err(ClientError::Rpc);
                    if let Err(e) = &message {
                        warn!(error = %e, "Undecodable SSE event");
                    }
                    if event_tx.send(message).await.is_err() {
                        return;
                    }
                }
            }

            debug!("SSE stream ended");
        });

        Self { receiver, reader }
    }

    /// Get the next message; `None` once the server closed the stream.
    pub async fn next_event(&mut self) -> Option<ClientResult<JsonRpcMessage>> {
        self.receiver.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
