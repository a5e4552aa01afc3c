//! Stream-multiplexing client: many concurrent token streams over one
//! text connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use weave_core::{GenerationParams, Result, TokenEvent, WeaveError};

use crate::frame::{self, Prompt};

/// Buffered events per stream. A stream whose consumer falls this far behind
/// is closed rather than allowed to stall the others.
pub const STREAM_CAPACITY: usize = 256;

type Streams = Arc<Mutex<HashMap<u64, mpsc::Sender<TokenEvent>>>>;

pub struct StreamClient {
    model: String,
    outbound: mpsc::Sender<String>,
    streams: Streams,
    next_stream_id: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl StreamClient {
    /// Starts demultiplexing `inbound` frames. Must be called from within a
    /// tokio runtime.
    pub fn connect(
        model: impl Into<String>,
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
    ) -> Self {
        let streams: Streams = Arc::default();
        let dispatcher = tokio::spawn(dispatch(inbound, streams.clone()));
        Self {
            model: model.into(),
            outbound,
            streams,
            next_stream_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        lock(&self.streams).len()
    }

    /// Requests a completion of `prompt`. The returned receiver yields events
    /// until one carries a finish reason.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<TokenEvent>> {
        let stream_id = self.allocate();
        let request = frame::encode_generate(&self.model, stream_id, prompt, params)?;
        self.open(stream_id, request).await
    }

    /// Requests scores of `scored` as a continuation of `prompt`.
    pub async fn score(
        &self,
        prompt: &Prompt,
        scored: &Prompt,
        params: &GenerationParams,
    ) -> Result<mpsc::Receiver<TokenEvent>> {
        let stream_id = self.allocate();
        let request = frame::encode_score(&self.model, stream_id, prompt, scored, params)?;
        self.open(stream_id, request).await
    }

    fn allocate(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn open(&self, stream_id: u64, request: String) -> Result<mpsc::Receiver<TokenEvent>> {
        // Register before sending so no reply can arrive unrouted.
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        lock(&self.streams).insert(stream_id, tx);

        if self.outbound.send(request).await.is_err() {
            lock(&self.streams).remove(&stream_id);
            return Err(WeaveError::Transport("connection closed".into()));
        }
        debug!(stream_id, model = %self.model, "opened stream");
        Ok(rx)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

fn lock(streams: &Streams) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<TokenEvent>>> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn dispatch(mut inbound: mpsc::Receiver<String>, streams: Streams) {
    while let Some(message) = inbound.recv().await {
        let (command, payload) = match frame::split(&message) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "skipping malformed frame");
                continue;
            }
        };
        match command {
            frame::TOKEN => match frame::decode_tokens(payload) {
                Ok(events) => {
                    for event in events {
                        deliver(&streams, event);
                    }
                }
                Err(e) => warn!(error = %e, "skipping undecodable TOKEN frame"),
            },
            other => warn!(command = other, "unknown command"),
        }
    }

    // Dropping the senders ends every open stream.
    lock(&streams).clear();
    debug!("transport connection closed");
}

fn deliver(streams: &Streams, event: TokenEvent) {
    let stream_id = event.stream_id;
    let sender = {
        let mut streams = lock(streams);
        if event.is_terminal() {
            streams.remove(&stream_id)
        } else {
            streams.get(&stream_id).cloned()
        }
    };

    let Some(sender) = sender else {
        debug!(stream_id, "event for unknown stream");
        return;
    };
    match sender.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                stream_id,
                capacity = STREAM_CAPACITY,
                "stream consumer overrun, closing stream"
            );
            lock(streams).remove(&stream_id);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(stream_id, "stream receiver dropped");
            lock(streams).remove(&stream_id);
        }
    }
}
