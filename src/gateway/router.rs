use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::bot::{Bot, PendingGuard};
use crate::gateway::{Event, Reply};
use crate::Result;

type Lane = mpsc::UnboundedSender<(Event, PendingGuard)>;

/// Feeds newline-delimited JSON events to the [`Bot`] and writes its replies back.
///
/// Events are handled on one task per channel. A channel sees its events in
/// arrival order, while different channels (and guilds) run concurrently.
pub struct Router {
    bot: Arc<Bot>,
}

/// Events from one channel share a lane; `Ready` uses `None`.
fn lane_key(event: &Event) -> Option<u64> {
    match event {
        Event::Message(message) => Some(message.channel_id),
        Event::Ready { .. } => None,
    }
}

impl Router {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot }
    }

    /// Processes events from `reader` until it reaches end of input and every
    /// accepted event has been answered.
    ///
    /// An event counts toward [`Bot::wait`] from the moment its line is read,
    /// and keeps running to completion even if this future is dropped. Lines
    /// that are not valid events are logged and skipped.
    pub async fn handle_stream<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (reply_tx, mut replies) = mpsc::unbounded_channel::<Reply>();
        let mut reply_tx = Some(reply_tx);
        let mut lanes: HashMap<Option<u64>, Lane> = HashMap::new();
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                line = lines.next_line(), if reply_tx.is_some() => {
                    let line = match line? {
                        Some(line) => line,
                        None => {
                            // Closing the lanes lets each worker drain and exit.
                            lanes.clear();
                            reply_tx = None;
                            continue;
                        }
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let event: Event = match serde_json::from_str(line) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Skipping malformed event: {}", e);
                            continue;
                        }
                    };
                    if let Some(tx) = &reply_tx {
                        self.dispatch(&mut lanes, tx, event);
                    }
                }
                Some(reply) = replies.recv() => {
                    let mut out = serde_json::to_string(&reply)?;
                    out.push('\n');
                    writer.write_all(out.as_bytes()).await?;
                    writer.flush().await?;
                }
                else => break,
            }
        }
        Ok(())
    }

    fn dispatch(&self, lanes: &mut HashMap<Option<u64>, Lane>, replies: &mpsc::UnboundedSender<Reply>, event: Event) {
        let pending = self.bot.track();
        let key = lane_key(&event);
        let lane = lanes
            .entry(key)
            .or_insert_with(|| self.spawn_lane(key, replies.clone()));

        if let Err(mpsc::error::SendError(item)) = lane.send((event, pending)) {
            // The worker is gone (it panicked); start a fresh one.
            warn!("Lane {:?} stopped, restarting it", key);
            let fresh = self.spawn_lane(key, replies.clone());
            let _ = fresh.send(item);
            lanes.insert(key, fresh);
        }
    }

    fn spawn_lane(&self, key: Option<u64>, replies: mpsc::UnboundedSender<Reply>) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Event, PendingGuard)>();
        let bot = self.bot.clone();
        tokio::spawn(async move {
            debug!("Lane {:?} started", key);
            while let Some((event, _pending)) = rx.recv().await {
                for reply in bot.handle(event).await {
                    // The stream may already be gone; the work itself is done.
                    let _ = replies.send(reply);
                }
            }
            debug!("Lane {:?} drained", key);
        });
        tx
    }
}
