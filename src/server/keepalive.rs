//! Idle keep-alive pings for an open event stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::writer::FrameWriter;

/// Default interval between keep-alive checks.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Background task writing `: ping` when the stream has been idle for a
/// whole interval. Stops on [`cancel`](Self::cancel), on drop, or when the
/// writer rejects a ping.
pub struct KeepAlive {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn spawn(writer: Arc<FrameWriter>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if writer.take_activity() {
                            continue;
                        }
                        if !writer.write_ping().await {
                            break;
                        }
                        tracing::trace!("keep-alive ping");
                    }
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for it to exit.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
