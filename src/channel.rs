//! Zero-buffer hand-off between pipeline stages.
//!
//! A send completes only once the receiving stage has taken the item, so a
//! slow sink throttles every stage upstream of it without any queue growing.

use crate::error::PipelineError;

pub struct StageSender<T> {
    name: &'static str,
    inner: flume::Sender<T>,
}

pub struct StageReceiver<T> {
    inner: flume::Receiver<T>,
}

pub fn rendezvous<T>(name: &'static str) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = flume::bounded(0);
    (StageSender { name, inner: tx }, StageReceiver { inner: rx })
}

impl<T> StageSender<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the receiver to take `item`. Fails once the receiving end
    /// has been dropped.
    pub async fn send(&self, item: T) -> Result<(), PipelineError> {
        self.inner
            .send_async(item)
            .await
            .map_err(|_| PipelineError::ChannelClosed { channel: self.name })
    }
}

impl<T> StageReceiver<T> {
    /// `None` once the sending stage has finished.
    pub async fn recv(&self) -> Option<T> {
        self.inner.recv_async().await.ok()
    }
}
