use futures::Stream;

/// Receiving half of an observer's change feed. Items arrive in commit order.
#[derive(Debug)]
pub struct ChangeStream<U> {
    receiver: async_channel::Receiver<U>,
}

impl<U> ChangeStream<U> {
    pub(crate) fn channel() -> (async_channel::Sender<U>, Self) {
        let (sender, receiver) = async_channel::unbounded();
        (sender, Self { receiver })
    }

    /// Waits for the next item; `None` once the observer stopped.
    pub async fn next(&self) -> Option<U> {
        self.receiver.recv().await.ok()
    }

    pub fn try_next(&self) -> Option<U> {
        self.receiver.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn into_stream(self) -> impl Stream<Item = U> {
        self.receiver
    }
}
