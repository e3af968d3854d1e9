//! Outbound side of the shared connection as seen by the session

use async_trait::async_trait;

use mura_core::{MuraResult, Request};
use mura_deriv::DerivConnection;

/// Anything that can put a request on the wire
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn send(&self, request: Request) -> MuraResult<()>;
}

#[async_trait]
impl RequestSink for DerivConnection {
    async fn send(&self, request: Request) -> MuraResult<()> {
        DerivConnection::send(self, &request).await
    }
}

/// Records every request instead of sending it
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: parking_lot::Mutex<Vec<Request>>,
}

#[cfg(test)]
impl RecordingSink {
    /// Take everything sent so far
    pub(crate) fn drain(&self) -> Vec<Request> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[cfg(test)]
#[async_trait]
impl RequestSink for RecordingSink {
    async fn send(&self, request: Request) -> MuraResult<()> {
        self.sent.lock().push(request);
        Ok(())
    }
}
