//! In-process dispatch sink for demos and tests.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dispatch::{DispatchCommand, DispatchSink};
use crate::error::DispatchError;

/// Records every published command; optionally rejects all of them to
/// exercise the publish-failure path.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<DispatchCommand>>,
    reject: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every publish fails with [`DispatchError::Rejected`].
    pub fn rejecting() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    /// Drains and returns everything published so far.
    pub async fn take(&self) -> Vec<DispatchCommand> {
        std::mem::take(&mut *self.published.lock().await)
    }

    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn publish(&self, command: &DispatchCommand) -> Result<(), DispatchError> {
        if self.reject {
            return Err(DispatchError::Rejected {
                device: command.device.clone(),
                reason: "simulated rejection".to_string(),
            });
        }
        self.published.lock().await.push(command.clone());
        Ok(())
    }
}
