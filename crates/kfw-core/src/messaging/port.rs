use async_trait::async_trait;

use crate::{
    domain::UserId,
    messaging::types::{MessagingCapabilities, OutgoingMessage},
    Result,
};

/// Outbound messenger port.
///
/// Each call delivers to exactly one recipient; fan-out and failure isolation
/// live in the dispatcher.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send(&self, to: UserId, message: &OutgoingMessage) -> Result<()>;
}
