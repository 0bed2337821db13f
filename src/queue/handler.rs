//! Message handlers invoked by consumer loops

use super::message::{Message, MessageContext};
use async_trait::async_trait;
use std::future::Future;

/// Processes one message. An `Err` rejects the message with
/// `PROCESSING_FAILED`; `Ok` acknowledges it when the consumer auto-acks.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, context: MessageContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message, context: MessageContext) -> anyhow::Result<()> {
        (self)(message, context).await
    }
}
