//! Topic publishing seam
//!
//! A [`Broker`] resolves a topic locator into a [`TopicHandle`]. Each
//! publish waits for the broker's acknowledgment before returning, so at
//! most one message is in flight per run.

use async_trait::async_trait;

use crate::error::Result;
use crate::request::TopicLocator;

/// Identifier the broker assigns to an acknowledged message
pub type DeliveryId = String;

/// A message broker reachable by topic locator
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect to the locator's project and bind a handle to its topic.
    ///
    /// Failure is `BrokerConnectFailed`.
    async fn resolve(&self, topic: &TopicLocator) -> Result<Box<dyn TopicHandle>>;
}

/// Publishing handle bound to one topic
#[async_trait]
pub trait TopicHandle: Send {
    /// Publish one message and wait for its acknowledgment.
    ///
    /// Failure is `PublishFailed`; nothing is retried.
    async fn publish(&mut self, payload: Vec<u8>) -> Result<DeliveryId>;

    /// Flush and release the connection.
    async fn shutdown(self: Box<Self>);
}
