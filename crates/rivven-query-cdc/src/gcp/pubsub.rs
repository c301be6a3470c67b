//! Pub/Sub publisher
//!
//! Resolves `projects/<project>/topics/<topic>` into a publisher bound to
//! the topic. Each publish awaits the server-assigned message id before
//! returning.

use async_trait::async_trait;
use gcloud_googleapis::pubsub::v1::PubsubMessage;
use gcloud_pubsub::client::google_cloud_auth::credentials::CredentialsFile;
use gcloud_pubsub::client::{Client as PubSubClient, ClientConfig};
use gcloud_pubsub::publisher::Publisher;
use tracing::{debug, info};

use crate::config::GcpConfig;
use crate::error::{PipelineError, Result};
use crate::publisher::{Broker, DeliveryId, TopicHandle};
use crate::request::TopicLocator;

/// Broker backed by Google Cloud Pub/Sub
#[derive(Debug, Clone, Default)]
pub struct PubSubBroker {
    config: GcpConfig,
}

impl PubSubBroker {
    pub fn new(config: GcpConfig) -> Self {
        Self { config }
    }

    async fn build_client(&self, project_id: &str) -> Result<PubSubClient> {
        let client_config = ClientConfig {
            project_id: Some(project_id.to_string()),
            ..Default::default()
        };

        let client_config = if let Some(host) = GcpConfig::pubsub_emulator_host() {
            info!(emulator = %host, "Using Pub/Sub emulator");
            client_config
        } else if let Some(ref path) = self.config.credentials_file {
            let creds = CredentialsFile::new_from_file(path.display().to_string())
                .await
                .map_err(|e| {
                    PipelineError::broker_connect(
                        "pubsub.connect",
                        format!("failed to load credentials: {}", e),
                    )
                })?;
            client_config.with_credentials(creds).await.map_err(|e| {
                PipelineError::broker_connect(
                    "pubsub.connect",
                    format!("failed to configure auth: {}", e),
                )
            })?
        } else {
            client_config.with_auth().await.map_err(|e| {
                PipelineError::broker_connect("pubsub.connect", format!("failed to get ADC: {}", e))
            })?
        };

        PubSubClient::new(client_config)
            .await
            .map_err(|e| PipelineError::broker_connect("pubsub.connect", e))
    }
}

#[async_trait]
impl Broker for PubSubBroker {
    async fn resolve(&self, topic: &TopicLocator) -> Result<Box<dyn TopicHandle>> {
        let client = self.build_client(topic.project_id()).await?;
        let publisher = client.topic(topic.topic_name()).new_publisher(None);

        debug!(topic = %topic, "Bound Pub/Sub publisher");
        Ok(Box::new(PubSubTopic {
            publisher,
            topic: topic.to_string(),
        }))
    }
}

struct PubSubTopic {
    publisher: Publisher,
    topic: String,
}

#[async_trait]
impl TopicHandle for PubSubTopic {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<DeliveryId> {
        let awaiter = self
            .publisher
            .publish(PubsubMessage {
                data: payload,
                ..Default::default()
            })
            .await;

        awaiter
            .get()
            .await
            .map_err(|e| PipelineError::publish("publish", e))
    }

    async fn shutdown(self: Box<Self>) {
        let topic = self.topic;
        let mut publisher = self.publisher;
        publisher.shutdown().await;
        debug!(topic = %topic, "Pub/Sub publisher shut down");
    }
}
