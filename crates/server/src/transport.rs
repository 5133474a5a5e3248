//! HTTP webhook delivery of prepared payloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use leadflow_core::config::{DeliveryConfig, TransportConfig};
use leadflow_core::transport::{DeliveryTransport, Shipment, TransportError, TransportReceipt};

/// POSTs the payload JSON to every channel of the order.
///
/// A shipment succeeds when at least one channel answers with a 2xx status;
/// `sent_to` lists only the channels that did.
pub struct WebhookTransport {
    client: Client,
    token: Option<SecretString>,
}

impl WebhookTransport {
    pub fn from_config(transport: &TransportConfig, delivery: &DeliveryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(transport.user_agent.clone())
            .timeout(Duration::from_secs(delivery.transport_timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, token: transport.webhook_token.clone() })
    }

    async fn post(&self, channel: &str, shipment: &Shipment) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(channel)
            .header(CONTENT_TYPE, "application/json")
            .header("x-leadflow-delivery", shipment.delivery_id.0.as_str())
            .header("x-leadflow-payload-hash", shipment.payload_hash.as_str())
            .header("x-leadflow-attempt", shipment.attempt.to_string())
            .body(shipment.payload_json.clone());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Connectivity(format!("{channel}: request timed out"))
            } else {
                TransportError::Connectivity(format!("{channel}: {error}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(format!("{channel}: HTTP {}", status.as_u16())))
        }
    }
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    async fn ship(&self, shipment: &Shipment) -> Result<TransportReceipt, TransportError> {
        if shipment.channels.is_empty() {
            return Err(TransportError::NoChannels);
        }

        let mut sent_to = Vec::new();
        let mut last_error = None;
        for channel in &shipment.channels {
            match self.post(channel, shipment).await {
                Ok(()) => sent_to.push(channel.clone()),
                Err(error) => {
                    warn!(
                        event_name = "transport.webhook.channel_failed",
                        delivery_id = %shipment.delivery_id.0,
                        attempt = shipment.attempt,
                        error = %error,
                        "webhook channel did not accept the delivery"
                    );
                    last_error = Some(error);
                }
            }
        }

        match (sent_to.is_empty(), last_error) {
            (false, _) => Ok(TransportReceipt { sent_to }),
            (true, Some(error)) => Err(error),
            (true, None) => Err(TransportError::NoChannels),
        }
    }
}
