use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::delivery::DeliveryId;
use crate::domain::order::{ClientId, OrderId};

/// One transmission attempt of a prepared delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shipment {
    pub delivery_id: DeliveryId,
    pub order_id: OrderId,
    pub client_id: ClientId,
    pub channels: Vec<String>,
    pub payload_json: String,
    pub payload_hash: String,
    pub attempt: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportReceipt {
    /// Channels that acknowledged the shipment.
    pub sent_to: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport timed out after {0}s")]
    Timeout(u64),
    #[error("remote rejected shipment: {0}")]
    Rejected(String),
    #[error("connectivity failure: {0}")]
    Connectivity(String),
    #[error("order has no delivery channel configured")]
    NoChannels,
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn ship(&self, shipment: &Shipment) -> Result<TransportReceipt, TransportError>;
}

/// Accepts every shipment without contacting anyone.
#[derive(Clone, Debug, Default)]
pub struct NoopTransport;

#[async_trait]
impl DeliveryTransport for NoopTransport {
    async fn ship(&self, shipment: &Shipment) -> Result<TransportReceipt, TransportError> {
        if shipment.channels.is_empty() {
            return Err(TransportError::NoChannels);
        }
        Ok(TransportReceipt { sent_to: shipment.channels.clone() })
    }
}

/// Replays scripted results in order, then accepts. Records every shipment.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Vec<Result<TransportReceipt, TransportError>>>,
    shipped: Mutex<Vec<Shipment>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportReceipt, TransportError>>) -> Self {
        let mut script = script;
        script.reverse();
        Self { script: Mutex::new(script), shipped: Mutex::new(Vec::new()) }
    }

    pub fn shipped(&self) -> Vec<Shipment> {
        self.shipped.lock().map(|shipped| shipped.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn ship(&self, shipment: &Shipment) -> Result<TransportReceipt, TransportError> {
        if let Ok(mut shipped) = self.shipped.lock() {
            shipped.push(shipment.clone());
        }
        let next = self.script.lock().ok().and_then(|mut script| script.pop());
        next.unwrap_or_else(|| Ok(TransportReceipt { sent_to: shipment.channels.clone() }))
    }
}
