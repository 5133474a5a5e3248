//! Export payload of a prepared delivery.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::delivery::Delivery;
use crate::domain::lead::Lead;

#[derive(Debug, Serialize)]
struct PayloadLead<'a> {
    lead_id: &'a str,
    name: &'a str,
    phone: &'a str,
    department: &'a str,
    product: &'a str,
    source: &'a str,
    submitted_at: String,
}

#[derive(Debug, Serialize)]
struct DeliveryPayload<'a> {
    delivery_id: &'a str,
    order_id: &'a str,
    client_id: &'a str,
    entity: &'a str,
    product: &'a str,
    week_key: &'a str,
    leads: Vec<PayloadLead<'a>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedPayload {
    pub json: String,
    pub hash: String,
}

/// Serialises the delivery with its active leads, ordered by lead id.
pub fn build_payload(delivery: &Delivery, leads: &[Lead]) -> Result<PreparedPayload, serde_json::Error> {
    let mut ordered: Vec<&Lead> = leads.iter().collect();
    ordered.sort_by(|left, right| left.id.cmp(&right.id));

    let payload = DeliveryPayload {
        delivery_id: &delivery.id.0,
        order_id: &delivery.order_id.0,
        client_id: &delivery.client_id.0,
        entity: &delivery.entity.0,
        product: &delivery.product,
        week_key: &delivery.week_key.0,
        leads: ordered
            .into_iter()
            .map(|lead| PayloadLead {
                lead_id: &lead.id.0,
                name: &lead.payload.name,
                phone: lead.phone.as_deref().unwrap_or(&lead.payload.phone_raw),
                department: &lead.payload.department,
                product: &lead.payload.product,
                source: &lead.payload.source,
                submitted_at: lead.submitted_at.to_rfc3339(),
            })
            .collect(),
    };

    let json = serde_json::to_string(&payload)?;
    let hash = hash_payload(&json);
    Ok(PreparedPayload { json, hash })
}

pub fn hash_payload(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}
