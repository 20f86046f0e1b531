use std::time::Duration;

use anyhow::{Context, anyhow};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::{sync::mpsc, time::sleep};
use tracing::{error, info, warn};

use crate::flow::FlowEvent;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: FlowEvent,
}

/// Operator-configured endpoint that receives signed flow events.
#[derive(Clone, Debug)]
pub struct WebhookTarget {
    pub endpoint: String,
    pub secret: String,
    pub max_retries: u32,
}

/// Drains the manager's event sink; each event is delivered on its own task so
/// a slow endpoint never delays the next event.
pub fn start_webhook_worker(
    target: WebhookTarget,
    client: Client,
    mut events: mpsc::UnboundedReceiver<FlowEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let target = target.clone();
            let client = client.clone();
            tokio::spawn(async move {
                let event_id = event.event_id.clone();
                if let Err(err) = deliver_with_retries(&target, &client, event).await {
                    error!(event_id = %event_id, error = %err, "flow webhook delivery failed");
                }
            });
        }
        info!("flow event sink closed; webhook worker stopping");
    });
}

async fn deliver_with_retries(
    target: &WebhookTarget,
    client: &Client,
    event: FlowEvent,
) -> anyhow::Result<()> {
    let event_id = event.event_id.clone();
    let payload =
        serde_json::to_string(&WebhookEnvelope { event }).context("serialize webhook envelope")?;
    let signature = sign_payload(&target.secret, &payload)?;

    let mut attempt = 0_u32;
    loop {
        let response = client
            .post(&target.endpoint)
            .header("content-type", "application/json")
            .header("x-flow-event-id", event_id.clone())
            .header("x-flow-signature", signature.clone())
            .body(payload.clone())
            .send()
            .await;

        let error_message = match response {
            Ok(resp) if resp.status().is_success() => {
                info!(event_id = %event_id, attempt, "flow webhook delivered");
                return Ok(());
            }
            Ok(resp) => format!("http status {}", resp.status()),
            Err(err) => err.to_string(),
        };

        attempt += 1;
        if attempt >= target.max_retries {
            return Err(anyhow!(
                "webhook retries exhausted after {attempt} attempts: {error_message}"
            ));
        }

        warn!(event_id = %event_id, attempt, error = %error_message, "flow webhook delivery will retry");
        sleep(backoff(attempt)).await;
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt.min(10)))
}

pub fn sign_payload(secret: &str, payload: &str) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("hmac init failed: {e}"))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();
    Ok(format!("v1={}", hex::encode(signature)))
}
