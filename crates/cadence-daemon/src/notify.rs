//! Outgoing webhook notification for finished runs.

use cadence_core::config::NotifyConfig;
use cadence_scheduler::{RunOutcome, RunReport};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::{DaemonError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` of the request body when a secret is set.
pub const SIGNATURE_HEADER: &str = "X-Cadence-Signature-256";

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    on_success: bool,
}

impl WebhookNotifier {
    /// `None` when no webhook URL is configured.
    pub fn from_config(cfg: &NotifyConfig) -> Option<Self> {
        let url = cfg.webhook_url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            url,
            secret: cfg.secret.clone(),
            on_success: cfg.on_success,
        })
    }

    /// Failures always notify; successes only when opted in.
    pub fn should_notify(&self, outcome: &RunOutcome) -> bool {
        match outcome {
            RunOutcome::Failed { .. } => true,
            RunOutcome::Succeeded { .. } => self.on_success,
            RunOutcome::Skipped => false,
        }
    }

    pub async fn notify(&self, report: &RunReport) -> Result<()> {
        if !self.should_notify(&report.outcome) {
            debug!(outcome = %report.outcome, "notification not required");
            return Ok(());
        }

        let body = serde_json::to_vec(&payload(report))?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let resp = request.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DaemonError::WebhookStatus(status.as_u16()));
        }
        info!(url = %self.url, status = status.as_u16(), "run notification delivered");
        Ok(())
    }
}

/// JSON body sent for a finished run.
pub fn payload(report: &RunReport) -> Value {
    let (event, attempts, error) = match &report.outcome {
        RunOutcome::Succeeded { attempts } => ("run.succeeded", *attempts, None),
        RunOutcome::Failed {
            attempts,
            last_error,
        } => ("run.failed", *attempts, Some(last_error.clone())),
        RunOutcome::Skipped => ("run.skipped", 0, None),
    };
    json!({
        "event":       event,
        "trigger":     report.trigger,
        "attempts":    attempts,
        "error":       error,
        "started_at":  report.started_at.to_rfc3339(),
        "finished_at": report.finished_at.to_rfc3339(),
    })
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DaemonError::Signing("invalid HMAC key length".into()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
