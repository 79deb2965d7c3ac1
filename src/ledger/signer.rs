//! Payment signing collaborators.
//!
//! The venue never signs locally. Either the node signs (the secret rides
//! along with `tx_json` in the submit command) or an external signing
//! service hands back a `tx_blob`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::{PaymentTx, SignedPayment};

/// Turns an unsigned payment into something `submit` accepts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    async fn sign(&self, tx: &PaymentTx) -> Result<SignedPayment>;
}

// ---------------------------------------------------------------------------
// Node signing
// ---------------------------------------------------------------------------

/// Delegates signing to the ledger node by attaching the venue secret.
pub struct NodeSigner {
    secret: SecretString,
}

impl NodeSigner {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl PaymentSigner for NodeSigner {
    async fn sign(&self, tx: &PaymentTx) -> Result<SignedPayment> {
        Ok(SignedPayment::WithSecret {
            tx_json: tx.clone(),
            secret: self.secret.expose_secret().clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Remote signing
// ---------------------------------------------------------------------------

const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    trace: String,
    tx_json: &'a PaymentTx,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    tx_blob: String,
}

/// Posts `{trace, tx_json}` to an external signer, expects `{tx_blob}`.
pub struct RemoteSigner {
    http: Client,
    url: String,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .context("Failed to build signer HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PaymentSigner for RemoteSigner {
    async fn sign(&self, tx: &PaymentTx) -> Result<SignedPayment> {
        let trace = Uuid::new_v4().to_string();
        let request = SignRequest {
            trace: trace.clone(),
            tx_json: tx,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Signer unreachable at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%trace, %status, "Signer rejected payment");
            anyhow::bail!("Signer returned {status}: {body}");
        }

        let signed: SignResponse = response
            .json()
            .await
            .context("Signer returned an unreadable body")?;
        if signed.tx_blob.is_empty() {
            anyhow::bail!("Signer returned an empty tx_blob");
        }

        debug!(%trace, destination = %tx.destination, drops = tx.drops(), "Payment signed remotely");
        Ok(SignedPayment::Blob {
            tx_blob: signed.tx_blob,
        })
    }
}
