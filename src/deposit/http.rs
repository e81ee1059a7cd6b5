//! HTTP payment verifier.
//!
//! Posts the claim and a base64 copy of the proof to a verification
//! service and expects `{"match": bool}` back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{DepositClaim, PaymentVerifier, Verdict};
use crate::config::{AppConfig, VerifierConfig};

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    utr: &'a str,
    amount: Decimal,
    proof_base64: String,
    mime_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(rename = "match")]
    matched: bool,
}

pub struct HttpVerifier {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl HttpVerifier {
    pub fn new(endpoint: impl Into<String>, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build verifier HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(cfg: &VerifierConfig) -> Result<Self> {
        let key = AppConfig::resolve_env(&cfg.api_key_env)?;
        Self::new(
            cfg.endpoint.clone(),
            SecretString::new(key),
            Duration::from_secs(cfg.timeout_secs),
        )
    }
}

#[async_trait]
impl PaymentVerifier for HttpVerifier {
    async fn verify(&self, claim: &DepositClaim) -> Result<Verdict> {
        let body = VerifyRequest {
            utr: &claim.utr,
            amount: claim.amount,
            proof_base64: STANDARD.encode(&claim.proof),
            mime_type: &claim.mime_type,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Verifier request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Verifier error {status}: {text}");
        }

        let parsed: VerifyResponse = resp
            .json()
            .await
            .context("Failed to parse verifier response")?;
        debug!(utr = %claim.utr, matched = parsed.matched, "Verifier answered");

        Ok(if parsed.matched {
            Verdict::Match
        } else {
            Verdict::NoMatch
        })
    }
}
