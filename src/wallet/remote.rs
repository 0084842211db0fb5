//! HTTP wallet backend

use super::model::{NewTransaction, Transaction, User};
use super::WalletBackend;
use crate::error::{PayError, PayResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct PassphraseBody<'a> {
    passphrase: &'a str,
}

#[derive(Deserialize)]
struct ValidateReply {
    valid: bool,
}

#[derive(Serialize)]
struct BalanceBody {
    #[serde(with = "rust_decimal::serde::float")]
    balance: Decimal,
}

#[derive(Deserialize, Default)]
struct ErrorReply {
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
struct HealthReply {
    status: String,
}

/// Wallet served by the demo REST API
pub struct RemoteWallet {
    client: Client,
    base_url: String,
}

impl RemoteWallet {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// True when the API answers its health check
    pub async fn health_check(&self) -> bool {
        match self.client.get(self.url("health")).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<HealthReply>()
                .await
                .map(|h| h.status == "OK")
                .unwrap_or(false),
            Ok(resp) => {
                debug!("Wallet health check returned {}", resp.status());
                false
            }
            Err(e) => {
                debug!("Wallet health check failed: {}", e);
                false
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> PayResult<Response> {
        match request.send().await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_connect() || e.is_timeout() => {
                warn!("⚠️ Wallet API unreachable during {}: {}", what, e);
                Err(PayError::Transport(format!(
                    "could not reach wallet API at {}: {}",
                    self.base_url, e
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a non-success reply to the matching error
async fn check(resp: Response, subject: &str, requested: Option<Decimal>) -> PayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body: ErrorReply = resp.json().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(PayError::UserNotFound(subject.to_string())),
        StatusCode::BAD_REQUEST if body.error.contains("Insufficient balance") => {
            Err(PayError::InsufficientBalance {
                // The API does not report the available balance
                available: Decimal::ZERO,
                requested: requested.unwrap_or_default(),
            })
        }
        StatusCode::BAD_REQUEST => Err(PayError::InvalidAmount(body.error)),
        _ => Err(PayError::Transport(format!(
            "wallet API returned {}: {}",
            status, body.error
        ))),
    }
}

#[async_trait]
impl WalletBackend for RemoteWallet {
    async fn get_user(&self, name: &str) -> PayResult<User> {
        let url = self.url(&format!("users/{}", urlencoding::encode(name)));
        let resp = self.send(self.client.get(url), "get_user").await?;
        Ok(check(resp, name, None).await?.json().await?)
    }

    async fn validate_passphrase(&self, name: &str, passphrase: &str) -> PayResult<bool> {
        let url = self.url(&format!("users/{}/validate", urlencoding::encode(name)));
        let request = self.client.post(url).json(&PassphraseBody { passphrase });
        let resp = self.send(request, "validate_passphrase").await?;
        let reply: ValidateReply = check(resp, name, None).await?.json().await?;
        Ok(reply.valid)
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> PayResult<Vec<Transaction>> {
        let url = self.url(&format!("transactions/{}", urlencoding::encode(user_id)));
        let request = self
            .client
            .get(url)
            .query(&[("limit", limit), ("offset", offset)]);
        let resp = self.send(request, "list_transactions").await?;
        Ok(check(resp, user_id, None).await?.json().await?)
    }

    async fn append_transaction(&self, tx: NewTransaction) -> PayResult<Transaction> {
        let request = self.client.post(self.url("transactions")).json(&tx);
        let resp = self.send(request, "append_transaction").await?;
        let recorded: Transaction = check(resp, &tx.user_id, Some(tx.amount))
            .await?
            .json()
            .await?;
        debug!("Remote wallet recorded {}", recorded.id);
        Ok(recorded)
    }

    async fn set_balance(&self, name: &str, balance: Decimal) -> PayResult<User> {
        let url = self.url(&format!("users/{}/balance", urlencoding::encode(name)));
        let request = self.client.put(url).json(&BalanceBody { balance });
        let resp = self.send(request, "set_balance").await?;
        Ok(check(resp, name, None).await?.json().await?)
    }

    fn name(&self) -> &str {
        "remote"
    }
}
