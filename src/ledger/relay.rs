//! HTTP 中继客户端
//!
//! 中继服务持有签名密钥并负责真正上链；本客户端只发送 LedgerCall、取回 digest、轮询状态。
//! - `POST {relay_url}/v1/execute`，body 为 LedgerCall（`then` 中的调用在同一交易内执行），返回 `{digest, status, error}`
//! - `GET {relay_url}/v1/transactions/{digest}`，返回 `{status, error}`，404 视为尚未落链
//!
//! HTTP 状态映射到 SubmitErrorKind，供 RetryController 分类。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::ledger::{
    Confirmation, LedgerCall, SubmissionClient, SubmitError, SubmitErrorKind, TxReference,
};

pub struct RelayClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    digest: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, SubmitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("ledger-batcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SubmitError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> SubmitError {
    if e.is_timeout() {
        SubmitError::timeout(e.to_string())
    } else {
        SubmitError::network(e.to_string())
    }
}

/// 非 2xx 响应的分类
fn map_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> SubmitError {
    let message = format!("relay returned {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => SubmitError::rate_limited(message, retry_after),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SubmitError::new(SubmitErrorKind::Unauthorized, message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SubmitError::timeout(message),
        s if s.is_server_error() => SubmitError::network(message),
        _ => SubmitError::new(SubmitErrorKind::InvalidArguments, message),
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl SubmissionClient for RelayClient {
    async fn submit(&self, call: &LedgerCall) -> Result<TxReference, SubmitError> {
        let url = format!("{}/v1/execute", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(call)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let hint = retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, hint, body));
        }

        let body: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| SubmitError::network(format!("invalid relay response: {e}")))?;
        if body.status.as_deref() == Some("failure") {
            return Err(SubmitError::execution_failed(format!(
                "transaction {} failed: {}",
                body.digest,
                body.error.unwrap_or_default()
            )));
        }
        Ok(TxReference(body.digest))
    }

    async fn confirm(&self, reference: &TxReference) -> Result<Confirmation, SubmitError> {
        let url = format!("{}/v1/transactions/{}", self.base_url, reference);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Confirmation::Pending);
        }
        if !status.is_success() {
            let hint = retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, hint, body));
        }

        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| SubmitError::network(format!("invalid relay response: {e}")))?;
        Ok(match body.status.as_str() {
            "success" => Confirmation::Committed,
            "failure" => Confirmation::Failed(body.error.unwrap_or_else(|| "unknown".into())),
            _ => Confirmation::Pending,
        })
    }
}
