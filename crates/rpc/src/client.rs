//! HTTP client for the master banker
//!
//! A pooled hyper client behind the `BankerClient` trait; slaves and
//! controllers use this to talk to a remote master. Timeouts and
//! transport failures surface as retryable errors - the sync protocol's
//! idempotence makes retrying with the same payload safe.

use adbank_banker::{BankerClient, ClientError};
use adbank_core::{AccountKey, Amount};
use adbank_ledger::{Account, AccountSummary, AccountType, SpendReport};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::dto::{
    BalanceRequest, BudgetMode, BudgetRequest, CreateAccountRequest, ErrorResponse,
    TransferRequest,
};

pub struct HttpBankerClient {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    timeout: Duration,
}

impl HttpBankerClient {
    /// `base_url` like `http://127.0.0.1:9985`, no trailing slash
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(5))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, ClientError> {
        let payload = match body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|e| ClientError::Transport(e.to_string()))?,
            None => Vec::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();

        if status.is_success() {
            return serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::Transport(format!("bad response body: {e}")));
        }

        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(err) => Err(ClientError::Rejected {
                kind: err.error,
                message: err.message,
            }),
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => Err(ClientError::Transport(
                "master unavailable".to_string(),
            )),
            Err(_) => Err(ClientError::Transport(format!(
                "unexpected status {status}"
            ))),
        }
    }

    fn account_path(key: &AccountKey, suffix: &str) -> String {
        format!("/v1/accounts/{key}{suffix}")
    }
}

#[async_trait]
impl BankerClient for HttpBankerClient {
    async fn create_account(
        &self,
        key: &AccountKey,
        account_type: AccountType,
    ) -> Result<Account, ClientError> {
        let body = CreateAccountRequest {
            key: key.clone(),
            account_type,
        };
        self.request(Method::POST, "/v1/accounts", Some(&body)).await
    }

    async fn account(&self, key: &AccountKey) -> Result<Account, ClientError> {
        self.request::<Account>(Method::GET, &Self::account_path(key, ""), None::<&()>)
            .await
    }

    async fn subtree(
        &self,
        key: &AccountKey,
    ) -> Result<BTreeMap<AccountKey, Account>, ClientError> {
        self.request(Method::GET, &Self::account_path(key, "/subtree"), None::<&()>)
            .await
    }

    async fn set_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError> {
        let body = BudgetRequest {
            amount: amount.clone(),
            mode: BudgetMode::Set,
        };
        self.request(Method::POST, &Self::account_path(key, "/budget"), Some(&body))
            .await
    }

    async fn add_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError> {
        let body = BudgetRequest {
            amount: amount.clone(),
            mode: BudgetMode::Add,
        };
        self.request(Method::POST, &Self::account_path(key, "/budget"), Some(&body))
            .await
    }

    async fn transfer_budget(
        &self,
        parent: &AccountKey,
        child: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError> {
        let body = TransferRequest {
            child_key: child.clone(),
            amount: amount.clone(),
        };
        self.request(
            Method::POST,
            &Self::account_path(parent, "/transfer"),
            Some(&body),
        )
        .await
    }

    async fn set_balance(
        &self,
        key: &AccountKey,
        desired: &Amount,
        max_throttle: Option<i64>,
    ) -> Result<Account, ClientError> {
        let body = BalanceRequest {
            desired_balance: desired.clone(),
            max_throttle,
        };
        self.request(Method::POST, &Self::account_path(key, "/balance"), Some(&body))
            .await
    }

    async fn report_spend(
        &self,
        key: &AccountKey,
        report: &SpendReport,
    ) -> Result<Account, ClientError> {
        self.request(Method::POST, &Self::account_path(key, "/shadow"), Some(report))
            .await
    }

    async fn close_account(&self, key: &AccountKey) -> Result<Account, ClientError> {
        self.request(Method::POST, &Self::account_path(key, "/close"), None::<&()>)
            .await
    }

    async fn summary(&self) -> Result<BTreeMap<AccountKey, AccountSummary>, ClientError> {
        self.request(Method::GET, "/v1/summary", None::<&()>).await
    }
}
