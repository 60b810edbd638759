//! # chain::http
//!
//! **HTTP Bridge** — talks to the REST adapter that fronts the contracts
//!
//! ## Bridge API Contract
//! ```text
//! GET  /positions/eligible                     → { "ids": [1, 2, 3] }
//! GET  /positions/{id}                         → Position
//! GET  /positions/{id}/allocation              → Allocation   (404 = none)
//! GET  /positions/{id}/needs-analysis?max_age= → { "needs_analysis": true }
//! POST /positions/{id}/strategy  { strategy }  → { "tx_id": "0x…", "confirmed": true }
//! POST /positions/{id}/analysis  { analyzed_at }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chain::{PositionSource, StrategyExecutor, TxReceipt};
use crate::error::AppError;
use crate::models::{Allocation, Position, PositionId, Strategy};

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EligibleResponse {
    ids: Vec<PositionId>,
}

#[derive(Debug, Deserialize)]
struct NeedsAnalysisResponse {
    needs_analysis: bool,
}

#[derive(Debug, Serialize)]
struct StrategyChangeRequest {
    strategy:       Strategy,
    /// On-chain enum index, for adapters that forward it verbatim.
    strategy_index: u8,
}

#[derive(Debug, Serialize)]
struct AnalysisStamp {
    analyzed_at: DateTime<Utc>,
}

// ─── Bridge ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpBridge {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl HttpBridge {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET + decode.  `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, AppError> {
        let url = self.url(path);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, url = %url, "Chain bridge unreachable");
                AppError::Collaborator(format!("bridge unreachable: {e}"))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(http_status = %status, body = %body, url = %url, "Chain bridge returned HTTP error");
            return Err(AppError::Collaborator(format!("bridge HTTP {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| AppError::Collaborator(format!("bridge response parse error: {e}")))
    }

    /// POST + status check; the caller decides whether to decode the body.
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, AppError> {
        let url = self.url(path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Chain bridge unreachable");
                AppError::Collaborator(format!("bridge unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(http_status = %status, body = %body, url = %url, "Chain bridge returned HTTP error");
            return Err(AppError::Collaborator(format!("bridge HTTP {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl PositionSource for HttpBridge {
    async fn list_eligible_positions(&self) -> Result<Vec<PositionId>, AppError> {
        // a 404 here is a misrouted bridge, not an empty book
        let resp: EligibleResponse = self
            .get_json("/positions/eligible")
            .await?
            .ok_or_else(|| AppError::Collaborator("bridge has no /positions/eligible route".into()))?;
        Ok(resp.ids)
    }

    async fn needs_analysis(&self, id: PositionId, max_age_secs: u64) -> bool {
        let path = format!("/positions/{id}/needs-analysis?max_age={max_age_secs}");
        match self.get_json::<NeedsAnalysisResponse>(&path).await {
            Ok(Some(resp)) => resp.needs_analysis,
            Ok(None) => false,
            Err(e) => {
                // fail closed: a flaky bridge must not trigger re-analysis
                warn!(position_id = id, error = %e, "needs_analysis failed — treating as fresh");
                false
            }
        }
    }

    async fn fetch_position(&self, id: PositionId) -> Result<Position, AppError> {
        self.get_json(&format!("/positions/{id}"))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("position #{id}")))
    }

    async fn fetch_allocation(&self, id: PositionId) -> Result<Option<Allocation>, AppError> {
        self.get_json(&format!("/positions/{id}/allocation")).await
    }

    async fn record_analysis(&self, id: PositionId, at: DateTime<Utc>) -> Result<(), AppError> {
        self.post(&format!("/positions/{id}/analysis"), &AnalysisStamp { analyzed_at: at })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StrategyExecutor for HttpBridge {
    async fn execute_strategy_change(
        &self,
        id:       PositionId,
        strategy: Strategy,
    ) -> Result<TxReceipt, AppError> {
        info!(position_id = id, strategy = %strategy, "🚀 [BRIDGE] Submitting strategy change");

        let receipt: TxReceipt = self
            .post(
                &format!("/positions/{id}/strategy"),
                &StrategyChangeRequest { strategy, strategy_index: strategy.index() },
            )
            .await?
            .json()
            .await
            .map_err(|e| AppError::Collaborator(format!("bridge receipt parse error: {e}")))?;

        info!(
            position_id = id,
            tx_id       = %receipt.tx_id,
            confirmed   = receipt.confirmed,
            "✅ [BRIDGE] Strategy change accepted"
        );
        Ok(receipt)
    }
}
