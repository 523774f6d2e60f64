/// Save-to-watchlist client
///
/// Posts a normalized trade to `POST /api/whales/save`. The backend answers
/// `{"success": true, "id": "..."}` or `{"error": "..."}`; either way the
/// outcome is shown as a toast and never interrupts the feed.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::shared::config::FeedConfig;
use crate::shared::error::FeedError;
use crate::shared::types::NormalizedTrade;

const SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Document id assigned by the backend
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchlistClient {
    http: reqwest::Client,
    url: Url,
}

impl WatchlistClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder().timeout(SAVE_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: config.save_url()?,
        })
    }

    pub async fn save(&self, trade: &NormalizedTrade) -> Result<SaveReceipt, FeedError> {
        debug!("Saving {} to watchlist", trade.identity);

        let response = self.http.post(self.url.clone()).json(trade).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Error bodies still carry a JSON reason when the backend produced them
        let parsed: Option<SaveResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(SaveResponse {
                error: Some(reason),
                ..
            }) => {
                warn!("Watchlist save rejected: {}", reason);
                Err(FeedError::Save(reason))
            }
            Some(SaveResponse { success: true, id, .. }) if status.is_success() => {
                Ok(SaveReceipt { id })
            }
            _ if !status.is_success() => Err(FeedError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            }),
            _ => Err(FeedError::Save("unexpected response".to_string())),
        }
    }
}
