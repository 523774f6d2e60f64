/// SSE client for the whale-trade stream
///
/// Keeps a long-lived `GET /api/whales/stream` open, decodes frames into
/// validated batches and forwards them to the pipeline. Reconnects forever
/// after a fixed delay; malformed frames are logged and skipped.

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::shared::config::FeedConfig;
use crate::shared::error::FeedError;
use crate::shared::pipeline::PipelineCommand;
use crate::shared::sse::{SseDecoder, SseFrame};
use crate::shared::types::{WhaleBatch, WhaleEnvelope};

const PREVIEW_CHARS: usize = 200;

/// Leading slice of a frame for logs, cut on a char boundary
fn preview(data: &str) -> &str {
    match data.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &data[..end],
        None => data,
    }
}

/// Decode one SSE frame into a validated batch
pub fn parse_frame(frame: &SseFrame) -> Result<WhaleBatch, FeedError> {
    let envelope: WhaleEnvelope = serde_json::from_str(&frame.data)?;
    Ok(envelope.into_batch())
}

/// Spawn the stream receiver
///
/// Returns the task handle; the task exits once the pipeline's command
/// channel is closed.
pub fn spawn_whale_stream(
    config: FeedConfig,
    commands: mpsc::Sender<PipelineCommand>,
) -> Result<tokio::task::JoinHandle<()>, FeedError> {
    let url = config.stream_url()?;
    let http = reqwest::Client::builder().build()?;

    Ok(tokio::spawn(async move {
        run_stream_loop(http, url, config, commands).await;
    }))
}

async fn open_stream(http: &reqwest::Client, url: &Url) -> Result<reqwest::Response, FeedError> {
    let response = http
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FeedError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Main SSE loop with fixed-delay reconnect
async fn run_stream_loop(
    http: reqwest::Client,
    url: Url,
    config: FeedConfig,
    commands: mpsc::Sender<PipelineCommand>,
) {
    info!("Starting whale stream client for {}", url);

    loop {
        match open_stream(&http, &url).await {
            Ok(response) => {
                info!("Connected to whale stream at {}", url);
                if commands.send(PipelineCommand::Connected).await.is_err() {
                    break;
                }

                let mut body = response.bytes_stream();
                let mut decoder = SseDecoder::new();
                let mut receiver_gone = false;

                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for frame in decoder.push(&bytes) {
                                match parse_frame(&frame) {
                                    Ok(batch) => {
                                        debug!(
                                            "Whale frame: {} trades (stale={})",
                                            batch.events.len(),
                                            batch.stale
                                        );
                                        if commands
                                            .send(PipelineCommand::BatchReceived(batch))
                                            .await
                                            .is_err()
                                        {
                                            receiver_gone = true;
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Skipping malformed whale frame: {}", e);
                                        debug!("Raw frame: {}", preview(&frame.data));
                                    }
                                }
                            }
                            if receiver_gone {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Whale stream error: {}", e);
                            break;
                        }
                    }
                }

                if receiver_gone {
                    warn!("Pipeline dropped, stopping whale stream client");
                    break;
                }
                warn!("Whale stream closed, will reconnect...");
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", url, e);
            }
        }

        if commands.send(PipelineCommand::ConnectionLost).await.is_err() {
            break;
        }

        debug!(
            "Waiting {:?} before reconnecting...",
            config.reconnect_delay
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}
