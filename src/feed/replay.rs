//! Replay feed: one JSON `MarketEvent` per line, optionally paced by the
//! recorded timestamps.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use crate::domain::MarketEvent;
use crate::error::Result;

use super::MarketFeed;

pub struct ReplayFeed {
    lines: Lines<BufReader<File>>,
    /// Sleep between events to reproduce recorded spacing
    pace: bool,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ReplayFeed {
    pub async fn open(path: impl AsRef<Path>, pace: bool) -> Result<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            pace,
            last_timestamp: None,
        })
    }
}

#[async_trait]
impl MarketFeed for ReplayFeed {
    async fn next(&mut self) -> Option<MarketEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!("replay read failed: {e}");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            // A malformed record is skipped, never fatal
            let event: MarketEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("malformed replay record skipped: {e}");
                    continue;
                }
            };

            if self.pace {
                if let Some(last) = self.last_timestamp {
                    let gap = event.timestamp() - last;
                    if let Ok(gap) = gap.to_std() {
                        tokio::time::sleep(gap.min(std::time::Duration::from_secs(2))).await;
                    }
                }
                self.last_timestamp = Some(event.timestamp());
            }

            return Some(event);
        }
    }
}
