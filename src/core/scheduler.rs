// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Scheduled retention sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RetentionConfig;
use crate::db::Database;

/// Periodically deletes persisted rows past their retention period.
///
/// Runs on its own interval and only ever touches the database; it never
/// takes the sample-processing lock.
pub struct RetentionSweeper {
    db: Arc<Database>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(db: Arc<Database>, config: RetentionConfig) -> Self {
        Self { db, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        // The immediate first tick would sweep at startup; skip it
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.db.cleanup(&self.config) {
                        Ok(removed) => debug!("Retention sweep complete, {} rows removed", removed),
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Retention sweeper shutting down");
                    break;
                }
            }
        }
    }
}
