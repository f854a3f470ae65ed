// ABOUTME: Periodic expiry sweep for pending authorizations and authorization codes
// ABOUTME: Advisory hygiene; single-use consumption is the correctness mechanism
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Expiry sweeper
//!
//! A single timer task deletes pending-authorization and code rows past
//! their TTL. The sweep races harmlessly with consumption: whichever
//! happens first wins, and a "not found" from consumption after a sweep is
//! handled identically to normal single-use consumption.

use crate::database_plugins::{Database, DatabaseProvider};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Periodic cleanup of expired broker state
pub struct ExpirySweeper {
    database: Arc<Database>,
    pending_ttl_secs: i64,
    code_ttl_secs: i64,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper with the configured TTLs and cadence
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        pending_ttl_secs: u64,
        code_ttl_secs: u64,
        interval_secs: u64,
    ) -> Self {
        Self {
            database,
            pending_ttl_secs: i64::try_from(pending_ttl_secs).unwrap_or(i64::MAX),
            code_ttl_secs: i64::try_from(code_ttl_secs).unwrap_or(i64::MAX),
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run one sweep pass
    ///
    /// Failures are logged, not propagated: a missed sweep only delays
    /// cleanup that the TTL cutoffs on consumption already enforce.
    pub async fn sweep_once(&self) {
        let now = Utc::now();

        match self
            .database
            .cleanup_expired_pending(now - ChronoDuration::seconds(self.pending_ttl_secs))
            .await
        {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Swept expired pending authorizations"),
            Err(e) => tracing::warn!(error = %e, "Pending authorization sweep failed"),
        }

        match self
            .database
            .cleanup_expired_codes(now - ChronoDuration::seconds(self.code_ttl_secs))
            .await
        {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Swept expired authorization codes"),
            Err(e) => tracing::warn!(error = %e, "Authorization code sweep failed"),
        }
    }

    /// Spawn the periodic sweep task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}
