// src/connectors/test_server.rs
//
// Local HTTP stand-ins for venue endpoints. Each venue test builds an axum
// router that answers with the venue's wire format over a synthetic daily
// history, and records the query of every request it receives.

use super::RetryPolicy;
use crate::models::DAY_MS;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 2020-01-01T00:00:00Z
pub const FIRST_DAY_MS: i64 = 1_577_836_800_000;

pub type Query = HashMap<String, String>;

/// A venue's full daily history plus the queries it has been asked.
pub struct MockHistory {
    /// Candle open times, ascending.
    pub days: Vec<i64>,
    requests: Mutex<Vec<Query>>,
}

impl MockHistory {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            days: (0..count as i64).map(day).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn record(&self, query: &Query) {
        self.requests.lock().unwrap().push(query.clone());
    }

    pub fn requests(&self) -> Vec<Query> {
        self.requests.lock().unwrap().clone()
    }

    /// Days matching `keep`, newest first, at most `limit`.
    pub fn newest_first(&self, limit: usize, keep: impl Fn(i64) -> bool) -> Vec<i64> {
        self.days
            .iter()
            .rev()
            .copied()
            .filter(|ts| keep(*ts))
            .take(limit)
            .collect()
    }

    /// Days matching `keep`, oldest first, at most `limit`.
    pub fn oldest_first(&self, limit: usize, keep: impl Fn(i64) -> bool) -> Vec<i64> {
        self.days
            .iter()
            .copied()
            .filter(|ts| keep(*ts))
            .take(limit)
            .collect()
    }
}

/// Open time of day `n` of the synthetic history.
pub fn day(n: i64) -> i64 {
    FIRST_DAY_MS + n * DAY_MS
}

/// Close price for a day, distinct per day.
pub fn close_for(ts: i64) -> i64 {
    100 + (ts - FIRST_DAY_MS) / DAY_MS
}

pub fn param_i64(query: &Query, key: &str) -> Option<i64> {
    query.get(key).and_then(|v| v.parse().ok())
}

pub fn param_usize(query: &Query, key: &str) -> usize {
    query.get(key).and_then(|v| v.parse().ok()).unwrap_or(100)
}

/// No pacing and no retries, so a broken request fails the test at once.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        base_delay_ms: 1,
        max_delay_ms: 1,
        min_request_interval_ms: 0,
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}
