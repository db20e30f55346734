// src/connectors/pagination.rs
//
// The two pagination families venues come in:
// - cursor/limit: bounded pages walked forward from a `since` timestamp, or
//   backwards from the newest page when the venue has no "from the start" query
// - date-window: fixed calendar windows walked from a start date to now
//
// Venue adapters implement the small page-source trait for their family and
// get deduplicated, ascending candles back.

use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue, DAY_MS};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Safety valve against venues that never signal end-of-data.
const MAX_PAGES: usize = 10_000;

// =============================================================================
// Cursor / Limit Family
// =============================================================================

/// A venue that serves at most `page_limit()` daily candles starting at `since`.
#[async_trait]
pub trait CursorPageSource: Send + Sync {
    fn venue(&self) -> Venue;

    /// Maximum rows the venue returns per request.
    fn page_limit(&self) -> usize;

    /// One page starting at `since_ms`, ascending by timestamp. `since_ms = None`
    /// asks for the venue's default first page.
    async fn fetch_page(
        &self,
        market: &MarketRef,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError>;

    /// True when a fetch without `since` has to walk back from the newest page
    /// because the venue's default first page is its latest one.
    fn walks_backward(&self) -> bool {
        false
    }

    /// One page of candles strictly older than `before_ms` (the newest page
    /// when `None`), ascending by timestamp.
    async fn fetch_page_before(
        &self,
        _market: &MarketRef,
        _before_ms: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        Err(VenueFetchError::new(self.venue(), "backward paging not supported"))
    }
}

/// Fetches every candle from `since_ms` on, or the full history when `None`.
///
/// Forward: after each page the cursor moves to the page's last timestamp plus
/// one day. Candles older than `since_ms` are dropped. Stops on a short page,
/// or on a page with nothing newer than what was already seen (some venues
/// repeat the final page instead of returning empty).
///
/// Full history on a venue that `walks_backward` pages from the newest candle
/// towards listing instead, with the mirrored stop rules.
///
/// A timestamp seen twice keeps the later-seen candle.
pub async fn paginate_cursor<S: CursorPageSource + ?Sized>(
    source: &S,
    market: &MarketRef,
    since_ms: Option<i64>,
) -> Result<Vec<Candle>, VenueFetchError> {
    if since_ms.is_none() && source.walks_backward() {
        return paginate_backward(source, market).await;
    }

    let limit = source.page_limit().max(1);
    let mut since = since_ms;
    let mut candles: BTreeMap<i64, Candle> = BTreeMap::new();
    let mut last_seen: Option<i64> = None;
    let mut pages = 0usize;

    loop {
        pages += 1;
        let mut batch = source.fetch_page(market, since, limit).await?;
        if let Some(floor) = since_ms {
            batch.retain(|c| c.timestamp >= floor);
        }
        if batch.is_empty() {
            break;
        }

        let rows = batch.len();
        let mut new_points = 0usize;
        let mut page_last = i64::MIN;
        for candle in batch {
            if last_seen.map_or(true, |ts| candle.timestamp > ts) {
                new_points += 1;
            }
            page_last = page_last.max(candle.timestamp);
            candles.insert(candle.timestamp, candle);
        }
        last_seen = Some(last_seen.map_or(page_last, |ts| ts.max(page_last)));

        debug!(
            "{}: {} page {} -> {} rows, {} new",
            source.venue(),
            market.symbol,
            pages,
            rows,
            new_points
        );

        if rows < limit || new_points == 0 {
            break;
        }
        if pages >= MAX_PAGES {
            warn!("{}: hit page limit for {}, stopping", source.venue(), market.symbol);
            break;
        }
        since = Some(page_last + DAY_MS);
    }

    Ok(candles.into_values().collect())
}

/// Walks pages from the newest candle back to the oldest the venue serves.
async fn paginate_backward<S: CursorPageSource + ?Sized>(
    source: &S,
    market: &MarketRef,
) -> Result<Vec<Candle>, VenueFetchError> {
    let limit = source.page_limit().max(1);
    let mut before: Option<i64> = None;
    let mut candles: BTreeMap<i64, Candle> = BTreeMap::new();
    let mut pages = 0usize;

    loop {
        pages += 1;
        let batch = source.fetch_page_before(market, before, limit).await?;
        if batch.is_empty() {
            break;
        }

        let rows = batch.len();
        let mut older_points = 0usize;
        let mut page_first = i64::MAX;
        for candle in batch {
            if before.map_or(true, |ts| candle.timestamp < ts) {
                older_points += 1;
            }
            page_first = page_first.min(candle.timestamp);
            candles.insert(candle.timestamp, candle);
        }

        debug!(
            "{}: {} back page {} -> {} rows, {} older",
            source.venue(),
            market.symbol,
            pages,
            rows,
            older_points
        );

        if rows < limit || older_points == 0 {
            break;
        }
        if pages >= MAX_PAGES {
            warn!("{}: hit page limit for {}, stopping", source.venue(), market.symbol);
            break;
        }
        before = Some(page_first);
    }

    Ok(candles.into_values().collect())
}

// =============================================================================
// Date-Window Family
// =============================================================================

/// A venue that serves candles for an explicit `[start, end]` calendar window.
#[async_trait]
pub trait WindowPageSource: Send + Sync {
    fn venue(&self) -> Venue;

    /// Width of one request window.
    fn window(&self) -> Duration;

    /// Where a full-history fetch starts.
    fn earliest_start(&self) -> DateTime<Utc>;

    async fn fetch_window(
        &self,
        market: &MarketRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, VenueFetchError>;
}

/// Walks sequential, non-overlapping windows from `since_ms` (or the venue's
/// earliest start) up to `now`. Candles are keyed by timestamp as they arrive.
pub async fn paginate_windows<S: WindowPageSource + ?Sized>(
    source: &S,
    market: &MarketRef,
    since_ms: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Vec<Candle>, VenueFetchError> {
    let mut start = since_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(|| source.earliest_start());
    let window = source.window();
    let mut candles: BTreeMap<i64, Candle> = BTreeMap::new();

    while start < now {
        let end = (start + window).min(now);
        let batch = source.fetch_window(market, start, end).await?;
        debug!(
            "{}: {} window {} .. {} -> {} rows",
            source.venue(),
            market.symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            batch.len()
        );
        for candle in batch {
            candles.insert(candle.timestamp, candle);
        }
        start = end;
    }

    Ok(candles.into_values().collect())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    fn candle(ts: i64, close: i64) -> Candle {
        let px = Decimal::from(close);
        Candle::new(ts, px, px, px, px, Decimal::ONE)
    }

    fn market() -> MarketRef {
        MarketRef::new(Venue::Binance, "BTC", "USDT", "BTCUSDT")
    }

    /// Serves `days` consecutive daily candles starting at day 0, `limit` at a time.
    struct FakeCursor {
        days: i64,
        limit: usize,
        repeat_last_page: bool,
        requests: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl CursorPageSource for FakeCursor {
        fn venue(&self) -> Venue {
            Venue::Binance
        }

        fn page_limit(&self) -> usize {
            self.limit
        }

        async fn fetch_page(
            &self,
            _market: &MarketRef,
            since_ms: Option<i64>,
            limit: usize,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            self.requests.lock().unwrap().push(since_ms);
            let first_day = since_ms.unwrap_or(0) / DAY_MS;
            let mut page: Vec<Candle> = (first_day..self.days)
                .take(limit)
                .map(|d| candle(d * DAY_MS, d))
                .collect();
            if page.is_empty() && self.repeat_last_page {
                let start = (self.days - limit as i64).max(0);
                page = (start..self.days).map(|d| candle(d * DAY_MS, d)).collect();
            }
            Ok(page)
        }
    }

    #[tokio::test]
    async fn test_cursor_stops_on_short_page() {
        let source = FakeCursor {
            days: 25,
            limit: 10,
            repeat_last_page: false,
            requests: Mutex::new(Vec::new()),
        };
        let out = paginate_cursor(&source, &market(), None).await.unwrap();

        assert_eq!(out.len(), 25);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(
            *source.requests.lock().unwrap(),
            vec![None, Some(10 * DAY_MS), Some(20 * DAY_MS)]
        );
    }

    #[tokio::test]
    async fn test_cursor_stops_when_venue_repeats_last_page() {
        let source = FakeCursor {
            days: 20,
            limit: 10,
            repeat_last_page: true,
            requests: Mutex::new(Vec::new()),
        };
        let out = paginate_cursor(&source, &market(), Some(0)).await.unwrap();

        assert_eq!(out.len(), 20);
        // Two full pages, then a repeated page with nothing new.
        assert_eq!(source.requests.lock().unwrap().len(), 3);
    }

    /// Newest-first venue: without a cursor it answers with its latest page.
    struct FakeBackward {
        days: i64,
        limit: usize,
        requests: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl CursorPageSource for FakeBackward {
        fn venue(&self) -> Venue {
            Venue::Upbit
        }

        fn page_limit(&self) -> usize {
            self.limit
        }

        async fn fetch_page(
            &self,
            _market: &MarketRef,
            since_ms: Option<i64>,
            limit: usize,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            let first_day = since_ms.unwrap_or(0) / DAY_MS;
            Ok((first_day..self.days)
                .take(limit)
                .map(|d| candle(d * DAY_MS, d))
                .collect())
        }

        fn walks_backward(&self) -> bool {
            true
        }

        async fn fetch_page_before(
            &self,
            _market: &MarketRef,
            before_ms: Option<i64>,
            limit: usize,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            self.requests.lock().unwrap().push(before_ms);
            let end_day = before_ms.map_or(self.days, |ts| ts / DAY_MS);
            let start_day = (end_day - limit as i64).max(0);
            Ok((start_day..end_day).map(|d| candle(d * DAY_MS, d)).collect())
        }
    }

    #[tokio::test]
    async fn test_full_history_walks_back_to_listing() {
        let source = FakeBackward {
            days: 25,
            limit: 10,
            requests: Mutex::new(Vec::new()),
        };
        let out = paginate_cursor(&source, &market(), None).await.unwrap();

        assert_eq!(out.len(), 25);
        assert_eq!(out[0].timestamp, 0);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(
            *source.requests.lock().unwrap(),
            vec![None, Some(15 * DAY_MS), Some(5 * DAY_MS)]
        );
    }

    #[tokio::test]
    async fn test_since_still_walks_forward_and_drops_older_rows() {
        let source = FakeBackward {
            days: 25,
            limit: 10,
            requests: Mutex::new(Vec::new()),
        };
        let out = paginate_cursor(&source, &market(), Some(20 * DAY_MS)).await.unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!(out[0].timestamp, 20 * DAY_MS);
        assert!(source.requests.lock().unwrap().is_empty());
    }

    struct DuplicatingCursor;

    #[async_trait]
    impl CursorPageSource for DuplicatingCursor {
        fn venue(&self) -> Venue {
            Venue::Okx
        }

        fn page_limit(&self) -> usize {
            100
        }

        async fn fetch_page(
            &self,
            _market: &MarketRef,
            _since_ms: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            Ok(vec![candle(0, 1), candle(DAY_MS, 2), candle(DAY_MS, 3)])
        }
    }

    #[tokio::test]
    async fn test_cursor_dedup_keeps_later_entry() {
        let out = paginate_cursor(&DuplicatingCursor, &market(), None).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].close, Decimal::from(3));
    }

    struct FailingCursor;

    #[async_trait]
    impl CursorPageSource for FailingCursor {
        fn venue(&self) -> Venue {
            Venue::Bybit
        }

        fn page_limit(&self) -> usize {
            10
        }

        async fn fetch_page(
            &self,
            _market: &MarketRef,
            _since_ms: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            Err(VenueFetchError::new(Venue::Bybit, "HTTP 503"))
        }
    }

    #[tokio::test]
    async fn test_cursor_propagates_fetch_error() {
        let err = paginate_cursor(&FailingCursor, &market(), None).await.unwrap_err();
        assert_eq!(err.venue, Venue::Bybit);
    }

    struct FakeWindows {
        windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl WindowPageSource for FakeWindows {
        fn venue(&self) -> Venue {
            Venue::Coinbase
        }

        fn window(&self) -> Duration {
            Duration::days(300)
        }

        fn earliest_start(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp(0, 0).unwrap()
        }

        async fn fetch_window(
            &self,
            _market: &MarketRef,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Candle>, VenueFetchError> {
            self.windows.lock().unwrap().push((start, end));
            // Inclusive bounds: the boundary day shows up in two windows.
            let first = start.timestamp_millis() / DAY_MS;
            let last = end.timestamp_millis() / DAY_MS;
            Ok((first..=last).map(|d| candle(d * DAY_MS, d)).collect())
        }
    }

    #[tokio::test]
    async fn test_windows_are_sequential_and_deduplicated() {
        let source = FakeWindows {
            windows: Mutex::new(Vec::new()),
        };
        let now = DateTime::<Utc>::from_timestamp(700 * 86_400, 0).unwrap();
        let out = paginate_windows(&source, &market(), None, now).await.unwrap();

        let windows = source.windows.lock().unwrap().clone();
        assert_eq!(windows.len(), 3);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(windows.last().unwrap().1, now);
        assert_eq!(out.len(), 701);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_windows_start_from_since() {
        let source = FakeWindows {
            windows: Mutex::new(Vec::new()),
        };
        let now = DateTime::<Utc>::from_timestamp(100 * 86_400, 0).unwrap();
        let out = paginate_windows(&source, &market(), Some(90 * DAY_MS), now)
            .await
            .unwrap();

        assert_eq!(source.windows.lock().unwrap().len(), 1);
        assert_eq!(out.first().unwrap().timestamp, 90 * DAY_MS);
        assert_eq!(out.len(), 11);
    }
}
