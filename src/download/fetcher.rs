// abyss-core - Segmented video downloader core
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Concurrent segment fetcher
//!
//! # Concurrency
//! - Segments are started in ascending index order, at most
//!   `max_concurrency` at a time (owned semaphore permits)
//! - Each worker owns one `segment_<index>` file and streams its body into it
//! - Byte and segment counters are atomics shared with a reporter task that
//!   publishes a `downloading` snapshot every interval
//!
//! # Failure
//! The first failing worker cancels the group before giving up its permit:
//! no further segment starts and in-flight workers stop at their next await.
//! Files already written stay on disk for the next run. Nothing is retried.

use crate::download::progress::{now_millis, ProgressPublisher, ProgressSnapshot};
use crate::download::resume::segment_file_name;
use crate::download::token::SegmentPlan;
use crate::download::transport::SegmentTransport;
use crate::download::{FRAGMENT_SIZE, REFERER};
use crate::error::{AbyssError, Result};
use crate::media::models::SelectedSource;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of segments fetched at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Write buffer per segment file
const CHUNK_SIZE: usize = 64 * 1024;

/// Interval between `downloading` snapshots
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful fetch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    /// Segments written in this run
    pub segments: usize,
    /// Bytes written in this run
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicU64,
    segments: AtomicUsize,
}

/// Downloads the segments of one selected source
pub struct SegmentFetcher {
    transport: Arc<dyn SegmentTransport>,
    source: SelectedSource,
    headers: HashMap<String, String>,
    max_concurrency: usize,
    publisher: ProgressPublisher,
    report_interval: Duration,
}

impl SegmentFetcher {
    pub fn new(
        transport: Arc<dyn SegmentTransport>,
        source: SelectedSource,
        publisher: ProgressPublisher,
    ) -> Self {
        Self {
            transport,
            source,
            headers: HashMap::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            publisher,
            report_interval: REPORT_INTERVAL,
        }
    }

    /// Extra headers sent with every segment request
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Request headers: caller headers plus the CDN referer unless overridden
    fn request_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("referer")) {
            headers.insert("Referer".to_string(), REFERER.to_string());
        }
        headers
    }

    /// Fetch `indices` of `plan` into `temp_dir`
    ///
    /// # Errors
    /// - InvalidConfiguration if `max_concurrency` is zero
    /// - InternalError if an index has no token in the plan
    /// - TransportError for the first segment that failed
    /// - IoError if a segment file cannot be written
    pub async fn run(
        &self,
        plan: &SegmentPlan,
        indices: &[usize],
        temp_dir: &Path,
    ) -> Result<FetchSummary> {
        if self.max_concurrency == 0 {
            return Err(AbyssError::InvalidConfiguration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let jobs = indices
            .iter()
            .map(|&index| {
                plan.token(index)
                    .map(|token| (index, self.source.segment_url(token)))
                    .ok_or_else(|| {
                        AbyssError::InternalError(format!("No token for segment {}", index))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let started = Instant::now();
        let start_time = now_millis();
        let total_segments = jobs.len();
        let media_size_estimate = total_segments as u64 * FRAGMENT_SIZE;

        info!(
            segments = total_segments,
            max_concurrency = self.max_concurrency,
            "Fetching segments"
        );

        let counters = Arc::new(Counters::default());
        let headers = Arc::new(self.request_headers());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let cancel = CancellationToken::new();
        let reporter_done = CancellationToken::new();
        // Stops the reporter even if this future is dropped mid-run
        let _stop_reporter = reporter_done.clone().drop_guard();

        let reporter = tokio::spawn(report_progress(
            self.publisher.clone(),
            Arc::clone(&counters),
            reporter_done.clone(),
            self.report_interval,
            total_segments,
            media_size_estimate,
            start_time,
        ));

        let mut workers = JoinSet::new();
        let mut dispatch_error = None;

        for (index, url) in jobs {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        dispatch_error = Some(AbyssError::InternalError(e.to_string()));
                        cancel.cancel();
                        break;
                    }
                },
            };

            let transport = Arc::clone(&self.transport);
            let headers = Arc::clone(&headers);
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            let path = temp_dir.join(segment_file_name(index));

            workers.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(AbyssError::Cancelled),
                    result = fetch_segment(transport.as_ref(), &url, &headers, index, path, &counters) => result,
                };

                if let Err(e) = &result {
                    if !matches!(e, AbyssError::Cancelled) {
                        warn!(index, error = %e, "Segment failed, cancelling remaining segments");
                        cancel.cancel();
                    }
                }

                drop(permit);
                result
            });
        }

        let mut first_error = dispatch_error;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(AbyssError::from).and_then(|result| result) {
                Ok(_) | Err(AbyssError::Cancelled) => {}
                Err(e) => {
                    cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        reporter_done.cancel();
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter stopped abnormally");
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let summary = FetchSummary {
            segments: counters.segments.load(Ordering::SeqCst),
            bytes: counters.bytes.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };

        info!(
            segments = summary.segments,
            bytes = summary.bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "All segments downloaded"
        );

        Ok(summary)
    }
}

/// Request one segment and stream its body into `path`
async fn fetch_segment(
    transport: &dyn SegmentTransport,
    url: &str,
    headers: &HashMap<String, String>,
    index: usize,
    path: PathBuf,
    counters: &Counters,
) -> Result<u64> {
    debug!(index, url, "Requesting segment");

    let response = transport.fetch(url, headers).await.map_err(|e| match e {
        AbyssError::TransportError { .. } | AbyssError::Cancelled => e,
        other => AbyssError::transport(other.to_string(), Some(index), None),
    })?;

    debug!(index, status = response.status, "Received segment response");

    if !response.is_success() {
        return Err(AbyssError::transport(
            format!("HTTP {}", response.status),
            Some(index),
            Some(response.status),
        ));
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    let mut body = response.body;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| match e {
            AbyssError::TransportError { .. } => e,
            other => AbyssError::transport(other.to_string(), Some(index), None),
        })?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
        counters.bytes.fetch_add(chunk.len() as u64, Ordering::SeqCst);
    }
    writer.flush().await?;

    counters.segments.fetch_add(1, Ordering::SeqCst);
    debug!(index, bytes = written, "Segment written");
    Ok(written)
}

/// Publish a `downloading` snapshot every `interval` until `done` fires
async fn report_progress(
    publisher: ProgressPublisher,
    counters: Arc<Counters>,
    done: CancellationToken,
    interval: Duration,
    total_segments: usize,
    media_size_estimate: u64,
    start_time: i64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = done.cancelled() => break,
            _ = ticker.tick() => {
                publisher.publish(ProgressSnapshot::downloading(
                    counters.segments.load(Ordering::SeqCst),
                    total_segments,
                    counters.bytes.load(Ordering::SeqCst),
                    media_size_estimate,
                    start_time,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::ProgressStatus;
    use crate::download::transport::TransportResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves `segment body = [index as u8; len]`, failing the given index
    struct MockTransport {
        plan: SegmentPlan,
        source: SelectedSource,
        segment_len: usize,
        fail_index: Option<usize>,
        delay: Duration,
        slow_indices: Vec<usize>,
        chunk_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        requests: Mutex<Vec<(usize, HashMap<String, String>)>>,
    }

    impl MockTransport {
        fn new(plan: SegmentPlan, source: SelectedSource, segment_len: usize) -> Self {
            Self {
                plan,
                source,
                segment_len,
                fail_index: None,
                delay: Duration::from_millis(5),
                slow_indices: Vec::new(),
                chunk_delay: Duration::from_millis(10),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn index_for(&self, url: &str) -> usize {
            self.plan
                .iter()
                .find(|(_, token)| self.source.segment_url(token) == url)
                .map(|(index, _)| index)
                .unwrap()
        }
    }

    #[async_trait]
    impl SegmentTransport for MockTransport {
        async fn fetch(
            &self,
            url: &str,
            headers: &HashMap<String, String>,
        ) -> Result<TransportResponse> {
            let index = self.index_for(url);
            self.requests.lock().unwrap().push((index, headers.clone()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_index == Some(index) {
                return Ok(TransportResponse {
                    status: 500,
                    body: futures_util::stream::empty().boxed(),
                });
            }

            let data = vec![index as u8; self.segment_len];
            let chunks: Vec<Result<Bytes>> = data
                .chunks(1000)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let body = if self.slow_indices.contains(&index) {
                let chunk_delay = self.chunk_delay;
                futures_util::stream::iter(chunks)
                    .then(move |chunk| async move {
                        tokio::time::sleep(chunk_delay).await;
                        chunk
                    })
                    .boxed()
            } else {
                futures_util::stream::iter(chunks).boxed()
            };
            Ok(TransportResponse { status: 200, body })
        }
    }

    /// Never answers
    struct HangingTransport;

    #[async_trait]
    impl SegmentTransport for HangingTransport {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<TransportResponse> {
            std::future::pending().await
        }
    }

    fn source() -> SelectedSource {
        SelectedSource {
            slug: Some("x".to_string()),
            md5_id: Some(2),
            label: Some("720p".to_string()),
            size: Some(5 * FRAGMENT_SIZE as i64),
            base_url: "https://edge7.abyss-cdn.net".to_string(),
            path: None,
            res_id: Some(7),
        }
    }

    #[tokio::test]
    async fn test_all_segments_written() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let transport = Arc::new(MockTransport::new(plan.clone(), source.clone(), 2500));

        let fetcher = SegmentFetcher::new(transport.clone(), source, ProgressPublisher::new())
            .with_max_concurrency(2);
        let summary = fetcher.run(&plan, &plan.indices(), dir.path()).await.unwrap();

        assert_eq!(summary.segments, 5);
        assert_eq!(summary.bytes, 5 * 2500);
        for index in 0..5 {
            let data = std::fs::read(dir.path().join(segment_file_name(index))).unwrap();
            assert_eq!(data, vec![index as u8; 2500]);
        }
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_remaining() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let mut transport = MockTransport::new(plan.clone(), source.clone(), 100);
        transport.fail_index = Some(2);
        let transport = Arc::new(transport);

        let fetcher = SegmentFetcher::new(transport.clone(), source, ProgressPublisher::new())
            .with_max_concurrency(1);
        let err = fetcher
            .run(&plan, &plan.indices(), dir.path())
            .await
            .unwrap_err();

        match err {
            AbyssError::TransportError {
                index, status_code, ..
            } => {
                assert_eq!(index, Some(2));
                assert_eq!(status_code, Some(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(dir.path().join("segment_0").exists());
        assert!(dir.path().join("segment_1").exists());
        assert!(!dir.path().join("segment_2").exists());
        assert!(!dir.path().join("segment_3").exists());
        assert!(!dir.path().join("segment_4").exists());

        let requested: Vec<usize> = transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(index, _)| *index)
            .collect();
        assert_eq!(requested, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_stops_in_flight_segments() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let segment_len = 100_000;
        let mut transport = MockTransport::new(plan.clone(), source.clone(), segment_len);
        transport.fail_index = Some(3);
        transport.slow_indices = vec![1, 2];
        let transport = Arc::new(transport);

        let fetcher = SegmentFetcher::new(transport.clone(), source, ProgressPublisher::new())
            .with_max_concurrency(3);
        let started = Instant::now();
        let err = fetcher
            .run(&plan, &plan.indices(), dir.path())
            .await
            .unwrap_err();

        // Slow segments would take a full second to stream
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(
            err,
            AbyssError::TransportError {
                index: Some(3),
                ..
            }
        ));

        let segment_0 = std::fs::read(dir.path().join("segment_0")).unwrap();
        assert_eq!(segment_0.len(), segment_len);
        for index in [1, 2] {
            let len = std::fs::metadata(dir.path().join(segment_file_name(index)))
                .map(|m| m.len())
                .unwrap_or(0);
            assert!(len < segment_len as u64, "segment {index} completed");
        }
        assert!(!dir.path().join("segment_4").exists());

        let requested: Vec<usize> = transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(index, _)| *index)
            .collect();
        assert_eq!(requested, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dropped_run_stops_reporter() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let publisher = ProgressPublisher::new();
        let fetcher = SegmentFetcher::new(Arc::new(HangingTransport), source, publisher.clone())
            .with_report_interval(Duration::from_millis(10));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            fetcher.run(&plan, &plan.indices(), dir.path()),
        )
        .await;
        assert!(timed_out.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut subscription = publisher.subscribe();
        assert!(subscription.next().await.is_some());
        let next = tokio::time::timeout(Duration::from_millis(200), subscription.next()).await;
        assert!(next.is_err(), "reporter kept publishing after run was dropped");
    }

    #[tokio::test]
    async fn test_requests_carry_referer_and_caller_headers() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let transport = Arc::new(MockTransport::new(plan.clone(), source.clone(), 10));

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "test-agent".to_string());
        let fetcher = SegmentFetcher::new(transport.clone(), source, ProgressPublisher::new())
            .with_headers(headers);
        fetcher.run(&plan, &[3], dir.path()).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (index, headers) = &requests[0];
        assert_eq!(*index, 3);
        assert_eq!(headers.get("Referer").map(String::as_str), Some(REFERER));
        assert_eq!(headers.get("User-Agent").map(String::as_str), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_reporter_publishes_downloading_snapshots() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let mut transport = MockTransport::new(plan.clone(), source.clone(), 10);
        transport.delay = Duration::from_millis(30);

        let publisher = ProgressPublisher::new();
        let fetcher = SegmentFetcher::new(Arc::new(transport), source, publisher.clone())
            .with_max_concurrency(1)
            .with_report_interval(Duration::from_millis(10));
        fetcher.run(&plan, &[0, 1], dir.path()).await.unwrap();

        let latest = publisher.latest().unwrap();
        assert_eq!(latest.status, ProgressStatus::Downloading);
        assert_eq!(latest.total_segments, 2);
        assert_eq!(latest.media_size_estimate, 2 * FRAGMENT_SIZE);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let transport = Arc::new(MockTransport::new(plan.clone(), source.clone(), 10));

        let fetcher = SegmentFetcher::new(transport, source, ProgressPublisher::new())
            .with_max_concurrency(0);
        assert!(matches!(
            fetcher.run(&plan, &[0], dir.path()).await,
            Err(AbyssError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let plan = SegmentPlan::generate(&source).unwrap();
        let transport = Arc::new(MockTransport::new(plan.clone(), source.clone(), 10));

        let fetcher = SegmentFetcher::new(transport, source, ProgressPublisher::new());
        assert!(matches!(
            fetcher.run(&plan, &[99], dir.path()).await,
            Err(AbyssError::InternalError(_))
        ));
    }
}
