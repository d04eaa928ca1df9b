//! In-memory collection and sink shared by the engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use inat_downloader::fetcher::{
    FetcherError, FetcherResult, PageRequest, PageResponse, RemoteCollection, TransportError,
};
use inat_downloader::output::{OutputResult, RecordSink};
use inat_downloader::shutdown::SharedShutdown;
use inat_downloader::{MediaRef, Record, SizeVariant};
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::time::Instant;

pub const PHOTO_SIZE: usize = 1_000;

/// Observation with one square photo
pub fn record(id: u64) -> Record {
    Record {
        id,
        taxon_name: Some("Danaus plexippus".to_string()),
        license_code: Some("cc-by".to_string()),
        observer_login: Some("alice".to_string()),
        quality_grade: Some("research".to_string()),
        observed_on: Some("2024-06-01".to_string()),
        latitude: Some(45.5),
        longitude: Some(-73.6),
        media_refs: vec![MediaRef::new(
            format!("https://static.example.org/photos/{id}/square.jpg"),
            SizeVariant::Square,
        )],
    }
}

/// Collection of records with IDs `1..=count`
pub fn records(count: u64) -> Vec<Record> {
    (1..=count).map(record).collect()
}

/// Remote collection served from memory, ascending by ID
pub struct MockCollection {
    records: Vec<Record>,
    failing_media: HashSet<u64>,
    stop_after_queries: Option<(usize, SharedShutdown)>,
    failing_query: Option<(usize, u16)>,
    reported_total: Option<u64>,
    pub requests: Mutex<Vec<PageRequest>>,
    pub query_times: Mutex<Vec<Instant>>,
    pub media_urls: Mutex<Vec<String>>,
}

impl MockCollection {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            failing_media: HashSet::new(),
            stop_after_queries: None,
            failing_query: None,
            reported_total: None,
            requests: Mutex::new(Vec::new()),
            query_times: Mutex::new(Vec::new()),
            media_urls: Mutex::new(Vec::new()),
        }
    }

    /// Photos of these observations answer 404
    pub fn with_failing_media(mut self, ids: &[u64]) -> Self {
        self.failing_media = ids.iter().copied().collect();
        self
    }

    /// Request shutdown once `queries` page queries were answered
    pub fn stop_after_queries(mut self, queries: usize, shutdown: SharedShutdown) -> Self {
        self.stop_after_queries = Some((queries, shutdown));
        self
    }

    /// The `nth` page query (1-based, count query included) fails with `status`
    /// after retries: 503 as exhausted, anything else as fatal
    pub fn with_failing_query(mut self, nth: usize, status: u16) -> Self {
        self.failing_query = Some((nth, status));
        self
    }

    /// Every page claims `total` results, whatever is actually served
    pub fn with_reported_total(mut self, total: u64) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn query_times(&self) -> Vec<Instant> {
        self.query_times.lock().unwrap().clone()
    }

    pub fn media_urls(&self) -> Vec<String> {
        self.media_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCollection for MockCollection {
    async fn query_page(&self, request: &PageRequest) -> FetcherResult<PageResponse> {
        let answered = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        self.query_times.lock().unwrap().push(Instant::now());

        if let Some((nth, status)) = self.failing_query {
            if answered == nth {
                let url = "https://api.example.org/v1/observations".to_string();
                let error = if status == 503 {
                    TransportError::Exhausted {
                        attempts: 5,
                        reason: "service unavailable".to_string(),
                        url,
                        message: "HTTP 503".to_string(),
                    }
                } else {
                    TransportError::Fatal {
                        status,
                        url,
                        body: String::new(),
                    }
                };
                return Err(FetcherError::Transport(error));
            }
        }

        let above: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.id > request.cursor.value())
            .cloned()
            .collect();

        if let Some((limit, shutdown)) = &self.stop_after_queries {
            if answered >= *limit {
                shutdown.request_shutdown();
            }
        }

        Ok(PageResponse {
            total_results: self.reported_total.unwrap_or(above.len() as u64),
            records: above.into_iter().take(request.page_size as usize).collect(),
        })
    }

    async fn fetch_media(&self, media: &MediaRef) -> FetcherResult<Bytes> {
        self.media_urls.lock().unwrap().push(media.source_url.clone());

        let failing = self
            .failing_media
            .iter()
            .any(|id| media.source_url.contains(&format!("/photos/{id}/")));
        if failing {
            return Err(FetcherError::Transport(TransportError::Fatal {
                status: 404,
                url: media.source_url.clone(),
                body: String::new(),
            }));
        }
        Ok(Bytes::from(vec![0u8; PHOTO_SIZE]))
    }
}

/// Sink keeping everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
    pub media: Vec<(u64, usize, SizeVariant, usize)>,
    pub flushes: usize,
}

impl MemorySink {
    pub fn ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.id).collect()
    }
}

impl RecordSink for MemorySink {
    fn write_record(&mut self, _collection_key: &str, record: &Record) -> OutputResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn write_media(
        &mut self,
        _collection_key: &str,
        record: &Record,
        index: usize,
        variant: SizeVariant,
        bytes: &[u8],
    ) -> OutputResult<()> {
        self.media.push((record.id, index, variant, bytes.len()));
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.flushes += 1;
        Ok(())
    }
}
