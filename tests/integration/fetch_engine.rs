//! Fetch engine behaviour against an in-memory collection

use std::sync::Arc;
use std::time::Duration;

use inat_downloader::downloader::{
    CollectionJob, CollectionObserver, CollectionReport, EngineConfig, ErrorKind, FetchEngine,
    Phase, QuotaConfig, QuotaKind, QuotaTracker,
};
use inat_downloader::output::FileSinkProvider;
use inat_downloader::resume::ResumeStore;
use inat_downloader::{Cursor, SizeVariant};
use tempfile::tempdir;

use crate::common::{records, MemorySink, MockCollection, PHOTO_SIZE};

const SPECIES: &str = "Danaus plexippus";

fn config(target: u64) -> EngineConfig {
    EngineConfig::default()
        .with_target_count(target)
        .with_inter_page_delay(Duration::ZERO)
}

fn engine(remote: Arc<MockCollection>, config: EngineConfig) -> (FetchEngine, Arc<QuotaTracker>) {
    let quota = Arc::new(QuotaTracker::new(config.quota.window_specs()));
    (FetchEngine::new(remote, quota.clone(), config), quota)
}

#[tokio::test]
async fn target_is_clamped_to_remote_total() {
    let remote = Arc::new(MockCollection::new(records(5)));
    let (engine, _) = engine(remote.clone(), config(200));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(report.progress.records, 5);
    assert_eq!(report.target, 5);
    assert_eq!(report.remote_total, 5);
    assert_eq!(report.shortfall(), 195);
    assert_eq!(report.phase, Phase::Done);
    assert_eq!(sink.ids(), vec![1, 2, 3, 4, 5]);

    // Probe plus one page sized to what is left
    let sizes: Vec<u32> = remote.requests().iter().map(|r| r.page_size).collect();
    assert_eq!(sizes, vec![1, 5]);
    assert_eq!(report.progress.queries, 2);
}

#[tokio::test]
async fn pages_advance_the_cursor_monotonically() {
    let remote = Arc::new(MockCollection::new(records(450)));
    let (engine, quota) = engine(remote.clone(), config(450));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(sink.ids(), (1..=450).collect::<Vec<_>>());
    assert_eq!(report.final_cursor, Cursor(450));

    let requests: Vec<(u64, u32)> = remote
        .requests()
        .iter()
        .map(|r| (r.cursor.value(), r.page_size))
        .collect();
    assert_eq!(requests, vec![(0, 1), (0, 200), (200, 200), (400, 50)]);

    // One flush per page, one at the end
    assert_eq!(sink.flushes, 4);

    let queries = quota.snapshot(QuotaKind::QueriesPerDay).unwrap();
    assert_eq!(queries.consumed(), 4);
    let media = quota.snapshot(QuotaKind::MediaBytesPerHour).unwrap();
    assert_eq!(media.consumed(), 450 * PHOTO_SIZE as u64);
    assert_eq!(report.progress.media_bytes, 450 * PHOTO_SIZE as u64);
}

#[tokio::test]
async fn start_cursor_excludes_lower_ids() {
    let remote = Arc::new(MockCollection::new(records(150)));
    let (engine, _) = engine(remote.clone(), config(200));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor(100)), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(report.progress.records, 50);
    assert!(sink.ids().iter().all(|id| *id > 100));
    assert_eq!(report.start_cursor, Cursor(100));
    assert_eq!(report.final_cursor, Cursor(150));
}

#[tokio::test]
async fn per_job_target_overrides_config() {
    let remote = Arc::new(MockCollection::new(records(50)));
    let (engine, _) = engine(remote, config(200));
    let mut sink = MemorySink::default();

    let job = CollectionJob::new(SPECIES, Cursor::START).with_target_count(7);
    let report = engine.run_collection(job, &mut sink, None).await.unwrap();

    assert_eq!(report.requested, 7);
    assert_eq!(sink.ids(), (1..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn empty_collection_only_probes() {
    let remote = Arc::new(MockCollection::new(Vec::new()));
    let (engine, _) = engine(remote.clone(), config(10));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(report.progress.records, 0);
    assert_eq!(report.phase, Phase::Done);
    assert_eq!(remote.requests().len(), 1);
}

#[tokio::test]
async fn failed_photo_is_skipped() {
    let remote = Arc::new(MockCollection::new(records(6)).with_failing_media(&[3]));
    let (engine, _) = engine(remote, config(6));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(report.progress.records, 6);
    assert_eq!(report.progress.media_files, 5);
    assert_eq!(report.progress.failed_media, 1);
    assert!(sink.media.iter().all(|(id, ..)| *id != 3));
}

#[tokio::test]
async fn configured_size_variant_is_downloaded() {
    let remote = Arc::new(MockCollection::new(records(2)));
    let (engine, _) = engine(remote.clone(), config(2).with_size_variant(SizeVariant::Large));
    let mut sink = MemorySink::default();

    engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    let urls = remote.media_urls();
    assert_eq!(urls.len(), 2);
    assert!(urls.iter().all(|u| u.ends_with("/large.jpg")));
    assert!(sink
        .media
        .iter()
        .all(|(_, index, variant, _)| *index == 0 && *variant == SizeVariant::Large));
}

#[tokio::test(start_paused = true)]
async fn exhausted_query_quota_waits_for_reset() {
    let remote = Arc::new(MockCollection::new(records(450)));
    let config = config(450).with_quota(QuotaConfig {
        requests_per_day: 2,
        ..QuotaConfig::default()
    });
    let (engine, _) = engine(remote.clone(), config);
    let mut sink = MemorySink::default();

    let start = tokio::time::Instant::now();
    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    // Four queries through a two-per-day window need one reset
    assert_eq!(report.progress.records, 450);
    assert_eq!(remote.requests().len(), 4);
    assert!(start.elapsed() >= Duration::from_secs(24 * 3600));
}

#[tokio::test]
async fn invalid_config_sends_nothing() {
    let remote = Arc::new(MockCollection::new(records(5)));
    let (engine, _) = engine(remote.clone(), config(5).with_page_size_max(0));
    let mut sink = MemorySink::default();

    let err = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(remote.requests().is_empty());
}

#[tokio::test]
async fn run_collections_writes_one_csv_per_species() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MockCollection::new(records(3)));
    let (engine, _) = engine(remote, config(3));
    let mut provider = FileSinkProvider::new(dir.path());

    let jobs = vec![
        CollectionJob::new("Danaus plexippus", Cursor::START),
        CollectionJob::new("Apis mellifera", Cursor(1)),
    ];
    let report = engine
        .run_collections(jobs, &mut provider, &mut ())
        .await
        .unwrap();

    assert_eq!(report.collections.len(), 2);
    assert_eq!(report.total.records, 5);

    let monarch = std::fs::read_to_string(dir.path().join("Danaus_plexippus_metadata.csv")).unwrap();
    assert_eq!(monarch.lines().count(), 4);
    let bees = std::fs::read_to_string(dir.path().join("Apis_mellifera_metadata.csv")).unwrap();
    assert_eq!(bees.lines().count(), 3);

    let images: Vec<_> = std::fs::read_dir(dir.path().join("Apis_mellifera_images"))
        .unwrap()
        .collect();
    assert_eq!(images.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_follows_each_page_query() {
    let remote = Arc::new(MockCollection::new(records(450)));
    let config = config(450).with_inter_page_delay(Duration::from_millis(1200));
    let (engine, _) = engine(remote.clone(), config);
    let mut sink = MemorySink::default();

    let start = tokio::time::Instant::now();
    engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    // Three pages, three pauses; none after the count query
    assert!(elapsed >= Duration::from_millis(3 * 1200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(4 * 1200), "{elapsed:?}");

    let times = remote.query_times();
    assert_eq!(times.len(), 4);
    assert_eq!(times[1] - times[0], Duration::ZERO);
    for pair in times[1..].windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(1200));
    }
}

async fn failing_page_query(status: u16) -> (ErrorKind, Vec<u64>, Option<Cursor>) {
    let dir = tempdir().unwrap();
    // Count query and first page succeed, the second page fails
    let remote = Arc::new(MockCollection::new(records(10)).with_failing_query(3, status));
    let (engine, _) = engine(remote.clone(), config(10).with_page_size_max(2));
    let engine = engine.with_resume(ResumeStore::open(dir.path()).unwrap());
    let mut sink = MemorySink::default();

    let err = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap_err();
    assert_eq!(remote.requests().len(), 3);

    let saved = ResumeStore::open(dir.path()).unwrap().state().cursor(SPECIES);
    (err.kind(), sink.ids(), saved)
}

#[tokio::test]
async fn fatal_page_query_aborts_and_keeps_cursor() {
    let (kind, ids, saved) = failing_page_query(404).await;
    assert_eq!(kind, ErrorKind::TransportFatal);
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(saved, Some(Cursor(2)));
}

#[tokio::test]
async fn exhausted_page_query_aborts_and_keeps_cursor() {
    let (kind, ids, saved) = failing_page_query(503).await;
    assert_eq!(kind, ErrorKind::TransportTransient);
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(saved, Some(Cursor(2)));
}

#[tokio::test]
async fn overstated_total_ends_at_first_empty_page() {
    let remote = Arc::new(MockCollection::new(records(5)).with_reported_total(20));
    let (engine, _) = engine(remote.clone(), config(20));
    let mut sink = MemorySink::default();

    let report = engine
        .run_collection(CollectionJob::new(SPECIES, Cursor::START), &mut sink, None)
        .await
        .unwrap();

    assert_eq!(report.phase, Phase::Done);
    assert_eq!(report.target, 20);
    assert_eq!(sink.ids(), vec![1, 2, 3, 4, 5]);
    assert_eq!(report.final_cursor, Cursor(5));
    assert_eq!(report.shortfall(), 15);

    // Count query, the short page, then the empty page above the last ID
    let requests: Vec<(u64, u32)> = remote
        .requests()
        .iter()
        .map(|r| (r.cursor.value(), r.page_size))
        .collect();
    assert_eq!(requests, vec![(0, 1), (0, 20), (5, 15)]);
}

#[derive(Default)]
struct Journal {
    started: Vec<String>,
    finished: Vec<(String, u64)>,
}

impl CollectionObserver for Journal {
    fn collection_started(&mut self, job: &CollectionJob) -> Option<indicatif::ProgressBar> {
        self.started.push(job.collection_key.clone());
        Some(indicatif::ProgressBar::hidden())
    }

    fn collection_finished(&mut self, report: &CollectionReport) {
        self.finished
            .push((report.collection_key.clone(), report.progress.records));
    }
}

#[tokio::test]
async fn observer_sees_collections_until_one_fails() {
    let dir = tempdir().unwrap();
    // First species: count query and one page; the second species fails on its count query
    let remote = Arc::new(MockCollection::new(records(3)).with_failing_query(3, 404));
    let (engine, _) = engine(remote, config(3));
    let mut provider = FileSinkProvider::new(dir.path());
    let mut journal = Journal::default();

    let jobs = vec![
        CollectionJob::new("Danaus plexippus", Cursor::START),
        CollectionJob::new("Apis mellifera", Cursor::START),
        CollectionJob::new("Vespa crabro", Cursor::START),
    ];
    let err = engine
        .run_collections(jobs, &mut provider, &mut journal)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportFatal);
    assert_eq!(journal.started, vec!["Danaus plexippus", "Apis mellifera"]);
    assert_eq!(journal.finished, vec![("Danaus plexippus".to_string(), 3)]);
    assert!(!dir.path().join("Vespa_crabro_metadata.csv").exists());
}
