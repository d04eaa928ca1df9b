//! Fetch engine: walks one collection under quota, retry and stop control
//!
//! Per collection the engine probes the remote total, clamps the target, then
//! alternates page queries and record processing until the target is reached
//! or the collection runs dry. A record's photos are stored before its metadata
//! row; the cursor advances once the row is written and is committed to the resume store once the sink has flushed a page, and
//! again when the run stops for any reason.

use indicatif::ProgressBar;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::downloader::config::EngineConfig;
use crate::downloader::job::{CollectionJob, CollectionReport, Phase, RunReport};
use crate::downloader::progress::{ProgressState, RunProgress};
use crate::downloader::quota::{QuotaError, QuotaKind, QuotaTracker};
use crate::downloader::{EngineError, ErrorKind};
use crate::fetcher::{
    FetcherError, PageCursorWalker, PageFilters, PageRequest, PageResponse, PageStep,
    RemoteCollection,
};
use crate::metrics;
use crate::output::{RecordSink, SinkProvider};
use crate::resume::{CollectionCheckpoint, ResumeStore};
use crate::shutdown::{sleep_unless_shutdown, SharedShutdown};
use crate::{Cursor, Record};

/// Mutable state of one collection run
struct CollectionRun {
    key: String,
    phase: Phase,
    start_cursor: Cursor,
    cursor: Cursor,
    requested: u64,
    target: u64,
    remote_total: u64,
    stale_dropped: u64,
    progress: RunProgress,
    reporter: ProgressState,
}

impl CollectionRun {
    fn new(key: String, start_cursor: Cursor, requested: u64) -> Self {
        Self {
            key,
            phase: Phase::Probing,
            start_cursor,
            cursor: start_cursor,
            requested,
            target: requested,
            remote_total: 0,
            stale_dropped: 0,
            progress: RunProgress::default(),
            reporter: ProgressState::new(requested),
        }
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal phase transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
    }

    fn remaining(&self) -> u64 {
        self.target.saturating_sub(self.progress.records)
    }

    fn cancelled(&self) -> EngineError {
        EngineError::Cancelled {
            collection: self.key.clone(),
            cursor: self.cursor,
        }
    }

    fn report(&self) -> CollectionReport {
        CollectionReport {
            collection_key: self.key.clone(),
            progress: self.progress,
            start_cursor: self.start_cursor,
            final_cursor: self.cursor,
            requested: self.requested,
            target: self.target,
            remote_total: self.remote_total,
            stale_dropped: self.stale_dropped,
            phase: self.phase,
        }
    }
}

/// Hooks for a multi-collection run
pub trait CollectionObserver {
    /// A collection is about to start; the returned bar tracks its records
    fn collection_started(&mut self, _job: &CollectionJob) -> Option<ProgressBar> {
        None
    }

    /// A collection finished successfully
    fn collection_finished(&mut self, _report: &CollectionReport) {}
}

impl CollectionObserver for () {}

/// Quota-governed walker over remote collections
pub struct FetchEngine {
    remote: Arc<dyn RemoteCollection>,
    quota: Arc<QuotaTracker>,
    walker: PageCursorWalker,
    config: EngineConfig,
    resume: Option<Mutex<ResumeStore>>,
    shutdown: Option<SharedShutdown>,
}

impl FetchEngine {
    /// Create an engine over a remote collection and a shared quota tracker
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        quota: Arc<QuotaTracker>,
        config: EngineConfig,
    ) -> Self {
        let walker = PageCursorWalker::new(
            config.page_size_max,
            PageFilters {
                quality: config.quality,
                license: config.license.clone(),
            },
        );
        Self {
            remote,
            quota,
            walker,
            config,
            resume: None,
            shutdown: None,
        }
    }

    /// Persist cursors in `store` and resume above them
    pub fn with_resume(mut self, store: ResumeStore) -> Self {
        self.resume = Some(Mutex::new(store));
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared quota tracker
    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Walk every job in order, opening a sink per collection.
    ///
    /// The first failing collection aborts the whole run; `observer` has
    /// seen every collection that finished before it.
    pub async fn run_collections(
        &self,
        jobs: Vec<CollectionJob>,
        sinks: &mut dyn SinkProvider,
        observer: &mut dyn CollectionObserver,
    ) -> Result<RunReport, EngineError> {
        let mut report = RunReport::default();
        for job in jobs {
            let mut sink = sinks.open_sink(&job.collection_key)?;
            let bar = observer.collection_started(&job);
            let collection = self.run_collection(job, sink.as_mut(), bar.as_ref()).await?;
            observer.collection_finished(&collection);
            report.push(collection);
        }
        Ok(report)
    }

    /// Walk one collection into `sink`
    pub async fn run_collection(
        &self,
        job: CollectionJob,
        sink: &mut dyn RecordSink,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<CollectionReport, EngineError> {
        let span = info_span!(
            "run_collection",
            collection = %job.collection_key,
            start_cursor = %job.start_cursor
        );
        self.run_collection_inner(job, sink, progress_bar)
            .instrument(span)
            .await
    }

    async fn run_collection_inner(
        &self,
        job: CollectionJob,
        sink: &mut dyn RecordSink,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<CollectionReport, EngineError> {
        self.config.validate().map_err(EngineError::Configuration)?;
        job.validate().map_err(EngineError::Configuration)?;

        let requested = job.target_count.unwrap_or(self.config.target_count);
        let start_cursor = self.start_cursor(&job);
        let mut run = CollectionRun::new(job.collection_key, start_cursor, requested);

        info!(requested, cursor = %start_cursor, "Starting collection run");

        match self.walk(&mut run, sink, progress_bar).await {
            Ok(()) => {
                if run.phase != Phase::Done {
                    run.transition(Phase::Done);
                }
                sink.flush()?;
                self.commit(&run, true)?;
                if let Some(bar) = progress_bar {
                    bar.finish_with_message(run.progress.summary());
                }
                info!(
                    records = run.progress.records,
                    images = run.progress.media_files,
                    megabytes = run.progress.media_megabytes(),
                    cursor = %run.cursor,
                    "Collection run completed"
                );
                Ok(run.report())
            }
            Err(err) => {
                let phase = if err.is_cancelled() {
                    Phase::Cancelled
                } else {
                    Phase::Error
                };
                run.transition(phase);
                self.save_on_exit(&run, sink);
                if let Some(bar) = progress_bar {
                    bar.abandon_with_message(format!("{phase}: {}", run.progress.summary()));
                }
                if err.is_cancelled() {
                    info!(cursor = %run.cursor, "Shutdown requested - progress saved");
                } else {
                    error!(kind = %err.kind(), error = %err, cursor = %run.cursor, "Collection run failed");
                }
                Err(err)
            }
        }
    }

    async fn walk(
        &self,
        run: &mut CollectionRun,
        sink: &mut dyn RecordSink,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<(), EngineError> {
        // Probe
        let probe = self.walker.probe_request(&run.key, run.cursor);
        let response = self.query(run, &probe).await?;
        let plan = self.walker.plan_target(run.requested, response.total_results);
        run.remote_total = plan.available;
        run.target = plan.target;
        run.reporter = ProgressState::new(plan.target);

        if plan.clamped {
            warn!(
                kind = %ErrorKind::RemoteDataMissing,
                requested = run.requested,
                available = plan.available,
                "Fewer observations available than requested, target reduced"
            );
        }
        info!(
            target = plan.target,
            available = plan.available,
            "Observations to download"
        );
        if let Some(bar) = progress_bar {
            bar.set_length(plan.target);
        }

        if plan.target == 0 {
            run.transition(Phase::Done);
            return Ok(());
        }

        run.transition(Phase::FetchingPage);
        let mut iteration = 0;

        loop {
            self.walker.check_iteration(iteration, &run.key, run.cursor)?;

            let Some(request) = self.walker.next_page(&run.key, run.cursor, run.remaining())
            else {
                break;
            };

            let response = self.query(run, &request).await?;

            if !sleep_unless_shutdown(self.shutdown.as_ref(), self.config.inter_page_delay).await {
                return Err(run.cancelled());
            }

            let records = match self.walker.advance(run.cursor, response.records)? {
                PageStep::Exhausted => {
                    warn!(
                        kind = %ErrorKind::RemoteDataMissing,
                        processed = run.progress.records,
                        target = run.target,
                        "Collection exhausted before reaching the target"
                    );
                    break;
                }
                PageStep::Page {
                    records, dropped, ..
                } => {
                    run.stale_dropped += dropped as u64;
                    records
                }
            };

            run.transition(Phase::ProcessingItems);
            let take = usize::try_from(run.remaining()).unwrap_or(usize::MAX);
            for record in records.into_iter().take(take) {
                self.check_shutdown(run)?;
                self.process_record(run, &record, sink, progress_bar).await?;
                run.cursor = record.cursor();
            }

            sink.flush()?;
            self.commit(run, false)?;
            debug!(cursor = %run.cursor, processed = run.progress.records, "Page committed");

            if run.remaining() == 0 {
                break;
            }
            run.transition(Phase::FetchingPage);
            iteration += 1;
        }

        Ok(())
    }

    /// One page-level request: stop check, one query unit, then the query
    async fn query(
        &self,
        run: &mut CollectionRun,
        request: &PageRequest,
    ) -> Result<PageResponse, EngineError> {
        self.check_shutdown(run)?;
        self.quota
            .consume(QuotaKind::QueriesPerDay, 1)
            .await
            .map_err(|e| quota_error(run, e))?;

        debug!(cursor = %request.cursor, per_page = request.page_size, "Sending page query");
        let response = self.remote.query_page(request).await;
        run.progress.queries += 1;
        metrics::record_page_query(&run.key);

        response.map_err(|source| {
            if source.is_cancelled() {
                run.cancelled()
            } else {
                EngineError::Query {
                    collection: run.key.clone(),
                    cursor: request.cursor,
                    source,
                }
            }
        })
    }

    async fn process_record(
        &self,
        run: &mut CollectionRun,
        record: &Record,
        sink: &mut dyn RecordSink,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<(), EngineError> {
        if let Err(problem) = record.validate() {
            warn!(observation_id = record.id, %problem, "Observation failed validation, keeping it");
        }

        let variant = self.config.size_variant;
        for (index, media) in record.media_refs.iter().enumerate() {
            let media = media.with_variant(variant);

            self.quota
                .admit_all(&QuotaKind::MEDIA)
                .await
                .map_err(|e| quota_error(run, e))?;

            match self.remote.fetch_media(&media).await {
                Ok(bytes) => {
                    let len = bytes.len() as u64;
                    self.quota
                        .record_all(&QuotaKind::MEDIA, len)
                        .map_err(|e| quota_error(run, e))?;
                    sink.write_media(&run.key, record, index, variant, &bytes)?;

                    run.progress.media_files += 1;
                    run.progress.media_bytes += len;
                    metrics::record_media_bytes(len);
                    debug!(
                        observation_id = record.id,
                        index,
                        "{} images downloaded ({:.2} MB)",
                        run.progress.media_files,
                        run.progress.media_megabytes()
                    );
                }
                Err(e) if e.is_cancelled() => return Err(run.cancelled()),
                Err(e) => {
                    warn!(
                        kind = %media_error_kind(&e),
                        observation_id = record.id,
                        url = %media.source_url,
                        error = %e,
                        "Couldn't download image, skipping"
                    );
                    run.progress.failed_media += 1;
                    metrics::record_media_failure();
                }
            }
        }

        // Row last: a record interrupted during its photos leaves no row
        sink.write_record(&run.key, record)?;
        run.progress.records += 1;
        metrics::record_processed(&run.key);
        info!(
            observation_id = record.id,
            "Observation {}/{}",
            run.progress.records,
            run.target
        );

        if let Some(bar) = progress_bar {
            bar.inc(1);
            bar.set_message(format!(
                "{} images ({:.2} MB)",
                run.progress.media_files,
                run.progress.media_megabytes()
            ));
        }
        if run.reporter.should_emit_update(&run.progress) {
            info!("{}", run.reporter.format_progress(&run.progress));
            run.reporter.mark_emitted(&run.progress);
        }
        Ok(())
    }

    fn start_cursor(&self, job: &CollectionJob) -> Cursor {
        match &self.resume {
            Some(store) => lock_store(store).start_cursor(&job.collection_key, job.start_cursor),
            None => job.start_cursor,
        }
    }

    fn commit(&self, run: &CollectionRun, completed: bool) -> Result<(), EngineError> {
        let Some(store) = &self.resume else {
            return Ok(());
        };
        let mut checkpoint = CollectionCheckpoint::new(run.cursor, &run.progress);
        if completed {
            checkpoint = checkpoint.completed();
        }
        lock_store(store).commit(&run.key, checkpoint)?;
        Ok(())
    }

    /// Best-effort flush and commit when a run stops early
    fn save_on_exit(&self, run: &CollectionRun, sink: &mut dyn RecordSink) {
        if let Err(e) = sink.flush() {
            // Cursor stays at the last durable commit
            error!(error = %e, "Failed to flush sink while stopping, cursor not saved");
            return;
        }
        if let Err(e) = self.commit(run, false) {
            error!(error = %e, "Failed to save cursor while stopping");
        }
    }

    fn check_shutdown(&self, run: &CollectionRun) -> Result<(), EngineError> {
        if self.shutdown_requested() {
            return Err(run.cancelled());
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

fn quota_error(run: &CollectionRun, err: QuotaError) -> EngineError {
    match err {
        QuotaError::Cancelled(_) => run.cancelled(),
        other => EngineError::Quota(other),
    }
}

fn media_error_kind(err: &FetcherError) -> ErrorKind {
    if err.is_transient() {
        ErrorKind::TransportTransient
    } else {
        ErrorKind::TransportFatal
    }
}

fn lock_store(store: &Mutex<ResumeStore>) -> std::sync::MutexGuard<'_, ResumeStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
