//! Periodic alarm discovery.
//!
//! The camera's realtime alarm callback is unreliable, so new alarms are
//! found by rescanning the event index every cycle and diffing it against
//! the file names already seen. Each new alarm becomes a history record
//! right away; its photo is recovered by a background job that fills the
//! record in and sends a notification.

use crate::config::{CameraConfig, PollerConfig, ScannerConfig};
use crate::constants::event_label;
use crate::error::Result;
use crate::extractor::{ExtractionResult, HybridExtractor};
use crate::marker::{EventMarker, format_time};
use crate::scanner::scan_camera;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Recent markers, newest first.
#[async_trait]
pub trait MarkerSource: Send + Sync {
    async fn recent_markers(&self, end: NaiveDateTime) -> Result<Vec<EventMarker>>;
}

/// Scans the live camera with its own session each cycle.
pub struct CameraMarkers {
    camera: CameraConfig,
    scanner: ScannerConfig,
}

impl CameraMarkers {
    /// The poller's `want` and `lookback_hours` override the scanner's.
    pub fn new(camera: CameraConfig, scanner: &ScannerConfig, poller: &PollerConfig) -> Self {
        Self {
            camera,
            scanner: ScannerConfig {
                want: poller.want,
                max_lookback_hours: poller.lookback_hours,
                ..scanner.clone()
            },
        }
    }
}

#[async_trait]
impl MarkerSource for CameraMarkers {
    async fn recent_markers(&self, end: NaiveDateTime) -> Result<Vec<EventMarker>> {
        let (markers, meta) = scan_camera(&self.camera, end, &self.scanner).await?;
        tracing::debug!(
            "scan found {} markers in {} queries, newest {:?}",
            meta.count,
            meta.chunks.len(),
            meta.max_time
        );
        Ok(markers)
    }
}

#[async_trait]
pub trait PhotoExtractor: Send + Sync {
    async fn extract(&self, target: &NaiveDateTime) -> ExtractionResult;
}

#[async_trait]
impl PhotoExtractor for HybridExtractor {
    async fn extract(&self, target: &NaiveDateTime) -> ExtractionResult {
        HybridExtractor::extract(self, target).await
    }
}

/// Key/value storage for recovered photos.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Stores `jpeg` under `id` and returns a reference to it.
    async fn save(&self, id: &str, jpeg: &[u8]) -> Result<String>;
}

#[derive(Default)]
pub struct MemoryPhotoStore {
    photos: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPhotoStore {
    pub async fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.photos.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.photos.lock().await.len()
    }
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn save(&self, id: &str, jpeg: &[u8]) -> Result<String> {
        self.photos.lock().await.insert(id.to_string(), jpeg.to_vec());
        Ok(format!("{}.jpg", id))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, jpeg: Option<&[u8]>) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str, jpeg: Option<&[u8]>) -> Result<()> {
        tracing::info!(
            photo_bytes = jpeg.map_or(0, <[u8]>::len),
            "{}",
            text.replace('\n', " | ")
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmRecord {
    pub time: String,
    pub end_time: Option<String>,
    pub type_label: String,
    pub type_code: String,
    pub file: String,
    pub size: usize,
    pub photo: Option<String>,
    pub source: String,
    pub extraction: Option<ExtractionResult>,
}

impl AlarmRecord {
    pub fn from_marker(marker: &EventMarker) -> Self {
        Self {
            time: format_time(&marker.begin),
            end_time: marker.end.as_ref().map(format_time),
            type_label: event_label(&marker.event),
            type_code: marker.event.clone(),
            file: marker.file_name.clone(),
            size: 0,
            photo: None,
            source: "poll".to_string(),
            extraction: None,
        }
    }
}

#[derive(Debug, Default)]
struct AlarmState {
    known: HashSet<String>,
    history: VecDeque<AlarmRecord>,
    polling_active: bool,
    last_run: Option<NaiveDateTime>,
    last_check: Option<NaiveDateTime>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub alarms: Vec<AlarmRecord>,
    pub known_files: usize,
    pub polling_active: bool,
    pub last_run: Option<String>,
    pub last_check: Option<String>,
    pub last_error: Option<String>,
}

/// Known file names, alarm history and poll status behind one lock.
pub struct AlarmStore {
    state: Mutex<AlarmState>,
    history_max: usize,
}

impl AlarmStore {
    pub fn new(history_max: usize) -> Self {
        Self {
            state: Mutex::new(AlarmState::default()),
            history_max: history_max.max(1),
        }
    }

    /// Marks markers as known without creating alarms.
    pub async fn seed(&self, markers: &[EventMarker]) {
        let mut state = self.state.lock().await;
        for marker in markers.iter().filter(|m| !m.file_name.is_empty()) {
            state.known.insert(marker.file_name.clone());
        }
    }

    /// Returns the markers not seen before and marks them as known, in one
    /// critical section.
    pub async fn claim_new(&self, markers: &[EventMarker]) -> Vec<EventMarker> {
        let mut state = self.state.lock().await;
        markers
            .iter()
            .filter(|m| !m.file_name.is_empty() && state.known.insert(m.file_name.clone()))
            .cloned()
            .collect()
    }

    /// Adds a record at the front, evicting the oldest past `history_max`.
    pub async fn push_alarm(&self, record: AlarmRecord) {
        let mut state = self.state.lock().await;
        state.history.push_front(record);
        state.history.truncate(self.history_max);
    }

    /// Fills in the record for `file`. Returns false if it was evicted.
    pub async fn complete(
        &self,
        file: &str,
        photo: Option<String>,
        size: usize,
        extraction: Option<ExtractionResult>,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state.history.iter_mut().find(|r| r.file == file) {
            Some(record) => {
                record.photo = photo;
                record.size = size;
                record.extraction = extraction;
                true
            }
            None => false,
        }
    }

    pub async fn start_run(&self, now: NaiveDateTime) {
        let mut state = self.state.lock().await;
        state.polling_active = true;
        state.last_run = Some(now);
        state.last_error = None;
    }

    pub async fn checked(&self, now: NaiveDateTime) {
        self.state.lock().await.last_check = Some(now);
    }

    pub async fn set_error(&self, error: String) {
        self.state.lock().await.last_error = Some(error);
    }

    pub async fn stop(&self) {
        self.state.lock().await.polling_active = false;
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            alarms: state.history.iter().cloned().collect(),
            known_files: state.known.len(),
            polling_active: state.polling_active,
            last_run: state.last_run.as_ref().map(format_time),
            last_check: state.last_check.as_ref().map(format_time),
            last_error: state.last_error.clone(),
        }
    }
}

/// Photo id derived from the alarm time, e.g. `2024-05-01_10_00_09`.
pub fn photo_id(time: &str) -> String {
    time.replace([':', ' '], "_")
}

pub fn notification_text(record: &AlarmRecord, has_photo: bool) -> String {
    let mut text = format!(
        "Alarm: {}\nTime: {}\nFile: {}",
        record.type_label, record.time, record.file
    );
    if !has_photo {
        text.push_str("\nNo photo could be recovered");
    }
    text
}

#[derive(Clone)]
struct JobContext {
    store: Arc<AlarmStore>,
    extractor: Arc<dyn PhotoExtractor>,
    photos: Arc<dyn PhotoStore>,
    notifier: Arc<dyn Notifier>,
    job_timeout: std::time::Duration,
}

impl JobContext {
    /// Never fails: every error ends up in the store's error slot.
    async fn run(self, record: AlarmRecord, begin: NaiveDateTime) {
        if let Err(e) = self.process(&record, begin).await {
            tracing::warn!("alarm job for {} failed: {}", record.file, e);
            self.store.set_error(e.to_string()).await;
        }
    }

    async fn process(&self, record: &AlarmRecord, begin: NaiveDateTime) -> Result<()> {
        let extraction =
            match tokio::time::timeout(self.job_timeout, self.extractor.extract(&begin)).await {
                Ok(result) => Some(result),
                Err(_) => {
                    let msg = format!("photo extraction for {} timed out", record.file);
                    tracing::warn!("{}", msg);
                    self.store.set_error(msg).await;
                    None
                }
            };

        let (jpeg, extraction) = match extraction {
            Some(mut result) => (result.jpeg.take(), Some(result)),
            None => (None, None),
        };

        let (photo, jpeg) = match jpeg {
            Some(bytes) => match self.photos.save(&photo_id(&record.time), &bytes).await {
                Ok(photo) => (Some(photo), Some(bytes)),
                Err(e) => {
                    tracing::warn!("cannot store photo for {}: {}", record.file, e);
                    self.store.set_error(e.to_string()).await;
                    (None, None)
                }
            },
            None => (None, None),
        };
        let size = jpeg.as_ref().map_or(0, Vec::len);
        if !self.store.complete(&record.file, photo, size, extraction).await {
            tracing::debug!("alarm {} left the history before its job finished", record.file);
        }

        self.notifier
            .notify(&notification_text(record, jpeg.is_some()), jpeg.as_deref())
            .await
    }
}

pub struct AlarmPoller {
    store: Arc<AlarmStore>,
    source: Arc<dyn MarkerSource>,
    jobs: JobContext,
    workers: Arc<Semaphore>,
    config: PollerConfig,
    seeded: bool,
}

impl AlarmPoller {
    pub fn new(
        store: Arc<AlarmStore>,
        source: Arc<dyn MarkerSource>,
        extractor: Arc<dyn PhotoExtractor>,
        photos: Arc<dyn PhotoStore>,
        notifier: Arc<dyn Notifier>,
        config: PollerConfig,
    ) -> Self {
        let jobs = JobContext {
            store: store.clone(),
            extractor,
            photos,
            notifier,
            job_timeout: config.job_timeout(),
        };
        Self {
            store,
            source,
            jobs,
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            seeded: false,
        }
    }

    pub fn store(&self) -> Arc<AlarmStore> {
        self.store.clone()
    }

    /// One discovery cycle. The first successful cycle only seeds the known
    /// set. Returns the handles of the extraction jobs it queued.
    pub async fn poll_once(&mut self, now: NaiveDateTime) -> Vec<JoinHandle<()>> {
        self.store.start_run(now).await;

        let markers = match self.source.recent_markers(now).await {
            Ok(markers) => markers,
            Err(e) => {
                tracing::warn!("alarm scan failed: {}", e);
                self.store.set_error(e.to_string()).await;
                return vec![];
            }
        };

        if !self.seeded {
            self.store.seed(&markers).await;
            self.store.checked(now).await;
            self.seeded = true;
            tracing::info!("seeded {} known alarm files", markers.len());
            return vec![];
        }

        let mut fresh = self.store.claim_new(&markers).await;
        fresh.sort_by(|a, b| a.begin.cmp(&b.begin));
        if !fresh.is_empty() {
            tracing::info!("{} new alarms", fresh.len());
        }

        let mut handles = Vec::with_capacity(fresh.len());
        for marker in fresh {
            let record = AlarmRecord::from_marker(&marker);
            self.store.push_alarm(record.clone()).await;

            let jobs = self.jobs.clone();
            let workers = self.workers.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                jobs.run(record, marker.begin).await;
            }));
        }

        self.store.checked(now).await;
        handles
    }

    /// Polls every `poll_interval` until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let now = Local::now().naive_local();
                    self.poll_once(now).await;
                }
            }
        }
        self.store.stop().await;
        tracing::info!("alarm polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DVRIPError;
    use crate::extractor::{ExtractionReason, SourceTier};
    use crate::marker::{FileKind, parse_time};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSource {
        cycles: Mutex<VecDeque<Result<Vec<EventMarker>>>>,
    }

    impl FakeSource {
        fn new(cycles: Vec<Result<Vec<EventMarker>>>) -> Self {
            Self {
                cycles: Mutex::new(cycles.into()),
            }
        }
    }

    #[async_trait]
    impl MarkerSource for FakeSource {
        async fn recent_markers(&self, _end: NaiveDateTime) -> Result<Vec<EventMarker>> {
            self.cycles.lock().await.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    /// Returns a photo unless the target's seconds are odd.
    #[derive(Default)]
    struct FakeExtractor {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PhotoExtractor for FakeExtractor {
        async fn extract(&self, target: &NaiveDateTime) -> ExtractionResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let found = chrono::Timelike::second(target) % 2 == 0;
            ExtractionResult {
                ok: found,
                reason: if found { ExtractionReason::Ok } else { ExtractionReason::NoPhoto },
                target: format_time(target),
                tier: found.then_some(SourceTier::PhotoMarker),
                chosen_index: found.then_some(0),
                jpeg: found.then(|| vec![0xFF, 0xD8, 0xFF, 0xD9]),
                photo: None,
                motion: None,
            }
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<(String, bool)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, text: &str, jpeg: Option<&[u8]>) -> Result<()> {
            self.sent.lock().await.push((text.to_string(), jpeg.is_some()));
            if self.fail {
                return Err(DVRIPError::ConnectionError("bot unreachable".into()));
            }
            Ok(())
        }
    }

    fn marker(name: &str, begin: &str) -> EventMarker {
        EventMarker {
            file_name: name.to_string(),
            begin: parse_time(begin).unwrap(),
            end: None,
            event: "M".to_string(),
            kind: FileKind::Photo,
        }
    }

    struct Harness {
        poller: AlarmPoller,
        store: Arc<AlarmStore>,
        photos: Arc<MemoryPhotoStore>,
        notifier: Arc<FakeNotifier>,
        extractor: Arc<FakeExtractor>,
    }

    fn harness(
        cycles: Vec<Result<Vec<EventMarker>>>,
        extractor: FakeExtractor,
        notifier: FakeNotifier,
        config: PollerConfig,
    ) -> Harness {
        let store = Arc::new(AlarmStore::new(config.history_max));
        let photos = Arc::new(MemoryPhotoStore::default());
        let notifier = Arc::new(notifier);
        let extractor = Arc::new(extractor);
        let poller = AlarmPoller::new(
            store.clone(),
            Arc::new(FakeSource::new(cycles)),
            extractor.clone(),
            photos.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            poller,
            store,
            photos,
            notifier,
            extractor,
        }
    }

    fn now() -> NaiveDateTime {
        parse_time("2024-05-01 10:10:00").unwrap()
    }

    async fn join(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_cycle_seeds_without_alarms() {
        let mut h = harness(
            vec![Ok(vec![marker("/idea1/a.jpg", "2024-05-01 09:00:00")])],
            FakeExtractor::default(),
            FakeNotifier::default(),
            PollerConfig::default(),
        );
        assert!(h.poller.poll_once(now()).await.is_empty());
        let snap = h.store.snapshot().await;
        assert_eq!(snap.known_files, 1);
        assert!(snap.alarms.is_empty());
        assert!(snap.polling_active);
        assert_eq!(snap.last_check.as_deref(), Some("2024-05-01 10:10:00"));
        assert!(h.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn new_markers_become_alarms_oldest_first() {
        let seed = vec![marker("/idea1/a.jpg", "2024-05-01 09:00:00")];
        let second = vec![
            marker("/idea1/c.jpg", "2024-05-01 10:05:00"),
            marker("/idea1/b.jpg", "2024-05-01 10:03:01"),
            marker("/idea1/a.jpg", "2024-05-01 09:00:00"),
        ];
        let mut h = harness(
            vec![Ok(seed), Ok(second.clone()), Ok(second)],
            FakeExtractor::default(),
            FakeNotifier::default(),
            PollerConfig {
                workers: 1,
                ..Default::default()
            },
        );
        h.poller.poll_once(now()).await;
        let handles = h.poller.poll_once(now()).await;
        assert_eq!(handles.len(), 2);
        join(handles).await;

        let snap = h.store.snapshot().await;
        let files: Vec<&str> = snap.alarms.iter().map(|a| a.file.as_str()).collect();
        assert_eq!(files, vec!["/idea1/c.jpg", "/idea1/b.jpg"]);
        assert_eq!(snap.alarms[0].type_label, "Motion");
        assert_eq!(snap.alarms[0].photo.as_deref(), Some("2024-05-01_10_05_00.jpg"));
        assert_eq!(snap.alarms[0].size, 4);
        assert_eq!(
            snap.alarms[0].extraction.as_ref().map(|e| e.reason),
            Some(ExtractionReason::Ok)
        );
        assert_eq!(snap.alarms[1].photo, None);
        assert!(h.photos.get("2024-05-01_10_05_00").await.is_some());
        assert_eq!(h.photos.len().await, 1);

        // One worker, so notifications follow discovery order.
        let sent = h.notifier.sent.lock().await.clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].0.contains("/idea1/b.jpg"));
        assert!(sent[0].0.contains("No photo could be recovered"));
        assert!(!sent[0].1);
        assert!(sent[1].0.contains("Time: 2024-05-01 10:05:00"));
        assert!(sent[1].1);

        // The same markers again are not processed twice.
        assert!(h.poller.poll_once(now()).await.is_empty());
        assert_eq!(h.store.snapshot().await.alarms.len(), 2);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let fresh = (0..5)
            .map(|i| marker(&format!("/idea1/{}.jpg", i), &format!("2024-05-01 10:0{}:00", i)))
            .collect();
        let mut h = harness(
            vec![Ok(vec![]), Ok(fresh)],
            FakeExtractor::default(),
            FakeNotifier::default(),
            PollerConfig {
                history_max: 3,
                ..Default::default()
            },
        );
        h.poller.poll_once(now()).await;
        join(h.poller.poll_once(now()).await).await;
        let snap = h.store.snapshot().await;
        let files: Vec<&str> = snap.alarms.iter().map(|a| a.file.as_str()).collect();
        assert_eq!(files, vec!["/idea1/4.jpg", "/idea1/3.jpg", "/idea1/2.jpg"]);
        assert_eq!(h.notifier.sent.lock().await.len(), 5);
    }

    #[tokio::test]
    async fn scan_errors_are_recorded_and_delay_seeding() {
        let mut h = harness(
            vec![
                Err(DVRIPError::Timeout("Connection timeout".into())),
                Ok(vec![marker("/idea1/a.jpg", "2024-05-01 09:00:00")]),
                Ok(vec![marker("/idea1/a.jpg", "2024-05-01 09:00:00")]),
            ],
            FakeExtractor::default(),
            FakeNotifier::default(),
            PollerConfig::default(),
        );
        h.poller.poll_once(now()).await;
        let snap = h.store.snapshot().await;
        assert!(snap.last_error.unwrap().contains("Connection timeout"));
        assert_eq!(snap.last_check, None);

        // The next successful cycle seeds; nothing is reported as new.
        assert!(h.poller.poll_once(now()).await.is_empty());
        assert!(h.poller.poll_once(now()).await.is_empty());
        assert_eq!(h.store.snapshot().await.last_error, None);
    }

    #[tokio::test]
    async fn notifier_failure_lands_in_error_slot() {
        let mut h = harness(
            vec![Ok(vec![]), Ok(vec![marker("/idea1/a.jpg", "2024-05-01 10:00:00")])],
            FakeExtractor::default(),
            FakeNotifier {
                fail: true,
                ..Default::default()
            },
            PollerConfig::default(),
        );
        h.poller.poll_once(now()).await;
        join(h.poller.poll_once(now()).await).await;
        let snap = h.store.snapshot().await;
        assert!(snap.last_error.unwrap().contains("bot unreachable"));
        assert!(snap.alarms[0].photo.is_some());
    }

    struct FullDisk;

    #[async_trait]
    impl PhotoStore for FullDisk {
        async fn save(&self, _id: &str, _jpeg: &[u8]) -> Result<String> {
            Err(DVRIPError::IoError(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn photo_store_failure_still_records_and_notifies() {
        let store = Arc::new(AlarmStore::new(10));
        let notifier = Arc::new(FakeNotifier::default());
        let mut poller = AlarmPoller::new(
            store.clone(),
            Arc::new(FakeSource::new(vec![
                Ok(vec![]),
                Ok(vec![marker("/idea1/a.jpg", "2024-05-01 10:00:00")]),
            ])),
            Arc::new(FakeExtractor::default()),
            Arc::new(FullDisk),
            notifier.clone(),
            PollerConfig::default(),
        );
        poller.poll_once(now()).await;
        join(poller.poll_once(now()).await).await;

        let snap = store.snapshot().await;
        assert!(snap.last_error.unwrap().contains("disk full"));
        assert_eq!(snap.alarms.len(), 1);
        assert_eq!(snap.alarms[0].photo, None);
        assert_eq!(snap.alarms[0].size, 0);
        assert_eq!(
            snap.alarms[0].extraction.as_ref().map(|e| e.reason),
            Some(ExtractionReason::Ok)
        );
        let sent = notifier.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("No photo could be recovered"));
        assert!(!sent[0].1);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_share_a_bounded_pool() {
        let fresh = (0..6)
            .map(|i| marker(&format!("/idea1/{}.jpg", i), &format!("2024-05-01 10:0{}:00", i)))
            .collect();
        let mut h = harness(
            vec![Ok(vec![]), Ok(fresh)],
            FakeExtractor {
                delay: Duration::from_secs(5),
                ..Default::default()
            },
            FakeNotifier::default(),
            PollerConfig {
                workers: 2,
                ..Default::default()
            },
        );
        h.poller.poll_once(now()).await;
        join(h.poller.poll_once(now()).await).await;
        assert_eq!(h.extractor.peak.load(Ordering::SeqCst), 2);
        assert_eq!(h.notifier.sent.lock().await.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_extraction_times_out_without_losing_the_alarm() {
        let mut h = harness(
            vec![Ok(vec![]), Ok(vec![marker("/idea1/a.jpg", "2024-05-01 10:00:00")])],
            FakeExtractor {
                delay: Duration::from_secs(600),
                ..Default::default()
            },
            FakeNotifier::default(),
            PollerConfig {
                job_timeout_secs: 60,
                ..Default::default()
            },
        );
        h.poller.poll_once(now()).await;
        join(h.poller.poll_once(now()).await).await;

        let snap = h.store.snapshot().await;
        assert!(snap.last_error.unwrap().contains("timed out"));
        assert_eq!(snap.alarms.len(), 1);
        assert!(snap.alarms[0].photo.is_none());
        let sent = h.notifier.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("No photo could be recovered"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let h = harness(
            vec![Ok(vec![])],
            FakeExtractor::default(),
            FakeNotifier::default(),
            PollerConfig::default(),
        );
        let store = h.poller.store();
        h.poller
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await;
        let snap = store.snapshot().await;
        assert!(!snap.polling_active);
        assert!(snap.last_run.is_some());
    }

    #[test]
    fn photo_ids_and_text() {
        assert_eq!(photo_id("2024-05-01 10:00:09"), "2024-05-01_10_00_09");
        let record = AlarmRecord::from_marker(&marker("/idea1/x.jpg", "2024-05-01 10:00:09"));
        assert_eq!(
            notification_text(&record, true),
            "Alarm: Motion\nTime: 2024-05-01 10:00:09\nFile: /idea1/x.jpg"
        );
    }
}
