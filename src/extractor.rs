//! Per-alarm photo recovery.
//!
//! Photo-marker entries are tried first: their files are short streams taken
//! at the alarm instant, but some firmwares leave a blown-out band at the
//! bottom of every frame. When that happens the nearest motion clip is tried
//! instead, and the corrupted photo is only returned when the clip yields
//! nothing.

use crate::commands::{
    Connection, DownloadRequest, DownloadStats, FileQuery, QueryFilter, download_with_retries,
};
use crate::config::{CameraConfig, ExtractionConfig};
use crate::dvrip::open_session;
use crate::error::{DVRIPError, Result};
use crate::marker::{EventMarker, format_time, pick_closest};
use crate::scorer::{ScoreMode, ScoreReason, ScoreResult, extract_best_jpeg};
use crate::vision::FrameDecoder;
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::time::Duration;

/// Source of index entries and archived files.
#[async_trait]
pub trait Archive: Send + Sync {
    /// False when no login can succeed, so no connection is attempted.
    fn has_credentials(&self) -> bool {
        true
    }

    async fn find_markers(
        &self,
        begin: &NaiveDateTime,
        end: &NaiveDateTime,
        filter: &QueryFilter,
    ) -> Result<Vec<EventMarker>>;

    async fn fetch(&self, marker: &EventMarker) -> Result<(Vec<u8>, DownloadStats)>;
}

/// [`Archive`] backed by a live camera. Every call opens its own sessions.
pub struct CameraArchive {
    camera: CameraConfig,
    download_timeout: Duration,
    retries: usize,
    backoff: Duration,
}

impl CameraArchive {
    pub fn new(camera: CameraConfig, extraction: &ExtractionConfig) -> Self {
        Self {
            camera,
            download_timeout: extraction.download_timeout(),
            retries: extraction.download_retries,
            backoff: extraction.retry_backoff(),
        }
    }
}

#[async_trait]
impl Archive for CameraArchive {
    fn has_credentials(&self) -> bool {
        !self.camera.password.is_empty()
    }

    async fn find_markers(
        &self,
        begin: &NaiveDateTime,
        end: &NaiveDateTime,
        filter: &QueryFilter,
    ) -> Result<Vec<EventMarker>> {
        let mut cam = open_session(&self.camera, self.camera.timeout()).await?;
        let markers = cam.query_markers(begin, end, filter).await;
        let _ = Connection::close(&mut cam).await;
        markers
    }

    async fn fetch(&self, marker: &EventMarker) -> Result<(Vec<u8>, DownloadStats)> {
        let request = DownloadRequest::new(marker.file_name.clone(), marker.begin, marker.end);
        download_with_retries(
            &self.camera,
            &request,
            self.download_timeout,
            self.retries,
            self.backoff,
        )
        .await
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    PhotoMarker,
    MotionFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtractionReason {
    Ok,
    OkFallbackMotion,
    OkButBottomWhite,
    NoPhoto,
    EmptyPassword,
    DvripLoginFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryWindow {
    pub begin: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    pub ok: bool,
    pub bytes: usize,
    pub packets: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractOutcome {
    pub ok: bool,
    pub reason: ScoreReason,
    pub chosen_frame_index: Option<usize>,
    pub bottom_white_ratio: Option<f64>,
    pub frames_decoded: usize,
}

/// What one tier did, step by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierDiagnostics {
    pub window: Option<QueryWindow>,
    pub count: usize,
    pub picked: Option<EventMarker>,
    pub download: Option<DownloadOutcome>,
    pub extract: Option<ExtractOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub ok: bool,
    pub reason: ExtractionReason,
    pub target: String,
    pub tier: Option<SourceTier>,
    pub chosen_index: Option<usize>,
    #[serde(skip)]
    pub jpeg: Option<Vec<u8>>,
    pub photo: Option<TierDiagnostics>,
    pub motion: Option<TierDiagnostics>,
}

impl ExtractionResult {
    fn failed(target: &NaiveDateTime, reason: ExtractionReason) -> Self {
        Self {
            ok: false,
            reason,
            target: format_time(target),
            tier: None,
            chosen_index: None,
            jpeg: None,
            photo: None,
            motion: None,
        }
    }

    fn accepted(&mut self, reason: ExtractionReason, tier: SourceTier, scored: ScoreResult) {
        self.ok = true;
        self.reason = reason;
        self.tier = Some(tier);
        self.chosen_index = scored.chosen_index();
        self.jpeg = scored.jpeg;
    }
}

struct TierPlan<'a> {
    tier: SourceTier,
    half_window: TimeDelta,
    filter: QueryFilter,
    samples: &'a [usize],
    mode: ScoreMode,
}

struct TierRun {
    diag: TierDiagnostics,
    scored: Option<ScoreResult>,
    login_failed: bool,
}

/// Recovers one JPEG per alarm timestamp from an [`Archive`].
pub struct HybridExtractor {
    archive: Arc<dyn Archive>,
    config: ExtractionConfig,
    decoder: Arc<dyn FrameDecoder>,
}

impl HybridExtractor {
    pub fn new(
        archive: Arc<dyn Archive>,
        config: ExtractionConfig,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Self {
        Self {
            archive,
            config,
            decoder,
        }
    }

    pub async fn extract(&self, target: &NaiveDateTime) -> ExtractionResult {
        if !self.archive.has_credentials() {
            return ExtractionResult::failed(target, ExtractionReason::EmptyPassword);
        }

        let photo_plan = TierPlan {
            tier: SourceTier::PhotoMarker,
            half_window: self.config.photo_window(),
            filter: QueryFilter::photo_markers(),
            samples: &self.config.photo_samples,
            mode: ScoreMode::Content,
        };
        let photo = self.run_tier(target, &photo_plan).await;
        if photo.login_failed {
            let mut result = ExtractionResult::failed(target, ExtractionReason::DvripLoginFailed);
            result.photo = Some(photo.diag);
            return result;
        }

        let mut result = ExtractionResult::failed(target, ExtractionReason::NoPhoto);
        result.photo = Some(photo.diag);

        // An unmeasurable frame is treated like a corrupted one.
        let mut photo_scored = photo.scored.filter(|s| s.ok && s.jpeg.is_some());
        if let Some(scored) = photo_scored.take_if(|s| s.is_corrupted() == Some(false)) {
            tracing::info!(
                "alarm {}: photo marker frame {:?} accepted",
                result.target,
                scored.chosen_index()
            );
            result.accepted(ExtractionReason::Ok, SourceTier::PhotoMarker, scored);
            return result;
        }
        if photo_scored.is_some() {
            tracing::warn!(
                "alarm {}: photo marker frame has a white bottom band, trying motion clip",
                result.target
            );
        }

        let motion_plan = TierPlan {
            tier: SourceTier::MotionFallback,
            half_window: self.config.motion_window(),
            filter: QueryFilter::motion_clips(),
            samples: &self.config.motion_samples,
            mode: ScoreMode::Sharpness,
        };
        let motion = self.run_tier(target, &motion_plan).await;
        result.motion = Some(motion.diag);

        if let Some(scored) = motion.scored.filter(|s| s.ok && s.jpeg.is_some()) {
            tracing::info!(
                "alarm {}: motion clip frame {:?} accepted",
                result.target,
                scored.chosen_index()
            );
            result.accepted(
                ExtractionReason::OkFallbackMotion,
                SourceTier::MotionFallback,
                scored,
            );
            return result;
        }

        match photo_scored {
            Some(scored) => {
                tracing::warn!(
                    "alarm {}: no motion frame, returning corrupted photo marker frame",
                    result.target
                );
                result.accepted(
                    ExtractionReason::OkButBottomWhite,
                    SourceTier::PhotoMarker,
                    scored,
                );
            }
            None => tracing::warn!("alarm {}: no photo recovered", result.target),
        }
        result
    }

    async fn run_tier(&self, target: &NaiveDateTime, plan: &TierPlan<'_>) -> TierRun {
        let begin = *target - plan.half_window;
        let end = *target + plan.half_window;
        let mut run = TierRun {
            diag: TierDiagnostics {
                window: Some(QueryWindow {
                    begin: format_time(&begin),
                    end: format_time(&end),
                }),
                ..Default::default()
            },
            scored: None,
            login_failed: false,
        };

        let markers = match self.archive.find_markers(&begin, &end, &plan.filter).await {
            Ok(markers) => markers,
            Err(e) => {
                tracing::warn!("{} index query failed: {}", plan.tier, e);
                run.login_failed = matches!(e, DVRIPError::AuthenticationError(_));
                run.diag.error = Some(e.to_string());
                return run;
            }
        };
        run.diag.count = markers.len();

        let Some(picked) = pick_closest(&markers, target).cloned() else {
            tracing::debug!("{}: no entries around {}", plan.tier, format_time(target));
            return run;
        };
        run.diag.picked = Some(picked.clone());

        let payload = match self.archive.fetch(&picked).await {
            Ok((payload, stats)) => {
                run.diag.download = Some(DownloadOutcome {
                    ok: true,
                    bytes: payload.len(),
                    packets: stats.packets,
                    error: None,
                });
                payload
            }
            Err(e) => {
                tracing::warn!("{}: download of {} failed: {}", plan.tier, picked.file_name, e);
                run.diag.download = Some(DownloadOutcome {
                    ok: false,
                    bytes: 0,
                    packets: 0,
                    error: Some(e.to_string()),
                });
                run.diag.error = Some(e.to_string());
                return run;
            }
        };

        match self.score(payload, plan.samples, plan.mode).await {
            Ok(scored) => {
                run.diag.extract = Some(ExtractOutcome {
                    ok: scored.ok,
                    reason: scored.reason,
                    chosen_frame_index: scored.chosen_index(),
                    bottom_white_ratio: scored.chosen.as_ref().map(|c| c.bottom_white_ratio),
                    frames_decoded: scored.frames_decoded,
                });
                run.scored = Some(scored);
            }
            Err(e) => run.diag.error = Some(e.to_string()),
        }
        run
    }

    /// Decoding is CPU-bound and runs off the async workers.
    async fn score(&self, payload: Vec<u8>, samples: &[usize], mode: ScoreMode) -> Result<ScoreResult> {
        let decoder = Arc::clone(&self.decoder);
        let samples = samples.to_vec();
        let thresholds = self.config.thresholds.clone();
        tokio::task::spawn_blocking(move || {
            extract_best_jpeg(payload, decoder.as_ref(), &samples, mode, &thresholds)
        })
        .await
        .map_err(|e| DVRIPError::DecodeError(format!("scoring task failed: {}", e)))
    }
}
