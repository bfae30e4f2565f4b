//! Backward walk over the camera's event index.
//!
//! `OPFileQuery` silently truncates long answers, so the index is read in
//! small windows ending at a cursor that moves back in time. A window that
//! comes back at the cap guard is halved and re-queried at the same cursor;
//! a window that comes back sparse is doubled for the next step.

use crate::commands::{Connection, FileQuery, QueryFilter};
use crate::config::{CameraConfig, ScannerConfig};
use crate::dvrip::{DVRIPCam, open_session};
use crate::error::{DVRIPError, Result};
use crate::marker::{EventMarker, MarkerKey, format_time};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::collections::HashSet;

/// One window's worth of index rows.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    /// Rows as returned, before any parsing. Compared against the cap guard.
    pub raw: usize,
    pub markers: Vec<EventMarker>,
}

#[async_trait]
pub trait FileIndex: Send {
    async fn query_window(&mut self, begin: &NaiveDateTime, end: &NaiveDateTime) -> Result<IndexPage>;
}

#[async_trait]
impl FileIndex for DVRIPCam {
    async fn query_window(&mut self, begin: &NaiveDateTime, end: &NaiveDateTime) -> Result<IndexPage> {
        let filter = QueryFilter::photo_markers();
        let rows = self.query_files(begin, end, &filter).await?;
        let markers = rows
            .iter()
            .filter_map(|row| EventMarker::from_row(row, filter.kind, &filter.event))
            .collect();
        Ok(IndexPage {
            raw: rows.len(),
            markers,
        })
    }
}

/// Cursor state of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWindow {
    pub cursor_end: NaiveDateTime,
    pub width: TimeDelta,
    pub oldest_allowed: NaiveDateTime,
    pub cap_guard: usize,
    min_width: TimeDelta,
    max_width: TimeDelta,
}

impl ScanWindow {
    pub fn new(end: NaiveDateTime, config: &ScannerConfig) -> Self {
        Self {
            cursor_end: end,
            width: config.initial_chunk(),
            oldest_allowed: end
                .checked_sub_signed(config.lookback())
                .unwrap_or(NaiveDateTime::MIN),
            cap_guard: config.cap_guard,
            min_width: config.min_chunk(),
            max_width: config.max_chunk(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.cursor_end <= self.oldest_allowed
    }

    /// Start of the next query, never older than the lookback horizon.
    pub fn begin(&self) -> NaiveDateTime {
        (self.cursor_end - self.width).max(self.oldest_allowed)
    }

    /// Halves the width if the answer looks truncated. Returns whether the
    /// same cursor must be queried again.
    pub fn shrink_if_capped(&mut self, raw: usize) -> bool {
        if raw >= self.cap_guard && self.width > self.min_width {
            let half = TimeDelta::seconds(self.width.num_seconds() / 2);
            self.width = half.max(self.min_width);
            return true;
        }
        false
    }

    /// Moves the cursor to the start of the accepted window, widening it
    /// when the window held fewer than `sparse_below` rows.
    pub fn advance(&mut self, begin: NaiveDateTime, raw: usize, sparse_below: usize) {
        self.cursor_end = begin;
        if raw < sparse_below {
            self.width = (self.width * 2).min(self.max_width);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMeta {
    pub begin: String,
    pub end: String,
    pub raw: usize,
    pub parsed: usize,
    pub chunk_sec: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanMeta {
    pub chunks: Vec<ChunkMeta>,
    pub count: usize,
    pub max_time: Option<String>,
}

/// Collects up to `config.want` markers ending at `end`, newest first.
pub async fn scan_recent<I>(
    index: &mut I,
    end: NaiveDateTime,
    config: &ScannerConfig,
) -> Result<(Vec<EventMarker>, ScanMeta)>
where
    I: FileIndex + ?Sized,
{
    let want = config.want;
    let sparse_below = (want / 3).max(1);
    let mut window = ScanWindow::new(end, config);
    let mut seen: HashSet<MarkerKey> = HashSet::new();
    let mut collected: Vec<EventMarker> = Vec::new();
    let mut meta = ScanMeta::default();

    while !window.exhausted() && collected.len() < want {
        let begin = window.begin();
        let page = index.query_window(&begin, &window.cursor_end).await?;
        meta.chunks.push(ChunkMeta {
            begin: format_time(&begin),
            end: format_time(&window.cursor_end),
            raw: page.raw,
            parsed: page.markers.len(),
            chunk_sec: window.width.num_seconds(),
        });

        if window.shrink_if_capped(page.raw) {
            tracing::debug!(
                "index window ending {} capped at {} rows, narrowing to {}s",
                format_time(&window.cursor_end),
                page.raw,
                window.width.num_seconds()
            );
            continue;
        }

        for marker in page.markers {
            if seen.insert(marker.key()) {
                collected.push(marker);
            }
        }
        window.advance(begin, page.raw, sparse_below);
    }

    collected.sort_by(|a, b| b.begin.cmp(&a.begin));
    meta.count = collected.len();
    meta.max_time = collected.first().map(|m| format_time(&m.begin));
    collected.truncate(want);

    tracing::debug!(
        "index scan: {} markers over {} queries",
        meta.count,
        meta.chunks.len()
    );
    Ok((collected, meta))
}

/// Logs in, scans, and logs out again.
pub async fn scan_camera(
    camera: &CameraConfig,
    end: NaiveDateTime,
    config: &ScannerConfig,
) -> Result<(Vec<EventMarker>, ScanMeta)> {
    if camera.password.is_empty() {
        return Err(DVRIPError::AuthenticationError("empty password".to_string()));
    }
    let mut cam = open_session(camera, camera.timeout()).await?;
    let result = scan_recent(&mut cam, end, config).await;
    let _ = Connection::close(&mut cam).await;
    result
}
