use crate::commands::Connection;
use crate::config::CameraConfig;
use crate::constants::{ARCHIVE_STREAM, OK_CODES, PLAYBACK_CLAIM, PLAYBACK_CONTROL};
use crate::dvrip::{open_session, open_stream};
use crate::error::Result;
use crate::marker::format_time;
use crate::protocol::{receive_tagged_packet, send_packet};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use tokio::io::AsyncWriteExt;
use tokio::time::Duration;

/// Which archived file to fetch, and over what time span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub file_name: String,
    pub begin: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

impl DownloadRequest {
    pub fn new(file_name: impl Into<String>, begin: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        Self {
            file_name: file_name.into(),
            begin,
            end,
        }
    }

    /// Some firmwares reject a playback whose start equals its end, so a
    /// missing or equal end time becomes `begin + 1s`.
    pub fn effective_end(&self) -> NaiveDateTime {
        match self.end {
            Some(end) if end != self.begin => end,
            _ => self.begin + TimeDelta::seconds(1),
        }
    }

    pub fn playback_request(&self, session_hex: &str) -> Value {
        json!({
            "Name": "OPPlayBack",
            "SessionID": session_hex,
            "OPPlayBack": {
                "Action": "DownloadStart",
                "Parameter": {
                    "FileName": self.file_name,
                    "TransMode": "TCP",
                    "Value": 0,
                },
                "StartTime": format_time(&self.begin),
                "EndTime": format_time(&self.effective_end()),
            },
        })
    }
}

/// Control-socket acknowledgement of `DownloadStart`.
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackAck {
    #[serde(rename = "Ret")]
    pub ret: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub packets: usize,
    pub bytes: usize,
}

/// Downloads one archived file over a dedicated data socket.
///
/// A fresh control session is opened for the transfer. The playback request
/// goes out on the data socket (as a claim) and on the control socket (as a
/// start); the camera needs both. Payloads of archive-stream packets are
/// concatenated until a packet arrives with its terminal flag set.
pub async fn download_archive(
    camera: &CameraConfig,
    request: &DownloadRequest,
    timeout: Duration,
) -> Result<(Vec<u8>, DownloadStats)> {
    let mut control = open_session(camera, timeout).await?;
    let result = async {
        let mut data = open_stream(&camera.host, camera.port, timeout).await?;
        let playback = request.playback_request(&control.session_hex());

        let transfer = async {
            send_packet(&mut data, control.session_id(), 0, PLAYBACK_CLAIM, &playback).await?;

            let ack: PlaybackAck = control
                .send(PLAYBACK_CONTROL, &playback)
                .await?
                .and_then(|reply| serde_json::from_value(reply).ok())
                .unwrap_or_default();
            if let Some(ret) = ack.ret
                && !OK_CODES.contains(&ret)
            {
                tracing::warn!("DownloadStart for {} answered with {}", request.file_name, ret);
            }

            let mut payload = Vec::new();
            let mut stats = DownloadStats::default();
            loop {
                let (header, body) = receive_tagged_packet(&mut data, timeout).await?;
                stats.packets += 1;
                if header.msg_id == ARCHIVE_STREAM && !body.is_empty() {
                    payload.extend_from_slice(&body);
                }
                if header.is_terminal() {
                    break;
                }
            }
            stats.bytes = payload.len();
            Ok((payload, stats))
        }
        .await;

        let _ = data.shutdown().await;
        transfer
    }
    .await;

    let _ = Connection::close(&mut control).await;

    if let Ok((_, stats)) = &result {
        tracing::debug!(
            "downloaded {} ({} packets, {} bytes)",
            request.file_name,
            stats.packets,
            stats.bytes
        );
    }
    result
}

/// Runs `attempt` until it succeeds, it fails with an error that is not
/// retryable, or `retries` extra attempts have been spent. The last error is
/// returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(retries: usize, backoff: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retries + 1;
    let mut n = 1;
    loop {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if n < attempts && e.is_retryable() => {
                tracing::warn!("attempt {}/{} failed: {}; retrying", n, attempts, e);
                tokio::time::sleep(backoff).await;
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn download_with_retries(
    camera: &CameraConfig,
    request: &DownloadRequest,
    timeout: Duration,
    retries: usize,
    backoff: Duration,
) -> Result<(Vec<u8>, DownloadStats)> {
    retry_with_backoff(retries, backoff, |_| download_archive(camera, request, timeout)).await
}
