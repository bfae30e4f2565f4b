use crate::demux::{demux_with_stats, extract_largest_jpeg};
use crate::vision::{
    FrameDecoder, Gray, bottom_band_metrics, encode_jpeg, laplacian_variance,
    low_saturation_ratio, mean_std,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::{AsRefStr, Display, EnumString};

/// How candidate frames are ranked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// `(sharpness + w * contrast) * max(0, 1 - low_saturation_ratio)`.
    /// Favours frames with real scene content over gray decoder fill.
    Content,
    /// Laplacian variance alone.
    Sharpness,
}

/// Empirical thresholds, tuned on one camera model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Bottom-band white ratio at or above which a frame counts as corrupted.
    pub bottom_white_ratio: f64,
    /// Gray level above which a pixel counts as white.
    pub white_level: u8,
    /// HSV saturation below which a pixel counts as colourless.
    pub low_saturation: u8,
    /// Share of the frame height, from the bottom, inspected for corruption.
    pub bottom_fraction: f64,
    /// Bottom-band standard deviation below which the band counts as flat.
    pub flat_bottom_std: f64,
    pub content_contrast_weight: f64,
    pub jpeg_quality: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            bottom_white_ratio: 0.25,
            white_level: 245,
            low_saturation: 18,
            bottom_fraction: 0.35,
            flat_bottom_std: 6.0,
            content_contrast_weight: 5.0,
            jpeg_quality: 92,
        }
    }
}

/// Metrics for one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameCandidate {
    pub index: usize,
    pub sharpness: f64,
    pub contrast: f64,
    pub low_saturation_ratio: f64,
    pub bottom_white_ratio: f64,
    pub bottom_std: f64,
    pub score: f64,
    pub corrupted: bool,
    pub flat_bottom: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScoreReason {
    Ok,
    EmbeddedJpeg,
    EmptyStream,
    FailedToExtractStream,
    DecoderFailedToOpen,
    NoFramesDecoded,
    JpegEncodeFailed,
}

/// Outcome of scoring one downloaded payload.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub ok: bool,
    pub reason: ScoreReason,
    #[serde(skip)]
    pub jpeg: Option<Vec<u8>>,
    pub chosen: Option<FrameCandidate>,
    pub frames_decoded: usize,
    pub candidates: Vec<FrameCandidate>,
    pub error: Option<String>,
}

impl ScoreResult {
    fn failed(reason: ScoreReason) -> Self {
        Self {
            ok: false,
            reason,
            jpeg: None,
            chosen: None,
            frames_decoded: 0,
            candidates: vec![],
            error: None,
        }
    }

    pub fn chosen_index(&self) -> Option<usize> {
        self.chosen.as_ref().map(|c| c.index)
    }

    /// `None` when the returned image could not be measured.
    pub fn is_corrupted(&self) -> Option<bool> {
        self.chosen.as_ref().map(|c| c.corrupted)
    }
}

pub fn score_frame(
    frame: &RgbImage,
    index: usize,
    mode: ScoreMode,
    thresholds: &Thresholds,
) -> FrameCandidate {
    let gray = Gray::from_rgb(frame);
    let sharpness = laplacian_variance(&gray);
    let (_, contrast) = mean_std(&gray.data);
    let low_saturation = low_saturation_ratio(frame, thresholds.low_saturation);
    let (bottom_white_ratio, bottom_std) =
        bottom_band_metrics(&gray, thresholds.bottom_fraction, thresholds.white_level);

    let score = match mode {
        ScoreMode::Content => {
            (sharpness + thresholds.content_contrast_weight * contrast)
                * (1.0 - low_saturation).max(0.0)
        }
        ScoreMode::Sharpness => sharpness,
    };

    FrameCandidate {
        index,
        sharpness,
        contrast,
        low_saturation_ratio: low_saturation,
        bottom_white_ratio,
        bottom_std,
        score,
        corrupted: bottom_white_ratio >= thresholds.bottom_white_ratio,
        flat_bottom: bottom_std < thresholds.flat_bottom_std,
    }
}

/// Whether `candidate` displaces the current leader. Ties keep the leader,
/// so the first-seen index wins.
fn beats(candidate: &FrameCandidate, leader: Option<&FrameCandidate>) -> bool {
    leader.is_none_or(|leader| candidate.score > leader.score)
}

/// Decodes `stream` frame by frame and scores the frames at `samples`.
///
/// Decoding is sequential only; it stops after the largest requested index
/// or at the first decode failure. Only the leading frame's pixels are kept
/// between iterations.
pub fn score_stream(
    stream: &[u8],
    decoder: &dyn FrameDecoder,
    samples: &[usize],
    mode: ScoreMode,
    thresholds: &Thresholds,
) -> ScoreResult {
    let targets: BTreeSet<usize> = samples.iter().copied().collect();
    let Some(&max_index) = targets.iter().next_back() else {
        return ScoreResult::failed(ScoreReason::NoFramesDecoded);
    };

    let mut reader = match decoder.open(stream) {
        Ok(reader) => reader,
        Err(e) => {
            let mut result = ScoreResult::failed(ScoreReason::DecoderFailedToOpen);
            result.error = Some(e.to_string());
            return result;
        }
    };

    let mut candidates = Vec::new();
    let mut best: Option<(usize, RgbImage)> = None;
    let mut frames_decoded = 0;
    let mut error = None;

    for index in 0..=max_index {
        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        };
        frames_decoded += 1;
        if !targets.contains(&index) {
            continue;
        }
        let candidate = score_frame(&frame, index, mode, thresholds);
        tracing::debug!(
            "frame {} score {:.1} sharp {:.1} bottom_white {:.3}",
            index,
            candidate.score,
            candidate.sharpness,
            candidate.bottom_white_ratio
        );
        let leads = beats(&candidate, best.as_ref().map(|(pos, _)| &candidates[*pos]));
        candidates.push(candidate);
        if leads {
            best = Some((candidates.len() - 1, frame));
        }
    }

    let Some((pos, frame)) = best else {
        let mut result = ScoreResult::failed(ScoreReason::NoFramesDecoded);
        result.frames_decoded = frames_decoded;
        result.error = error;
        return result;
    };
    let chosen = candidates[pos].clone();

    match encode_jpeg(&frame, thresholds.jpeg_quality) {
        Ok(jpeg) => ScoreResult {
            ok: true,
            reason: ScoreReason::Ok,
            jpeg: Some(jpeg),
            chosen: Some(chosen),
            frames_decoded,
            candidates,
            error,
        },
        Err(e) => ScoreResult {
            ok: false,
            reason: ScoreReason::JpegEncodeFailed,
            jpeg: None,
            chosen: Some(chosen),
            frames_decoded,
            candidates,
            error: Some(e.to_string()),
        },
    }
}

/// Measures an embedded JPEG so it can be judged like a decoded frame.
fn measure_jpeg(jpeg: &[u8], thresholds: &Thresholds) -> Option<FrameCandidate> {
    let frame = image::load_from_memory(jpeg).ok()?.to_rgb8();
    Some(score_frame(&frame, 0, ScoreMode::Content, thresholds))
}

/// Full path from a downloaded payload to a JPEG: demux, decode and score,
/// then fall back to a literal JPEG embedded in the stream.
pub fn extract_best_jpeg(
    payload: Vec<u8>,
    decoder: &dyn FrameDecoder,
    samples: &[usize],
    mode: ScoreMode,
    thresholds: &Thresholds,
) -> ScoreResult {
    if payload.is_empty() {
        return ScoreResult::failed(ScoreReason::EmptyStream);
    }
    let (stream, stats) = demux_with_stats(payload);
    if stream.is_empty() {
        return ScoreResult::failed(ScoreReason::FailedToExtractStream);
    }
    tracing::debug!("demuxed {} bytes: {:?}", stream.len(), stats);

    let scored = score_stream(stream.as_bytes(), decoder, samples, mode, thresholds);
    if scored.chosen.is_some() {
        return scored;
    }

    match extract_largest_jpeg(stream.as_bytes()) {
        Some(jpeg) => {
            tracing::debug!("using embedded JPEG of {} bytes", jpeg.len());
            ScoreResult {
                ok: true,
                reason: ScoreReason::EmbeddedJpeg,
                chosen: measure_jpeg(&jpeg, thresholds),
                jpeg: Some(jpeg),
                frames_decoded: 0,
                candidates: vec![],
                error: scored.error,
            }
        }
        None => scored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DVRIPError, Result};
    use crate::vision::FrameReader;
    use image::Rgb;
    use std::collections::VecDeque;

    struct ScriptedDecoder {
        frames: Vec<RgbImage>,
        fail_after: Option<usize>,
    }

    struct ScriptedReader {
        frames: VecDeque<RgbImage>,
        remaining_ok: Option<usize>,
    }

    impl FrameDecoder for ScriptedDecoder {
        fn open<'a>(&self, _stream: &'a [u8]) -> Result<Box<dyn FrameReader + 'a>> {
            Ok(Box::new(ScriptedReader {
                frames: self.frames.iter().cloned().collect(),
                remaining_ok: self.fail_after,
            }))
        }
    }

    impl FrameReader for ScriptedReader {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if let Some(n) = self.remaining_ok.as_mut() {
                if *n == 0 {
                    return Err(DVRIPError::DecodeError("bitstream error".into()));
                }
                *n -= 1;
            }
            Ok(self.frames.pop_front())
        }
    }

    fn flat(level: u8) -> RgbImage {
        RgbImage::from_pixel(32, 20, Rgb([level, level / 2, level / 3]))
    }

    fn stripes(period: u32) -> RgbImage {
        RgbImage::from_fn(32, 20, |x, _| {
            if (x / period) % 2 == 0 { Rgb([200, 40, 40]) } else { Rgb([20, 20, 120]) }
        })
    }

    fn candidate(index: usize, score: f64) -> FrameCandidate {
        FrameCandidate {
            index,
            sharpness: score,
            contrast: 0.0,
            low_saturation_ratio: 0.0,
            bottom_white_ratio: 0.0,
            bottom_std: 10.0,
            score,
            corrupted: false,
            flat_bottom: false,
        }
    }

    #[test]
    fn highest_score_wins() {
        assert!(beats(&candidate(0, 90.0), None));
        assert!(beats(&candidate(60, 150.0), Some(&candidate(0, 90.0))));
        assert!(!beats(&candidate(90, 120.0), Some(&candidate(60, 150.0))));

        let decoder = ScriptedDecoder {
            frames: vec![stripes(4), stripes(1), stripes(2)],
            fail_after: None,
        };
        let result = score_stream(&[1], &decoder, &[0, 1, 2], ScoreMode::Sharpness, &Thresholds::default());
        assert_eq!(result.chosen_index(), Some(1));
    }

    #[test]
    fn tie_keeps_first_seen() {
        assert!(!beats(&candidate(30, 5.0), Some(&candidate(10, 5.0))));

        let decoder = ScriptedDecoder {
            frames: vec![flat(90), stripes(2), stripes(2)],
            fail_after: None,
        };
        let result = score_stream(&[1], &decoder, &[1, 2], ScoreMode::Sharpness, &Thresholds::default());
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.candidates[0].score, result.candidates[1].score);
        assert_eq!(result.chosen_index(), Some(1));
    }

    #[test]
    fn content_score_discounts_colourless_frames() {
        let thresholds = Thresholds::default();
        let gray = RgbImage::from_fn(32, 20, |x, _| {
            if x % 2 == 0 { Rgb([200, 200, 200]) } else { Rgb([30, 30, 30]) }
        });
        let c = score_frame(&gray, 0, ScoreMode::Content, &thresholds);
        assert_eq!(c.low_saturation_ratio, 1.0);
        assert_eq!(c.score, 0.0);
        let s = score_frame(&gray, 0, ScoreMode::Sharpness, &thresholds);
        assert!(s.score > 0.0);
        assert_eq!(s.score, s.sharpness);
    }

    #[test]
    fn corruption_flag_follows_bottom_band() {
        let thresholds = Thresholds::default();
        let frame = RgbImage::from_fn(32, 20, |_, y| {
            if y >= 12 { Rgb([255, 255, 255]) } else { Rgb([120, 60, 30]) }
        });
        let c = score_frame(&frame, 3, ScoreMode::Content, &thresholds);
        assert!(c.bottom_white_ratio > 0.9);
        assert!(c.corrupted);
        assert!(c.flat_bottom);

        let clean = score_frame(&stripes(2), 3, ScoreMode::Content, &thresholds);
        assert!(!clean.corrupted);
    }

    #[test]
    fn only_sampled_frames_are_scored() {
        let decoder = ScriptedDecoder {
            frames: vec![flat(100), stripes(1), flat(100), stripes(4), flat(100)],
            fail_after: None,
        };
        let result = score_stream(&[1], &decoder, &[0, 3], ScoreMode::Sharpness, &Thresholds::default());
        assert!(result.ok);
        assert_eq!(result.frames_decoded, 4);
        let indexes: Vec<usize> = result.candidates.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 3]);
        assert_eq!(result.chosen_index(), Some(3));
        assert!(result.jpeg.is_some());
    }

    #[test]
    fn decode_failure_keeps_earlier_candidates() {
        let decoder = ScriptedDecoder {
            frames: vec![stripes(2), stripes(1), stripes(1)],
            fail_after: Some(1),
        };
        let result = score_stream(&[1], &decoder, &[0, 2], ScoreMode::Sharpness, &Thresholds::default());
        assert!(result.ok);
        assert_eq!(result.chosen_index(), Some(0));
        assert!(result.error.is_some());
    }

    #[test]
    fn no_decodable_frames() {
        let decoder = ScriptedDecoder {
            frames: vec![],
            fail_after: None,
        };
        let result = score_stream(&[1], &decoder, &[0, 10], ScoreMode::Content, &Thresholds::default());
        assert!(!result.ok);
        assert_eq!(result.reason, ScoreReason::NoFramesDecoded);
    }

    #[test]
    fn empty_payload_and_unusable_container() {
        let decoder = ScriptedDecoder {
            frames: vec![flat(1)],
            fail_after: None,
        };
        let t = Thresholds::default();
        let r = extract_best_jpeg(vec![], &decoder, &[0], ScoreMode::Content, &t);
        assert_eq!(r.reason, ScoreReason::EmptyStream);
        let r = extract_best_jpeg(vec![0xAB; 64], &decoder, &[0], ScoreMode::Content, &t);
        assert_eq!(r.reason, ScoreReason::FailedToExtractStream);
    }

    #[test]
    fn embedded_jpeg_is_the_secondary_path() {
        // A busy picture, so the encoded file clears the minimum embedded size.
        let big = encode_jpeg(
            &RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8])),
            92,
        )
        .unwrap();
        assert!(big.len() > 1000);

        let mut payload = vec![0, 0, 0, 1, 0x09, 0x10];
        payload.extend_from_slice(&big);

        let decoder = crate::vision::NoH264Decoder;
        let r = extract_best_jpeg(payload, &decoder, &[0], ScoreMode::Content, &Thresholds::default());
        assert!(r.ok);
        assert_eq!(r.reason, ScoreReason::EmbeddedJpeg);
        assert_eq!(r.jpeg.as_deref(), Some(big.as_slice()));
        assert_eq!(r.is_corrupted(), Some(false));
    }

    #[test]
    fn mode_names() {
        assert_eq!(ScoreMode::Content.to_string(), "content");
        assert_eq!("sharpness".parse::<ScoreMode>().unwrap(), ScoreMode::Sharpness);
        assert_eq!(ScoreReason::FailedToExtractStream.as_ref(), "failed_to_extract_stream");
    }
}
