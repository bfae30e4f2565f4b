//! Unwrapping of the archive media container.
//!
//! Archive downloads arrive as a sequence of tagged blocks. Each block starts
//! with a big-endian 32-bit tag followed by a tag-specific sub-header that
//! carries the payload length:
//!
//! | tag          | sub-header | length field                     |
//! |--------------|------------|----------------------------------|
//! | `0x1FC/1FE`  | 12 bytes   | little-endian u32 at bytes 8..12 |
//! | `0x1FD`      | 4 bytes    | little-endian u32                |
//! | `0x1F9/1FA`  | 4 bytes    | little-endian u16 at bytes 2..4  |
//! | `0xFFD8FFE0` | none       | the four tag bytes are payload   |
//!
//! The container is not strictly framed. An unknown tag is skipped one byte
//! at a time until a known tag lines up again.

use crate::constants::{
    TAG_AUDIO, TAG_AUX_AUDIO, TAG_AUX_INFO, TAG_JPEG_SOI, TAG_VIDEO_I, TAG_VIDEO_JPEG,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MIN_EMBEDDED_JPEG: usize = 1000;

/// Raw codec bitstream with the container removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementaryStream(Vec<u8>);

impl ElementaryStream {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub video_blocks: usize,
    pub audio_blocks: usize,
    pub aux_blocks: usize,
    pub jpeg_markers: usize,
    pub resync_steps: usize,
    pub passthrough: bool,
}

/// True when `data` already starts with an Annex B start code and a valid
/// NAL header. Container tags `0x000001F9..0x000001FE` never match: their
/// fourth byte has the forbidden bit set.
pub fn looks_elementary(data: &[u8]) -> bool {
    let nal_header = if data.starts_with(&[0, 0, 0, 1]) {
        data.get(4)
    } else if data.starts_with(&[0, 0, 1]) {
        data.get(3)
    } else {
        None
    };
    matches!(nal_header, Some(b) if b & 0x80 == 0)
}

pub fn demux(payload: Vec<u8>) -> ElementaryStream {
    demux_with_stats(payload).0
}

/// Consumes a downloaded payload and returns the concatenated block payloads.
/// Input that already looks elementary is passed through untouched.
pub fn demux_with_stats(payload: Vec<u8>) -> (ElementaryStream, DemuxStats) {
    let mut stats = DemuxStats::default();
    if looks_elementary(&payload) {
        stats.passthrough = true;
        return (ElementaryStream(payload), stats);
    }

    let data = payload.as_slice();
    let mut out = Vec::with_capacity(data.len());
    let mut cursor = 0usize;
    let mut remain = 0usize;

    while cursor < data.len() {
        if remain == 0 {
            if cursor + 4 > data.len() {
                break;
            }
            let tag = BigEndian::read_u32(&data[cursor..cursor + 4]);
            cursor += 4;

            match tag {
                TAG_VIDEO_I | TAG_VIDEO_JPEG => {
                    if cursor + 12 > data.len() {
                        break;
                    }
                    remain = LittleEndian::read_u32(&data[cursor + 8..cursor + 12]) as usize;
                    cursor += 12;
                    stats.video_blocks += 1;
                }
                TAG_AUDIO => {
                    if cursor + 4 > data.len() {
                        break;
                    }
                    remain = LittleEndian::read_u32(&data[cursor..cursor + 4]) as usize;
                    cursor += 4;
                    stats.audio_blocks += 1;
                }
                TAG_AUX_INFO | TAG_AUX_AUDIO => {
                    if cursor + 4 > data.len() {
                        break;
                    }
                    remain = LittleEndian::read_u16(&data[cursor + 2..cursor + 4]) as usize;
                    cursor += 4;
                    stats.aux_blocks += 1;
                }
                TAG_JPEG_SOI => {
                    out.extend_from_slice(&data[cursor - 4..cursor]);
                    stats.jpeg_markers += 1;
                    continue;
                }
                _ => {
                    // Step back three of the four consumed bytes.
                    cursor -= 3;
                    stats.resync_steps += 1;
                    continue;
                }
            }
        }

        // A zero-length block ends the stream, as it does on the camera's own client.
        let take = remain.min(data.len() - cursor);
        if take == 0 {
            break;
        }
        out.extend_from_slice(&data[cursor..cursor + take]);
        cursor += take;
        remain -= take;
    }

    if stats.resync_steps > 0 {
        tracing::debug!(
            "demux resynchronised {} times over {} bytes",
            stats.resync_steps,
            data.len()
        );
    }
    (ElementaryStream(out), stats)
}

fn find_marker(buffer: &[u8], from: usize, marker: &[u8; 2]) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}

/// Returns the longest `FFD8 .. FFD9` span in `blob` when it is longer than
/// 1000 bytes. Each start marker is paired with the first end marker after it.
pub fn extract_largest_jpeg(blob: &[u8]) -> Option<Vec<u8>> {
    let mut best: Option<(usize, usize)> = None;
    let mut start = 0;

    while let Some(i) = find_marker(blob, start, &JPEG_SOI) {
        let Some(j) = find_marker(blob, i + 2, &JPEG_EOI) else {
            break;
        };
        let end = j + 2;
        if best.is_none_or(|(s, e)| end - i > e - s) {
            best = Some((i, end));
        }
        start = i + 2;
    }

    match best {
        Some((s, e)) if e - s > MIN_EMBEDDED_JPEG => Some(blob[s..e].to_vec()),
        _ => None,
    }
}
