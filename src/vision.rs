//! Frame decoding and pixel metrics used by the scorer.
//!
//! Frames are 8-bit RGB. Grayscale and saturation follow the usual 8-bit
//! video conventions (BT.601 luma, HSV saturation scaled to 0..=255), so
//! thresholds tuned against the camera's own tooling carry over.

use crate::error::{DVRIPError, Result};
use image::RgbImage;

/// Reads frames from one elementary stream, strictly in order.
pub trait FrameReader {
    /// The next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens elementary streams for sequential decoding.
pub trait FrameDecoder: Send + Sync {
    fn open<'a>(&self, stream: &'a [u8]) -> Result<Box<dyn FrameReader + 'a>>;
}

#[cfg(feature = "openh264")]
pub use self::openh264_backend::OpenH264Decoder;

/// The decoder compiled into this build.
pub fn default_decoder() -> std::sync::Arc<dyn FrameDecoder> {
    #[cfg(feature = "openh264")]
    {
        std::sync::Arc::new(OpenH264Decoder)
    }
    #[cfg(not(feature = "openh264"))]
    {
        std::sync::Arc::new(NoH264Decoder)
    }
}

/// Stand-in used when no H264 decoder is compiled in. Every open fails, so
/// extraction degrades to "no photo" instead of aborting.
pub struct NoH264Decoder;

impl FrameDecoder for NoH264Decoder {
    fn open<'a>(&self, _stream: &'a [u8]) -> Result<Box<dyn FrameReader + 'a>> {
        Err(DVRIPError::DecodeError(
            "No H264 decoder support at compile time".to_string(),
        ))
    }
}

#[cfg(feature = "openh264")]
mod openh264_backend {
    use super::{FrameDecoder, FrameReader};
    use crate::error::{DVRIPError, Result};
    use image::RgbImage;
    use openh264::decoder::Decoder;
    use openh264::formats::YUVSource;

    pub struct OpenH264Decoder;

    struct OpenH264Reader<'a> {
        decoder: Decoder,
        nal_units: Vec<&'a [u8]>,
        next: usize,
    }

    impl FrameDecoder for OpenH264Decoder {
        fn open<'a>(&self, stream: &'a [u8]) -> Result<Box<dyn FrameReader + 'a>> {
            let decoder = Decoder::new().map_err(|e| DVRIPError::DecodeError(e.to_string()))?;
            let nal_units: Vec<&[u8]> = openh264::nal_units(stream).collect();
            if nal_units.is_empty() {
                return Err(DVRIPError::DecodeError("no NAL units in stream".to_string()));
            }
            Ok(Box::new(OpenH264Reader {
                decoder,
                nal_units,
                next: 0,
            }))
        }
    }

    impl FrameReader for OpenH264Reader<'_> {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            while let Some(nal) = self.nal_units.get(self.next) {
                self.next += 1;
                let decoded = self
                    .decoder
                    .decode(nal)
                    .map_err(|e| DVRIPError::DecodeError(e.to_string()))?;
                if let Some(yuv) = decoded {
                    let (width, height) = yuv.dimensions();
                    let mut rgb = vec![0u8; width * height * 3];
                    yuv.write_rgb8(&mut rgb);
                    return RgbImage::from_raw(width as u32, height as u32, rgb)
                        .map(Some)
                        .ok_or_else(|| DVRIPError::DecodeError("bad frame geometry".to_string()));
                }
            }
            Ok(None)
        }
    }
}

/// Grayscale plane as `f32` values in 0..=255, row-major.
pub struct Gray {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Gray {
    pub fn from_rgb(frame: &RgbImage) -> Self {
        let data = frame
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round()
            })
            .collect();
        Self {
            width: frame.width() as usize,
            height: frame.height() as usize,
            data,
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Rows from `first_row` to the bottom.
    pub fn rows_from(&self, first_row: usize) -> &[f32] {
        let first_row = first_row.min(self.height);
        &self.data[first_row * self.width..]
    }
}

pub fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Mirror index without repeating the edge pixel.
fn reflect101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i > last {
        i = 2 * last - i;
    }
    i as usize
}

/// Variance of the 4-neighbour Laplacian response.
pub fn laplacian_variance(gray: &Gray) -> f64 {
    if gray.data.is_empty() {
        return 0.0;
    }
    let mut response = Vec::with_capacity(gray.data.len());
    for y in 0..gray.height {
        let up = reflect101(y as isize - 1, gray.height);
        let down = reflect101(y as isize + 1, gray.height);
        for x in 0..gray.width {
            let left = reflect101(x as isize - 1, gray.width);
            let right = reflect101(x as isize + 1, gray.width);
            let v = gray.at(x, up) + gray.at(x, down) + gray.at(left, y) + gray.at(right, y)
                - 4.0 * gray.at(x, y);
            response.push(v);
        }
    }
    let (_, std) = mean_std(&response);
    std * std
}

/// HSV saturation of one pixel on a 0..=255 scale.
fn saturation(r: u8, g: u8, b: u8) -> f32 {
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    if max == 0.0 {
        0.0
    } else {
        (255.0 * (max - min) / max).round()
    }
}

/// Fraction of pixels whose saturation is below `threshold`.
pub fn low_saturation_ratio(frame: &RgbImage, threshold: u8) -> f64 {
    let total = (frame.width() * frame.height()) as usize;
    if total == 0 {
        return 0.0;
    }
    let low = frame
        .pixels()
        .filter(|p| saturation(p.0[0], p.0[1], p.0[2]) < threshold as f32)
        .count();
    low as f64 / total as f64
}

/// First row of the bottom band covering `fraction` of the height. The
/// fraction is clamped to `0.05..=0.9`.
pub fn bottom_band_start(height: usize, fraction: f64) -> usize {
    let fraction = fraction.clamp(0.05, 0.9);
    (height as f64 * (1.0 - fraction)) as usize
}

/// Fraction of band pixels brighter than `white_level`, and the band's
/// standard deviation.
pub fn bottom_band_metrics(gray: &Gray, fraction: f64, white_level: u8) -> (f64, f64) {
    let band = gray.rows_from(bottom_band_start(gray.height, fraction));
    if band.is_empty() {
        return (0.0, 0.0);
    }
    let white = band.iter().filter(|&&v| v > white_level as f32).count();
    let (_, std) = mean_std(band);
    (white as f64 / band.len() as f64, std)
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg_buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_buf, quality);
    encoder
        .encode(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| DVRIPError::DecodeError(format!("JPEG encode failed: {}", e)))?;
    Ok(jpeg_buf)
}
