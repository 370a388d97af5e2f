//! # Image Compression Module
//!
//! Questo modulo implementa la compressione adattiva delle immagini
//! interamente in memoria tramite il crate `image`.
//!
//! ## Pipeline:
//! 1. **Decode + normalizzazione orientamento**: il tag EXIF di
//!    orientamento viene applicato ai pixel prima della ricodifica, così
//!    i viewer non ruotano due volte il risultato.
//! 2. **Ricerca binaria sulla qualità**: trova la qualità più alta nel
//!    range configurato il cui output non supera il target.
//! 3. **Downscaling progressivo**: se nessuna qualità basta, riduce le
//!    dimensioni del 10% per step fino al target o al floor dimensionale.
//!
//! ## Controllo qualità per formato:
//! - **JPEG**: parametro quality nativo dell'encoder (1-100)
//! - **PNG**: la qualità viene mappata su un livello di compressione
//! - **BMP/GIF/TIFF**: nessuna manopola di qualità, si ricodifica una
//!   volta sola e si passa direttamente al downscaling se serve
//!
//! La ricerca assume che qualità più alta implichi dimensione maggiore;
//! a parità di esito vince la qualità più alta.

use crate::config::Config;
use crate::error::CompressError;
use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{self, PngEncoder};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// One encoded attempt produced during the search.
///
/// Many candidates are created and discarded; only the accepted one
/// survives into the replacement transaction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
}

impl Candidate {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Search parameters derived from [`Config`] for a single task
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub target_bytes: u64,
    pub quality_min: u8,
    pub quality_max: u8,
    pub min_dimension: u32,
    pub shrink_factor: f64,
}

impl SearchParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_bytes: config.max_size_bytes(),
            quality_min: config.quality_min,
            quality_max: config.quality_max,
            min_dimension: config.min_dimension,
            shrink_factor: config.shrink_factor,
        }
    }
}

/// Result of the full search pipeline for one image
#[derive(Debug)]
pub struct ImageSearchOutcome {
    pub candidate: Candidate,
    /// Whether the candidate actually fits the target (false only when the
    /// dimension floor forced a best-effort result)
    pub met_target: bool,
    pub downscaled: bool,
}

/// Decode an image and normalize its EXIF orientation.
///
/// The recorded transform is applied to the pixel data; re-encoding through
/// this module emits no orientation tag, so the flag is effectively reset.
pub fn load_oriented(path: &Path) -> Result<(DynamicImage, ImageFormat)> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| CompressError::UnsupportedFormat(path.display().to_string()))?;

    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    Ok((img, format))
}

/// Whether the format exposes a quality parameter worth searching over
pub fn supports_quality(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Jpeg | ImageFormat::Png)
}

fn png_compression(quality: u8) -> png::CompressionType {
    // Lower quality buys a more aggressive (slower) deflate pass
    if quality >= 80 {
        png::CompressionType::Fast
    } else if quality >= 50 {
        png::CompressionType::Default
    } else {
        png::CompressionType::Best
    }
}

/// Encode an image at the given quality into an in-memory buffer
pub fn encode_at(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            encoder.encode_image(&img.to_rgb8())?;
        }
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, png_compression(quality), png::FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        other => img.write_to(&mut buf, other)?,
    }

    Ok(buf.into_inner())
}

/// Binary search for the highest quality whose encoded size fits the target.
///
/// A feasible probe records the candidate and searches the upper half; an
/// infeasible probe searches the lower half. Terminates in O(log(range))
/// probes. Returns `None` when no quality in the range fits.
pub fn quality_search(
    img: &DynamicImage,
    format: ImageFormat,
    params: &SearchParams,
) -> Result<Option<Candidate>> {
    let (width, height) = img.dimensions();
    let (mut low, mut high) = (params.quality_min, params.quality_max);
    let mut best: Option<Candidate> = None;

    while low <= high {
        let quality = low + (high - low) / 2;
        let bytes = encode_at(img, format, quality)?;
        let size = bytes.len() as u64;

        debug!(
            "Probe quality {} -> {} (target {})",
            quality, size, params.target_bytes
        );

        if size <= params.target_bytes {
            best = Some(Candidate {
                bytes,
                quality,
                width,
                height,
            });
            low = quality + 1;
        } else {
            if quality == 0 {
                break;
            }
            high = quality - 1;
        }
    }

    Ok(best)
}

/// Shrink dimensions step by step until the encoded result fits the target
/// or the dimension floor is reached. Always returns a candidate.
pub fn progressive_downscale(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
    params: &SearchParams,
) -> Result<Candidate> {
    let (orig_w, orig_h) = img.dimensions();
    let mut scale = params.shrink_factor;

    loop {
        let new_w = ((orig_w as f64 * scale) as u32).max(1);
        let new_h = ((orig_h as f64 * scale) as u32).max(1);

        let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);
        let bytes = encode_at(&resized, format, quality)?;
        let size = bytes.len() as u64;

        debug!(
            "Downscale to {}x{} -> {} (target {})",
            new_w, new_h, size, params.target_bytes
        );

        let at_floor =
            new_w < params.min_dimension || new_h < params.min_dimension || new_w == 1 || new_h == 1;

        if size <= params.target_bytes || at_floor {
            return Ok(Candidate {
                bytes,
                quality,
                width: new_w,
                height: new_h,
            });
        }

        scale *= params.shrink_factor;
    }
}

/// Full search pipeline: quality search first, dimension shrinking as the
/// fallback. Best-effort: a valid input image always yields a candidate,
/// even if the floor forces a result above the target.
pub fn compress_to_target(path: &Path, params: &SearchParams) -> Result<ImageSearchOutcome> {
    let (img, format) = load_oriented(path)?;

    if supports_quality(format) {
        if let Some(candidate) = quality_search(&img, format, params)? {
            let met_target = candidate.size_bytes() <= params.target_bytes;
            return Ok(ImageSearchOutcome {
                candidate,
                met_target,
                downscaled: false,
            });
        }
    } else {
        // No quality knob: one straight re-encode, then shrink if oversized
        let bytes = encode_at(&img, format, params.quality_max)?;
        if bytes.len() as u64 <= params.target_bytes {
            let (width, height) = img.dimensions();
            return Ok(ImageSearchOutcome {
                candidate: Candidate {
                    bytes,
                    quality: params.quality_max,
                    width,
                    height,
                },
                met_target: true,
                downscaled: false,
            });
        }
    }

    // No feasible quality at the current dimensions: the floor quality
    // yields the smallest output per downscale step.
    let candidate = progressive_downscale(&img, format, params.quality_min, params)?;
    let met_target = candidate.size_bytes() <= params.target_bytes;

    Ok(ImageSearchOutcome {
        candidate,
        met_target,
        downscaled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_params(target_bytes: u64) -> SearchParams {
        SearchParams {
            target_bytes,
            quality_min: 30,
            quality_max: 95,
            min_dimension: 16,
            shrink_factor: 0.9,
        }
    }

    /// Deterministic noise so JPEG sizes actually vary with quality
    fn noisy_image(width: u32, height: u32) -> DynamicImage {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            let mut v = ((x as u64) << 32) | (y as u64 + 1);
            v ^= v >> 33;
            v = v.wrapping_mul(0xff51_afd7_ed55_8ccd);
            v ^= v >> 33;
            image::Rgb([(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, ((v >> 16) & 0xff) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_generous_target_returns_max_quality() {
        let img = noisy_image(64, 64);
        let params = test_params(u64::MAX);

        let candidate = quality_search(&img, ImageFormat::Jpeg, &params)
            .unwrap()
            .unwrap();

        assert_eq!(candidate.quality, params.quality_max);
    }

    #[test]
    fn test_search_finds_highest_feasible_quality() {
        let img = noisy_image(64, 64);
        let params = test_params(0);

        // Use the size at a mid quality as the target: that quality is
        // feasible by construction, so the result must be at least as good
        // and still fit.
        let target = encode_at(&img, ImageFormat::Jpeg, 50).unwrap().len() as u64;
        let params = SearchParams {
            target_bytes: target,
            ..params
        };

        let candidate = quality_search(&img, ImageFormat::Jpeg, &params)
            .unwrap()
            .unwrap();

        assert!(candidate.quality >= 50);
        assert!(candidate.size_bytes() <= target);
    }

    #[test]
    fn test_impossible_target_returns_none() {
        let img = noisy_image(64, 64);
        let params = test_params(10);

        let result = quality_search(&img, ImageFormat::Jpeg, &params).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_downscale_stops_at_dimension_floor() {
        let img = noisy_image(64, 64);
        let params = test_params(10);

        let candidate =
            progressive_downscale(&img, ImageFormat::Jpeg, params.quality_min, &params).unwrap();

        // 10 bytes is unreachable: the floor must have terminated the loop
        assert!(candidate.width < params.min_dimension || candidate.height < params.min_dimension);
        assert!(!candidate.bytes.is_empty());
    }

    #[test]
    fn test_termination_property() {
        // For any image the pipeline either meets the target or bottoms out
        // at the dimension floor.
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("noise.jpg");
        noisy_image(128, 96).save(&path).unwrap();

        let params = test_params(200);
        let outcome = compress_to_target(&path, &params).unwrap();

        assert!(
            outcome.candidate.size_bytes() <= params.target_bytes
                || outcome.candidate.width < params.min_dimension
                || outcome.candidate.height < params.min_dimension
        );
    }

    #[test]
    fn test_load_oriented_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.jpg");
        noisy_image(48, 32).save(&path).unwrap();

        let (img, format) = load_oriented(&path).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        assert_eq!(img.dimensions(), (48, 32));
    }

    #[test]
    fn test_png_quality_buckets() {
        let img = noisy_image(32, 32);

        for quality in [30, 60, 90] {
            let bytes = encode_at(&img, ImageFormat::Png, quality).unwrap();
            assert!(!bytes.is_empty());
        }
    }

    #[test]
    fn test_supports_quality() {
        assert!(supports_quality(ImageFormat::Jpeg));
        assert!(supports_quality(ImageFormat::Png));
        assert!(!supports_quality(ImageFormat::Bmp));
        assert!(!supports_quality(ImageFormat::Tiff));
    }
}
