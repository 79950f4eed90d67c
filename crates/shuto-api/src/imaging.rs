//! Image inspection and transformation

use crate::error::ImagingError;
use crate::types::ImageDimensions;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Deserialize;
use std::io::Cursor;
use tracing::debug;

pub type Result<T> = std::result::Result<T, ImagingError>;

const DEFAULT_QUALITY: u8 = 80;
/// Upper bound for either side of a transformed image
const MAX_DIMENSION: u32 = 8192;
const FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fit {
    /// Scale to fit within the box, keeping the aspect ratio
    #[default]
    Clip,
    /// Scale and centre-crop to exactly the box
    Crop,
    /// Scale to the requested width
    Fill,
}

impl Fit {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" | "clip" => Ok(Fit::Clip),
            "crop" => Ok(Fit::Crop),
            "fill" => Ok(Fit::Fill),
            other => Err(ImagingError::InvalidOptions(format!("unknown fit {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" | "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(ImagingError::InvalidOptions(format!("unknown format {:?}", other))),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

/// Transform parameters as they appear in the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformQuery {
    pub w: Option<u32>,
    pub h: Option<u32>,
    pub fit: Option<String>,
    pub fm: Option<String>,
    pub q: Option<u8>,
    pub dpr: Option<f64>,
    pub blur: Option<u32>,
    pub dl: Option<String>,
}

impl TransformQuery {
    /// Whether the image should be re-encoded at all
    pub fn requests_transform(&self) -> bool {
        self.w.is_some()
            || self.h.is_some()
            || self.fit.is_some()
            || self.fm.is_some()
            || self.q.is_some()
            || self.dpr.is_some()
            || self.blur.is_some_and(|b| b > 0)
    }

    pub fn force_download(&self) -> bool {
        matches!(self.dl.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// Validated transform parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    /// Requested width in CSS pixels, 0 when unset
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub format: OutputFormat,
    /// 1-100, used for JPEG output
    pub quality: u8,
    /// Device pixel ratio, 1.0-3.0
    pub dpr: f64,
    /// 0-100
    pub blur: u32,
    pub force_download: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fit: Fit::Clip,
            format: OutputFormat::Jpeg,
            quality: DEFAULT_QUALITY,
            dpr: 1.0,
            blur: 0,
            force_download: false,
        }
    }
}

impl TryFrom<&TransformQuery> for TransformOptions {
    type Error = ImagingError;

    fn try_from(query: &TransformQuery) -> Result<Self> {
        let dpr = match query.dpr {
            Some(dpr) if dpr.is_finite() => dpr.clamp(1.0, 3.0),
            _ => 1.0,
        };

        Ok(Self {
            width: query.w.unwrap_or(0),
            height: query.h.unwrap_or(0),
            fit: Fit::parse(query.fit.as_deref().unwrap_or_default())?,
            format: OutputFormat::parse(query.fm.as_deref().unwrap_or_default())?,
            quality: query.q.unwrap_or(DEFAULT_QUALITY).clamp(1, 100),
            dpr,
            blur: query.blur.unwrap_or(0).min(100),
            force_download: query.force_download(),
        })
    }
}

/// Image operations used by the request handlers
pub trait ImageProcessor: Send + Sync {
    /// MIME type of an encoded image, if the format is recognised
    fn mime_type(&self, data: &[u8]) -> Option<&'static str>;

    /// Read the pixel dimensions from the image header
    fn dimensions(&self, data: &[u8]) -> Result<ImageDimensions>;

    fn transform(&self, data: &[u8], options: &TransformOptions) -> Result<Vec<u8>>;
}

/// [`ImageProcessor`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeImageProcessor;

impl ImageProcessor for NativeImageProcessor {
    fn mime_type(&self, data: &[u8]) -> Option<&'static str> {
        image::guess_format(data).ok().map(|format| format.to_mime_type())
    }

    fn dimensions(&self, data: &[u8]) -> Result<ImageDimensions> {
        let (width, height) = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(image::ImageError::from)?
            .into_dimensions()?;

        debug!(width, height, size = data.len(), "Read image dimensions");
        Ok(ImageDimensions { width, height })
    }

    fn transform(&self, data: &[u8], options: &TransformOptions) -> Result<Vec<u8>> {
        let image = image::load_from_memory(data)?;
        let (original_width, original_height) = (image.width(), image.height());

        let width = (options.width as f64 * options.dpr).round() as u32;
        let height = (options.height as f64 * options.dpr).round() as u32;
        check_output_size(width, height)?;

        let mut image = match options.fit {
            Fit::Clip => {
                let (w, h) = clip_size(original_width, original_height, width, height);
                if (w, h) == (original_width, original_height) {
                    image
                } else {
                    check_output_size(w, h)?;
                    image.resize_exact(w, h, FILTER)
                }
            }
            Fit::Crop => {
                if width == 0 || height == 0 {
                    return Err(ImagingError::InvalidOptions(
                        "crop requires both w and h".to_string(),
                    ));
                }
                image.resize_to_fill(width, height, FILTER)
            }
            Fit::Fill => {
                if width == 0 {
                    return Err(ImagingError::InvalidOptions("fill requires w".to_string()));
                }
                let scale = width as f64 / original_width as f64;
                let h = scaled(original_height, scale);
                check_output_size(width, h)?;
                image.resize_exact(width, h, FILTER)
            }
        };

        if options.blur > 0 {
            let sigma = options.blur as f32 * 0.3;
            image = image.blur(sigma);
        }

        let encoded = encode(&image, options.format, options.quality)?;

        debug!(
            input_size = data.len(),
            output_size = encoded.len(),
            width = image.width(),
            height = image.height(),
            fit = ?options.fit,
            format = ?options.format,
            "Transformed image"
        );

        Ok(encoded)
    }
}

/// Target size for `clip`: fit inside the box, deriving a missing side from the aspect ratio
fn clip_size(original_width: u32, original_height: u32, width: u32, height: u32) -> (u32, u32) {
    let (width, height) = match (width, height) {
        (0, 0) => return (original_width, original_height),
        (0, h) => (scaled(original_width, h as f64 / original_height as f64), h),
        (w, 0) => (w, scaled(original_height, w as f64 / original_width as f64)),
        (w, h) => (w, h),
    };

    let scale = (width as f64 / original_width as f64).min(height as f64 / original_height as f64);
    (scaled(original_width, scale), scaled(original_height, scale))
}

/// Reject sizes beyond [`MAX_DIMENSION`] before anything is allocated
fn check_output_size(width: u32, height: u32) -> Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImagingError::InvalidOptions(format!(
            "output size {}x{} exceeds {}",
            width, height, MAX_DIMENSION
        )));
    }
    Ok(())
}

fn scaled(side: u32, scale: f64) -> u32 {
    ((side as f64 * scale).round() as u32).max(1)
}

fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        OutputFormat::Png => {
            image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        OutputFormat::WebP => {
            // The webp encoder is lossless, quality does not apply
            DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)?;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn options(query: TransformQuery) -> TransformOptions {
        TransformOptions::try_from(&query).unwrap()
    }

    fn transformed_size(data: &[u8], opts: &TransformOptions) -> ImageDimensions {
        let out = NativeImageProcessor.transform(data, opts).unwrap();
        NativeImageProcessor.dimensions(&out).unwrap()
    }

    #[test]
    fn test_mime_type_and_dimensions() {
        let data = png(40, 20);
        assert_eq!(NativeImageProcessor.mime_type(&data), Some("image/png"));
        assert_eq!(
            NativeImageProcessor.dimensions(&data).unwrap(),
            ImageDimensions { width: 40, height: 20 }
        );
        assert_eq!(NativeImageProcessor.mime_type(b"plain text"), None);
        assert!(NativeImageProcessor.dimensions(b"plain text").is_err());
    }

    #[test]
    fn test_query_defaults_and_clamping() {
        let opts = options(TransformQuery {
            dpr: Some(9.0),
            q: Some(0),
            blur: Some(500),
            dl: Some("true".to_string()),
            ..Default::default()
        });
        assert_eq!(opts.fit, Fit::Clip);
        assert_eq!(opts.format, OutputFormat::Jpeg);
        assert_eq!(opts.dpr, 3.0);
        assert_eq!(opts.quality, 1);
        assert_eq!(opts.blur, 100);
        assert!(opts.force_download);
    }

    #[test]
    fn test_unknown_fit_and_format_rejected() {
        let fit = TransformQuery {
            fit: Some("stretch".to_string()),
            ..Default::default()
        };
        assert!(TransformOptions::try_from(&fit).is_err());

        let fm = TransformQuery {
            fm: Some("gif".to_string()),
            ..Default::default()
        };
        assert!(TransformOptions::try_from(&fm).is_err());
    }

    #[test]
    fn test_requests_transform() {
        assert!(!TransformQuery::default().requests_transform());
        assert!(!TransformQuery {
            dl: Some("1".to_string()),
            ..Default::default()
        }
        .requests_transform());
        assert!(TransformQuery {
            w: Some(10),
            ..Default::default()
        }
        .requests_transform());
    }

    #[test]
    fn test_clip_size() {
        assert_eq!(clip_size(400, 200, 0, 0), (400, 200));
        assert_eq!(clip_size(400, 200, 100, 0), (100, 50));
        assert_eq!(clip_size(400, 200, 0, 50), (100, 50));
        assert_eq!(clip_size(400, 200, 100, 100), (100, 50));
        assert_eq!(clip_size(400, 200, 1000, 20), (40, 20));
    }

    #[test]
    fn test_derived_side_beyond_limit_rejected() {
        // 1x1000 source widened to 8000 would need an 8000x8000000 buffer
        assert_eq!(clip_size(1, 1000, 8000, 0), (8000, 8_000_000));
        assert!(check_output_size(8000, 8_000_000).is_err());
        assert!(check_output_size(MAX_DIMENSION, MAX_DIMENSION).is_ok());

        let data = png(1, 1000);
        for fit in ["clip", "fill"] {
            let opts = options(TransformQuery {
                w: Some(8000),
                fit: Some(fit.to_string()),
                ..Default::default()
            });
            let result = NativeImageProcessor.transform(&data, &opts);
            assert!(
                matches!(result, Err(ImagingError::InvalidOptions(_))),
                "fit {} was not rejected",
                fit
            );
        }
    }

    #[test]
    fn test_clip_transform_keeps_aspect() {
        let data = png(40, 20);
        let opts = options(TransformQuery {
            w: Some(20),
            fm: Some("png".to_string()),
            ..Default::default()
        });
        assert_eq!(
            transformed_size(&data, &opts),
            ImageDimensions { width: 20, height: 10 }
        );
    }

    #[test]
    fn test_dpr_scales_target() {
        let data = png(40, 20);
        let opts = options(TransformQuery {
            w: Some(10),
            dpr: Some(2.0),
            fm: Some("png".to_string()),
            ..Default::default()
        });
        assert_eq!(transformed_size(&data, &opts).width, 20);
    }

    #[test]
    fn test_crop_produces_exact_box() {
        let data = png(40, 20);
        let opts = options(TransformQuery {
            w: Some(10),
            h: Some(10),
            fit: Some("crop".to_string()),
            ..Default::default()
        });
        assert_eq!(
            transformed_size(&data, &opts),
            ImageDimensions { width: 10, height: 10 }
        );

        let missing_height = options(TransformQuery {
            w: Some(10),
            fit: Some("crop".to_string()),
            ..Default::default()
        });
        assert!(NativeImageProcessor.transform(&data, &missing_height).is_err());
    }

    #[test]
    fn test_fill_scales_by_width() {
        let data = png(40, 20);
        let opts = options(TransformQuery {
            w: Some(80),
            fit: Some("fill".to_string()),
            fm: Some("webp".to_string()),
            ..Default::default()
        });
        let out = NativeImageProcessor.transform(&data, &opts).unwrap();
        assert_eq!(NativeImageProcessor.mime_type(&out), Some("image/webp"));
        assert_eq!(
            NativeImageProcessor.dimensions(&out).unwrap(),
            ImageDimensions { width: 80, height: 40 }
        );
    }

    #[test]
    fn test_jpeg_output_with_blur() {
        let data = png(16, 16);
        let opts = options(TransformQuery {
            blur: Some(10),
            q: Some(60),
            ..Default::default()
        });
        let out = NativeImageProcessor.transform(&data, &opts).unwrap();
        assert_eq!(NativeImageProcessor.mime_type(&out), Some("image/jpeg"));
    }

    #[test]
    fn test_oversized_request_rejected() {
        let data = png(4, 4);
        let opts = options(TransformQuery {
            w: Some(5000),
            dpr: Some(3.0),
            ..Default::default()
        });
        assert!(matches!(
            NativeImageProcessor.transform(&data, &opts),
            Err(ImagingError::InvalidOptions(_))
        ));
    }
}
