/// Favicon image processing: load, normalise, classify and fingerprint
///
/// This is the work the isolated worker document performs on request.
/// Everything below `ImageProcessor` is pure pixel arithmetic on RGBA
/// buffers, so it runs the same in the browser and in native tests.
use async_trait::async_trait;
use futures::future::{Either, select};
use image::error::ImageError;
use image::imageops::{self, FilterType};
use image::{ImageReader, Limits, RgbaImage};
use log::debug;
use std::io::Cursor;

use crate::data_url::{decode_data_url, encode_png_data_url, is_data_url, is_image_data_url};
use crate::error::FaviconError;
use crate::favicon_meta::{FaviconMeta, Fingerprint};

pub const FINGERPRINT_SIZE: u32 = 16;
const FINGERPRINT_LUMA_THRESHOLD: f64 = 80.0;
const DARK_THRESHOLD: u8 = 128;
/// Largest width or height accepted for a decoded or rasterised icon
pub const MAX_ICON_DIMENSION: u32 = 4096;
/// Pushes near-balanced icons towards "light"
const LIGHT_BIAS: f64 = 0.1;

/// Fetches raw image bytes for a URL
#[async_trait(?Send)]
pub trait ImageLoader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FaviconError>;
}

#[async_trait(?Send)]
pub trait Timer {
    async fn sleep(&self, ms: u32);
}

/// The two operations the resolver needs, whether they run in-process or
/// behind the worker channel.
#[async_trait(?Send)]
pub trait FaviconBackend {
    async fn build_favicon_meta(&self, url: &str, timeout_ms: u32) -> Result<FaviconMeta, FaviconError>;
    async fn create_fingerprint(&self, data_url: &str) -> Result<Fingerprint, FaviconError>;
}

/// Result of the single pixel scan plus the two derived buffers
#[derive(Debug, Clone, PartialEq)]
pub struct IconAnalysis {
    pub is_dark: bool,
    pub max_alpha: u8,
    pub normalized: RgbaImage,
    pub semi_transparent: RgbaImage,
}

/// Classify an icon and build its alpha-normalised variants.
///
/// A pixel votes "dark" when its brightest channel or its alpha is below
/// 128. The icon is dark when `(light - dark) / pixels + 0.1 < 0`.
pub fn analyze_icon(image: &RgbaImage, url: &str) -> Result<IconAnalysis, FaviconError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FaviconError::ImageLoad {
            url: url.to_string(),
            reason: "image has no pixels".to_string(),
        });
    }

    let mut max_alpha = 0u8;
    let mut light = 0u64;
    let mut dark = 0u64;
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        if r.max(g).max(b) < DARK_THRESHOLD || a < DARK_THRESHOLD {
            dark += 1;
        } else {
            light += 1;
        }
        max_alpha = max_alpha.max(a);
    }

    if max_alpha == 0 {
        return Err(FaviconError::TransparentImage { url: url.to_string() });
    }

    let dark_light_diff = (light as f64 - dark as f64) / (width as f64 * height as f64);
    let is_dark = dark_light_diff + LIGHT_BIAS < 0.0;

    let mut normalized = image.clone();
    for pixel in normalized.pixels_mut() {
        pixel.0[3] = (u32::from(pixel.0[3]) * 255 / u32::from(max_alpha)) as u8;
    }

    let mut semi_transparent = normalized.clone();
    for pixel in semi_transparent.pixels_mut() {
        pixel.0[3] /= 2;
    }

    Ok(IconAnalysis {
        is_dark,
        max_alpha,
        normalized,
        semi_transparent,
    })
}

/// Downscale to 16x16 and binarise on luma.
///
/// Fully transparent pixels count as black, the way a premultiplied
/// canvas reads them back.
pub fn fingerprint_image(image: &RgbaImage) -> Result<Fingerprint, FaviconError> {
    let mut source = image.clone();
    for pixel in source.pixels_mut() {
        if pixel.0[3] == 0 {
            pixel.0 = [0, 0, 0, 0];
        }
    }

    let mut small = imageops::resize(&source, FINGERPRINT_SIZE, FINGERPRINT_SIZE, FilterType::Triangle);
    for pixel in small.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let luma = (f64::from(r) * 0.3 + f64::from(g) * 0.59 + f64::from(b) * 0.11).floor();
        let value = if luma > FINGERPRINT_LUMA_THRESHOLD { 255 } else { 0 };
        pixel.0 = [value, value, value, 255];
    }

    encode_png_data_url(&small).map(Fingerprint)
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let bytes = &bytes[start..];

    if bytes.starts_with(b"<svg") {
        return true;
    }
    (bytes.starts_with(b"<?xml") || bytes.starts_with(b"<!DOCTYPE svg"))
        && bytes.windows(4).any(|window| window == b"<svg")
}

/// Rasterise an SVG document at its intrinsic size
fn rasterize_svg(bytes: &[u8]) -> Result<RgbaImage, String> {
    let options = resvg::usvg::Options::default();
    let tree = resvg::usvg::Tree::from_data(bytes, &options).map_err(|e| format!("invalid SVG: {}", e))?;
    let size = tree.size().to_int_size();
    let (width, height) = (size.width(), size.height());
    if width > MAX_ICON_DIMENSION || height > MAX_ICON_DIMENSION {
        return Err(format!(
            "SVG size {}x{} exceeds {}x{}",
            width, height, MAX_ICON_DIMENSION, MAX_ICON_DIMENSION
        ));
    }

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| format!("cannot rasterise SVG of size {}x{}", width, height))?;
    resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    // tiny-skia stores premultiplied alpha
    let pixels = pixmap
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let color = pixel.demultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect();
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| "SVG pixel buffer size mismatch".to_string())
}

fn decode_raster(bytes: &[u8]) -> Result<RgbaImage, String> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_ICON_DIMENSION);
    limits.max_image_height = Some(MAX_ICON_DIMENSION);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("malformed image: {}", e))?;
    reader.limits(limits);

    match reader.decode() {
        Ok(image) => Ok(image.to_rgba8()),
        Err(ImageError::Limits(e)) => Err(format!("image too large: {}", e)),
        Err(e) => Err(format!("malformed image: {}", e)),
    }
}

/// Decode raster formats through `image`, SVG through resvg
fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, String> {
    if looks_like_svg(bytes) {
        rasterize_svg(bytes)
    } else {
        decode_raster(bytes)
    }
}

fn decode_image(url: &str, bytes: &[u8]) -> Result<RgbaImage, FaviconError> {
    decode_bytes(bytes).map_err(|reason| FaviconError::ImageLoad {
        url: url.to_string(),
        reason,
    })
}

pub struct ImageProcessor<L, T> {
    loader: L,
    timer: T,
}

impl<L: ImageLoader, T: Timer> ImageProcessor<L, T> {
    pub fn new(loader: L, timer: T) -> Self {
        ImageProcessor { loader, timer }
    }

    /// Load and decode an image. Remote loads race against `timeout_ms`;
    /// whichever finishes first wins and the other is dropped.
    pub async fn load_image(&self, url: &str, timeout_ms: u32) -> Result<RgbaImage, FaviconError> {
        let bytes = if is_data_url(url) {
            decode_data_url(url).map_err(|e| FaviconError::ImageLoad {
                url: url.to_string(),
                reason: e.to_string(),
            })?
        } else {
            match select(self.loader.fetch(url), self.timer.sleep(timeout_ms)).await {
                Either::Left((result, _)) => result?,
                Either::Right(_) => {
                    return Err(FaviconError::Timeout {
                        url: url.to_string(),
                        timeout_ms,
                    });
                }
            }
        };

        decode_image(url, &bytes)
    }
}

#[async_trait(?Send)]
impl<L: ImageLoader, T: Timer> FaviconBackend for ImageProcessor<L, T> {
    async fn build_favicon_meta(&self, url: &str, timeout_ms: u32) -> Result<FaviconMeta, FaviconError> {
        if url.is_empty() {
            return Err(FaviconError::InvalidInput("empty favicon URL".to_string()));
        }

        let image = self.load_image(url, timeout_ms).await?;
        let analysis = analyze_icon(&image, url)?;
        debug!(
            "Processed {}x{} icon from {} (max alpha {}, dark: {})",
            image.width(),
            image.height(),
            url,
            analysis.max_alpha,
            analysis.is_dark
        );

        Ok(FaviconMeta {
            source_url: url.to_string(),
            is_dark: analysis.is_dark,
            normalized_image: encode_png_data_url(&analysis.normalized)?,
            semi_transparent_image: encode_png_data_url(&analysis.semi_transparent)?,
        })
    }

    async fn create_fingerprint(&self, data_url: &str) -> Result<Fingerprint, FaviconError> {
        if !is_image_data_url(data_url) {
            return Err(FaviconError::InvalidInput(
                "fingerprints are only built from image data URLs".to_string(),
            ));
        }

        let bytes = decode_data_url(data_url)?;
        let image = decode_bytes(&bytes)
            .map_err(|e| FaviconError::Decode(format!("failed to load image for fingerprinting: {}", e)))?;
        fingerprint_image(&image)
    }
}
