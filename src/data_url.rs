/// Data URL helpers for image payloads
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use image::{ImageFormat, RgbaImage};
use percent_encoding::percent_decode_str;
use std::io::Cursor;

use crate::error::FaviconError;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}

pub fn is_image_data_url(url: &str) -> bool {
    url.starts_with("data:image")
}

/// Decode the body of a `data:` URL (base64 or percent-encoded)
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, FaviconError> {
    let body = url
        .strip_prefix("data:")
        .ok_or_else(|| FaviconError::InvalidInput("not a data URL".to_string()))?;
    let (header, data) = body
        .split_once(',')
        .ok_or_else(|| FaviconError::Decode("data URL has no payload separator".to_string()))?;

    if header.ends_with(";base64") {
        BASE64
            .decode(data.trim())
            .map_err(|e| FaviconError::Decode(format!("invalid base64 payload: {}", e)))
    } else {
        Ok(percent_decode_str(data).collect())
    }
}

/// Encode an RGBA buffer as a PNG data URL
pub fn encode_png_data_url(image: &RgbaImage) -> Result<String, FaviconError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| FaviconError::Encode(format!("failed to encode PNG: {}", e)))?;

    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, BASE64.encode(&buffer)))
}
