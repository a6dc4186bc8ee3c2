//! QR code rendering to PNG

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgb as Pixel, RgbImage, Rgba, RgbaImage};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use serde::{Deserialize, Serialize};

use crate::error::{PassError, Result};
use crate::types::Rgb;

/// Error correction level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrection {
    /// ~7% recovery
    Low,
    /// ~15% recovery
    #[default]
    Medium,
    /// ~25% recovery
    Quartile,
    /// ~30% recovery
    High,
}

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

impl std::str::FromStr for ErrorCorrection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l" | "low" => Ok(ErrorCorrection::Low),
            "m" | "medium" => Ok(ErrorCorrection::Medium),
            "q" | "quartile" => Ok(ErrorCorrection::Quartile),
            "h" | "high" => Ok(ErrorCorrection::High),
            _ => Err(format!("Unknown error correction level: {}", s)),
        }
    }
}

/// Largest edge length, in pixels, the encoder will render
pub const MAX_QR_EDGE: u32 = 4096;

/// Rendering parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrConfig {
    /// Target edge length in pixels, at most [`MAX_QR_EDGE`]
    ///
    /// The image is never smaller unless that would exceed the cap.
    pub size: u32,
    /// Quiet zone width in modules
    pub margin: u32,
    /// Color of dark modules
    pub dark: Rgb,
    /// Color of light modules and the quiet zone
    pub light: Rgb,
    /// Error correction level
    pub error_correction: ErrorCorrection,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            size: 256,
            margin: 4,
            dark: Rgb { r: 0, g: 0, b: 0 },
            light: Rgb { r: 0xff, g: 0xff, b: 0xff },
            error_correction: ErrorCorrection::Medium,
        }
    }
}

impl QrConfig {
    /// Set the target size
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Set the quiet zone width
    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the module colors
    pub fn with_colors(mut self, dark: Rgb, light: Rgb) -> Self {
        self.dark = dark;
        self.light = light;
        self
    }

    /// Set the error correction level
    pub fn with_error_correction(mut self, level: ErrorCorrection) -> Self {
        self.error_correction = level;
        self
    }
}

/// Stateless QR encoder
///
/// Output is fully determined by the text and the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrEncoder {
    config: QrConfig,
}

impl QrEncoder {
    /// Create an encoder
    pub fn new(config: QrConfig) -> Self {
        Self { config }
    }

    /// Rendering parameters in use
    pub fn config(&self) -> &QrConfig {
        &self.config
    }

    /// Encode `text` as a PNG image
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let code = QrCode::with_error_correction_level(text.as_bytes(), self.config.error_correction.into())
            .map_err(|e| match e {
                QrError::DataTooLong => PassError::EncodingError(format!(
                    "{} bytes do not fit in a QR code at {:?} error correction",
                    text.len(),
                    self.config.error_correction
                )),
                other => PassError::EncodingError(other.to_string()),
            })?;

        encode_png_rgb(&self.render(&code)?)
    }

    fn render(&self, code: &QrCode) -> Result<RgbImage> {
        let width = code.width() as u32;
        let margin = self.config.margin;
        let modules = margin
            .checked_mul(2)
            .and_then(|quiet| quiet.checked_add(width))
            .filter(|modules| *modules <= MAX_QR_EDGE && self.config.size <= MAX_QR_EDGE)
            .ok_or_else(|| too_large(self.config.size, margin))?;
        // Rounding the scale up may overshoot the cap near the maximum size
        let scale = self
            .config
            .size
            .div_ceil(modules)
            .min(MAX_QR_EDGE / modules)
            .max(1);
        let edge = modules * scale;
        let colors = code.to_colors();

        let dark = Pixel([self.config.dark.r, self.config.dark.g, self.config.dark.b]);
        let light = Pixel([self.config.light.r, self.config.light.g, self.config.light.b]);

        Ok(ImageBuffer::from_fn(edge, edge, |x, y| {
            let (mx, my) = (x / scale, y / scale);
            if mx < margin || my < margin || mx >= margin + width || my >= margin + width {
                return light;
            }
            let index = ((my - margin) * width + (mx - margin)) as usize;
            match colors[index] {
                Color::Dark => dark,
                Color::Light => light,
            }
        }))
    }
}

fn too_large(size: u32, margin: u32) -> PassError {
    PassError::EncodingError(format!(
        "QR image with size {} and margin {} exceeds {} pixels per edge",
        size, margin, MAX_QR_EDGE
    ))
}

fn encode_png_rgb(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .map_err(|e| PassError::EncodingError(e.to_string()))?;
    Ok(out)
}

/// Transparent 1x1 PNG used for the bundle's icon members
pub(crate) fn placeholder_icon() -> Result<Vec<u8>> {
    let image: RgbaImage = ImageBuffer::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(image.as_raw(), 1, 1, ExtendedColorType::Rgba8)
        .map_err(|e| PassError::EncodingError(e.to_string()))?;
    Ok(out)
}
