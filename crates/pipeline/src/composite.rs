//! Client-side compositing of item images into one PNG.
//!
//! Images are decoded, scaled to a common width and stacked top to bottom
//! in selection order on a white canvas.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

/// Widest composite produced; wider sources are scaled down.
pub const MAX_WIDTH: u32 = 1024;

/// Tallest composite produced.
pub const MAX_HEIGHT: u32 = 8192;

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("Nothing to composite")]
    Empty,

    #[error("Image {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("Composite would be {height}px tall (max {MAX_HEIGHT})")]
    TooTall { height: u64 },

    #[error("Failed to encode composite: {0}")]
    Encode(#[source] image::ImageError),

    /// The blocking task panicked or was cancelled.
    #[error("Composite task failed: {0}")]
    Task(String),
}

/// Stack encoded images vertically and return the composite as PNG bytes.
pub fn stack_vertical(images: &[Vec<u8>]) -> Result<Vec<u8>, CompositeError> {
    if images.is_empty() {
        return Err(CompositeError::Empty);
    }

    let decoded = images
        .iter()
        .enumerate()
        .map(|(index, bytes)| {
            image::load_from_memory(bytes)
                .map(|img| img.to_rgba8())
                .map_err(|source| CompositeError::Decode { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let width = decoded
        .iter()
        .map(|img| img.width())
        .max()
        .unwrap_or(0)
        .min(MAX_WIDTH);
    if width == 0 {
        return Err(CompositeError::Empty);
    }

    let scaled: Vec<RgbaImage> = decoded
        .into_iter()
        .map(|img| scale_to_width(img, width))
        .collect();

    let height: u64 = scaled.iter().map(|img| u64::from(img.height())).sum();
    if height > u64::from(MAX_HEIGHT) {
        return Err(CompositeError::TooTall { height });
    }

    let mut canvas = RgbaImage::from_pixel(width, height as u32, Rgba([255, 255, 255, 255]));
    let mut y = 0i64;
    for img in &scaled {
        imageops::overlay(&mut canvas, img, 0, y);
        y += i64::from(img.height());
    }

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(CompositeError::Encode)?;
    Ok(out.into_inner())
}

fn scale_to_width(img: RgbaImage, width: u32) -> RgbaImage {
    if img.width() == width {
        return img;
    }
    let height = (u64::from(img.height()) * u64::from(width) / u64::from(img.width())).max(1);
    imageops::resize(&img, width, height as u32, FilterType::Triangle)
}

/// Run [`stack_vertical`] on the blocking pool.
pub async fn stack_vertical_blocking(images: Vec<Vec<u8>>) -> Result<Vec<u8>, CompositeError> {
    tokio::task::spawn_blocking(move || stack_vertical(&images))
        .await
        .map_err(|e| CompositeError::Task(e.to_string()))?
}
