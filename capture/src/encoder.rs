//! Frame encoding via the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder as _};
use thiserror::Error;

use crate::camera::PixelBuffer;

/// Container the capture is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Png,
    Jpeg,
}

impl ContainerFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("pixel buffer of {len} bytes does not hold a {width}x{height} RGB frame")]
    BadBuffer { width: u32, height: u32, len: usize },

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub trait Encoder {
    /// Encode `frame`; `quality` (1-100) only affects lossy formats.
    fn encode(
        &self,
        frame: &PixelBuffer,
        format: ContainerFormat,
        quality: u8,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// PNG / JPEG encoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEncoder;

impl Encoder for ImageEncoder {
    fn encode(
        &self,
        frame: &PixelBuffer,
        format: ContainerFormat,
        quality: u8,
    ) -> Result<Vec<u8>, EncodeError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() != expected || expected == 0 {
            return Err(EncodeError::BadBuffer {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }

        let mut out = Vec::new();
        match format {
            ContainerFormat::Png => PngEncoder::new(&mut out).write_image(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )?,
            ContainerFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
                .write_image(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?,
        }
        Ok(out)
    }
}
