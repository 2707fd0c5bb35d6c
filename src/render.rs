use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use image::{
    Delay, DynamicImage, Frame, GrayImage, ImageBuffer,
    codecs::gif::GifEncoder,
};
use ndarray::Array2;
use rayon::prelude::*;
use thiserror::Error;

use crate::navigator::{DEFAULT_FRAME_INTERVAL, FrameRenderer};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("slice of {width}x{height} does not fit an image buffer")]
    InvalidDimensions { width: usize, height: usize },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[inline]
fn normalize_to_u8(value: u16, min: u16, max: u16) -> u8 {
    if max <= min {
        return 0;
    }
    (((value.saturating_sub(min)) as f32 / (max - min) as f32) * 255.0).clamp(0.0, 255.0) as u8
}

/// Stretch a slice's own value range onto 8-bit grayscale.
pub fn slice_to_image(slice: &Array2<u16>) -> Result<GrayImage, RenderError> {
    let (height, width) = slice.dim();
    let (min, max) = slice
        .iter()
        .fold((u16::MAX, u16::MIN), |(min, max), &v| (min.min(v), max.max(v)));
    let pixel_data: Vec<u8> = slice
        .par_iter()
        .map(|&v| normalize_to_u8(v, min, max))
        .collect();
    let (w, h) = (u32::try_from(width), u32::try_from(height));
    match (w, h) {
        (Ok(w), Ok(h)) => ImageBuffer::from_raw(w, h, pixel_data)
            .ok_or(RenderError::InvalidDimensions { width, height }),
        _ => Err(RenderError::InvalidDimensions { width, height }),
    }
}

/// Write one slice as a PNG.
pub fn save_slice_png(slice: &Array2<u16>, path: impl AsRef<Path>) -> Result<(), RenderError> {
    slice_to_image(slice)?.save(path.as_ref())?;
    Ok(())
}

/// Writes each rendered frame to `<dir>/<prefix>_<index>.png`.
///
/// The first failure is kept; later frames are skipped and
/// [`finish`](Self::finish) reports it.
#[derive(Debug)]
pub struct PngSequenceWriter {
    dir: PathBuf,
    prefix: String,
    written: Vec<PathBuf>,
    error: Option<RenderError>,
}

impl PngSequenceWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            written: Vec::new(),
            error: None,
        }
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{index:04}.png", self.prefix))
    }

    pub fn finish(self) -> Result<Vec<PathBuf>, RenderError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }

    fn write_frame(&mut self, index: usize, slice: &Array2<u16>) -> Result<(), RenderError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.frame_path(index);
        save_slice_png(slice, &path)?;
        self.written.push(path);
        Ok(())
    }
}

impl FrameRenderer<Array2<u16>> for PngSequenceWriter {
    fn render(&mut self, index: usize, payload: &Array2<u16>) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.write_frame(index, payload) {
            log::warn!("failed to write frame {index}: {err}");
            self.error = Some(err);
        }
    }
}

/// Overwrites a single PNG with whatever frame was rendered last. Used for
/// interactive browsing, where the file on disk mirrors the cursor.
#[derive(Debug)]
pub struct LatestFrameWriter {
    path: PathBuf,
    last_index: Option<usize>,
    error: Option<RenderError>,
}

impl LatestFrameWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_index: None,
            error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_index(&self) -> Option<usize> {
        self.last_index
    }

    /// Take the most recent write failure, if any.
    pub fn take_error(&mut self) -> Option<RenderError> {
        self.error.take()
    }
}

impl FrameRenderer<Array2<u16>> for LatestFrameWriter {
    fn render(&mut self, index: usize, payload: &Array2<u16>) {
        match save_slice_png(payload, &self.path) {
            Ok(()) => self.last_index = Some(index),
            Err(err) => {
                log::warn!("failed to write frame {index} to {}: {err}", self.path.display());
                self.error = Some(err);
            }
        }
    }
}

/// Encodes rendered frames into an animated GIF, one frame per slice, each
/// shown for the export's frame interval.
///
/// The encoder is opened on the first frame and writes into memory; the file
/// is written by [`GifAnimationWriter::finish`], which reports any IO failure.
pub struct GifAnimationWriter {
    path: PathBuf,
    delay: Delay,
    encoder: Option<GifEncoder<EncodedBytes>>,
    buffer: EncodedBytes,
    frames: usize,
    error: Option<RenderError>,
}

/// Byte sink shared between the GIF encoder and its writer. The encoder emits
/// the trailer when dropped, after which the bytes are taken back out.
#[derive(Clone, Default)]
struct EncodedBytes(Arc<Mutex<Vec<u8>>>);

impl EncodedBytes {
    fn take(&self) -> io::Result<Vec<u8>> {
        self.0
            .lock()
            .map(|mut bytes| std::mem::take(&mut *bytes))
            .map_err(|_| io::Error::other("GIF buffer lock poisoned"))
    }
}

impl Write for EncodedBytes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("GIF buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl GifAnimationWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delay: Delay::from_saturating_duration(DEFAULT_FRAME_INTERVAL),
            encoder: None,
            buffer: EncodedBytes::default(),
            frames: 0,
            error: None,
        }
    }

    /// Write the animation to disk. Returns the number of encoded frames.
    pub fn finish(self) -> Result<usize, RenderError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Some(encoder) = self.encoder else {
            return Ok(0);
        };
        drop(encoder);
        fs::write(&self.path, self.buffer.take()?)?;
        Ok(self.frames)
    }

    fn encode(&mut self, slice: &Array2<u16>) -> Result<(), RenderError> {
        let image = DynamicImage::ImageLuma8(slice_to_image(slice)?).to_rgba8();
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                GifEncoder::new(self.buffer.clone())
            }
        };
        let encoder = self.encoder.insert(encoder);
        encoder.encode_frame(Frame::from_parts(image, 0, 0, self.delay))?;
        self.frames += 1;
        Ok(())
    }
}

impl FrameRenderer<Array2<u16>> for GifAnimationWriter {
    fn begin(&mut self, frame_count: usize, frame_interval: Duration) {
        log::info!(
            "encoding {frame_count} frames to {} at {}ms per frame",
            self.path.display(),
            frame_interval.as_millis()
        );
        self.delay = Delay::from_saturating_duration(frame_interval);
    }

    fn render(&mut self, index: usize, payload: &Array2<u16>) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.encode(payload) {
            log::warn!("failed to encode frame {index}: {err}");
            self.error = Some(err);
        }
    }
}
