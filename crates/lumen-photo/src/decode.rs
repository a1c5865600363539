//! Decode Stage
//!
//! Turns a fetched byte buffer into a bounded-size photo on a decode
//! pool thread. The stage probes image bounds first, derives an integer
//! subsampling factor from the task's target size, then decodes at that
//! factor. Transient decode failures (allocation pressure) are retried
//! with a fixed backoff.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageReader};

/// Decode error
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("bounds probe failed: {0}")]
    Probe(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// A decoded, size-bounded photo.
#[derive(Debug)]
pub struct Photo {
    image: DynamicImage,
}

impl Photo {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for Photo {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Image decoding capability.
///
/// The pipeline treats decoding as opaque: a bounds-only probe that
/// allocates no pixel storage, then a full decode at an integer
/// subsampling factor. Tests script this trait to simulate transient
/// failures without real pixel data.
pub trait ImageCodec: Send + Sync {
    /// Natural (width, height) of the encoded image, from headers only.
    fn probe(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError>;

    /// Full decode at `1/sample` resolution. `sample` is always >= 1.
    fn decode(&self, bytes: &[u8], sample: u32) -> Result<Photo, DecodeError>;
}

/// Codec backed by the `image` crate.
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn probe(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Probe(e.to_string()))?
            .into_dimensions()
            .map_err(|e| DecodeError::Probe(e.to_string()))
    }

    fn decode(&self, bytes: &[u8], sample: u32) -> Result<Photo, DecodeError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        let image = reader
            .decode()
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        if sample <= 1 {
            return Ok(Photo::from(image));
        }

        let (width, height) = image.dimensions();
        let scaled = image.resize_exact(
            (width / sample).max(1),
            (height / sample).max(1),
            image::imageops::FilterType::Nearest,
        );
        Ok(Photo::from(scaled))
    }
}

/// Capability set the decode stage needs from a task.
pub trait DecodeTask {
    fn attach_worker(&self);
    fn detach_worker(&self);
    fn is_cancelled(&self) -> bool;
    fn buffer(&self) -> Option<Arc<Vec<u8>>>;
    fn target_width(&self) -> u32;
    fn target_height(&self) -> u32;
    fn set_photo(&self, photo: Photo);
    fn report_decode_state(&self, state: DecodeState);
}

/// Stage-local states, translated by the task into pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Started,
    Completed,
    Failed,
}

enum Outcome {
    Done,
    Cancelled,
    Failed,
}

/// Run the decode stage for one task.
///
/// Reports `Started` before the probe and exactly one of `Completed` or
/// `Failed` afterwards, unless cancelled, in which case nothing further
/// is reported. The worker handle is always cleared on the way out.
pub(crate) fn run(task: &dyn DecodeTask, codec: &dyn ImageCodec, attempts: u32, backoff: Duration) {
    task.attach_worker();

    match decode(task, codec, attempts, backoff) {
        Outcome::Done => task.report_decode_state(DecodeState::Completed),
        Outcome::Cancelled => tracing::debug!("decode cancelled"),
        Outcome::Failed => task.report_decode_state(DecodeState::Failed),
    }

    task.detach_worker();
}

fn decode(task: &dyn DecodeTask, codec: &dyn ImageCodec, attempts: u32, backoff: Duration) -> Outcome {
    task.report_decode_state(DecodeState::Started);

    let Some(buffer) = task.buffer() else {
        tracing::error!("decode submitted without a fetched buffer");
        return Outcome::Failed;
    };

    let (natural_width, natural_height) = match codec.probe(&buffer) {
        Ok(bounds) => bounds,
        Err(e) => {
            tracing::warn!("bounds probe failed: {e}");
            return Outcome::Failed;
        }
    };

    if task.is_cancelled() {
        return Outcome::Cancelled;
    }

    let sample = sample_factor(
        natural_width,
        natural_height,
        task.target_width(),
        task.target_height(),
    );

    for attempt in 1..=attempts.max(1) {
        match codec.decode(&buffer, sample) {
            Ok(photo) => {
                task.set_photo(photo);
                return Outcome::Done;
            }
            Err(e) => {
                tracing::warn!("decode attempt {attempt} failed: {e}; throttling");
                if attempt == attempts.max(1) {
                    break;
                }
                if task.is_cancelled() {
                    return Outcome::Cancelled;
                }
                std::thread::sleep(backoff);
                if task.is_cancelled() {
                    return Outcome::Cancelled;
                }
            }
        }
    }

    Outcome::Failed
}

/// Integer subsampling factor for decoding `natural` bounds into a
/// `target` box: `max(1, natural_h / target_h, natural_w / target_w)`.
/// A zero target axis places no bound on that axis.
pub fn sample_factor(natural_width: u32, natural_height: u32, target_width: u32, target_height: u32) -> u32 {
    let h_scale = if target_height > 0 {
        natural_height / target_height
    } else {
        0
    };
    let w_scale = if target_width > 0 {
        natural_width / target_width
    } else {
        0
    };
    h_scale.max(w_scale).max(1)
}
