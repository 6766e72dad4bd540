//! Decode warming: prove fetched bytes are usable before the cache starts
//! serving them from local storage.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use lumen_contracts::{
    BackendError, BackendResult,
    media::{DecodedInfo, MediaDecoder},
};
use lumen_model::MediaKind;

/// Default bound for a single warm attempt.
pub const DEFAULT_WARM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    Ready(DecodedInfo),
    Failed(String),
    TimedOut,
}

impl WarmOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WarmOutcome::Ready(_))
    }
}

pub async fn warm(
    decoder: &dyn MediaDecoder,
    kind: MediaKind,
    bytes: &[u8],
    timeout: Duration,
) -> WarmOutcome {
    match tokio::time::timeout(timeout, decoder.decode(kind, bytes)).await {
        Ok(Ok(info)) => WarmOutcome::Ready(info),
        Ok(Err(err)) => WarmOutcome::Failed(err.to_string()),
        Err(_) => WarmOutcome::TimedOut,
    }
}

/// Validates image bytes with the `image` crate.
///
/// By default only the header is parsed; `full_decode` decodes every pixel on
/// the blocking pool. Video and audio are passed through as long as they are
/// non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHeaderDecoder {
    full_decode: bool,
}

impl ImageHeaderDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_decode(mut self, full_decode: bool) -> Self {
        self.full_decode = full_decode;
        self
    }
}

fn inspect_header(bytes: &[u8]) -> BackendResult<DecodedInfo> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| BackendError::Decode(err.to_string()))?;
    let format = reader.format().ok_or_else(|| {
        BackendError::Decode("unrecognised image format".to_string())
    })?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| BackendError::Decode(err.to_string()))?;

    Ok(DecodedInfo {
        kind: MediaKind::Image,
        width: Some(width),
        height: Some(height),
        format: format.extensions_str().first().map(|ext| ext.to_string()),
    })
}

fn decode_fully(bytes: &[u8]) -> BackendResult<DecodedInfo> {
    let mut info = inspect_header(bytes)?;
    let img = image::load_from_memory(bytes)
        .map_err(|err| BackendError::Decode(err.to_string()))?;
    info.width = Some(img.width());
    info.height = Some(img.height());
    Ok(info)
}

#[async_trait]
impl MediaDecoder for ImageHeaderDecoder {
    async fn decode(
        &self,
        kind: MediaKind,
        bytes: &[u8],
    ) -> BackendResult<DecodedInfo> {
        if bytes.is_empty() {
            return Err(BackendError::Decode("empty payload".to_string()));
        }

        match kind {
            MediaKind::Image if self.full_decode => {
                let owned = bytes.to_vec();
                tokio::task::spawn_blocking(move || decode_fully(&owned))
                    .await
                    .map_err(|err| BackendError::Other(err.to_string()))?
            }
            MediaKind::Image => inspect_header(bytes),
            MediaKind::Video | MediaKind::Audio => Ok(DecodedInfo {
                kind,
                width: None,
                height: None,
                format: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(3, 2));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn reports_dimensions_for_valid_png() {
        let outcome = warm(
            &ImageHeaderDecoder::new(),
            MediaKind::Image,
            &tiny_png(),
            DEFAULT_WARM_TIMEOUT,
        )
        .await;
        match outcome {
            WarmOutcome::Ready(info) => {
                assert_eq!((info.width, info.height), (Some(3), Some(2)));
                assert_eq!(info.format.as_deref(), Some("png"));
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_decode_agrees_with_header() {
        let outcome = warm(
            &ImageHeaderDecoder::new().with_full_decode(true),
            MediaKind::Image,
            &tiny_png(),
            DEFAULT_WARM_TIMEOUT,
        )
        .await;
        assert!(outcome.is_ready());
    }

    #[tokio::test]
    async fn garbage_bytes_fail() {
        let outcome = warm(
            &ImageHeaderDecoder::new(),
            MediaKind::Image,
            b"definitely not an image",
            DEFAULT_WARM_TIMEOUT,
        )
        .await;
        assert!(matches!(outcome, WarmOutcome::Failed(_)));
    }

    #[derive(Debug)]
    struct StalledDecoder;

    #[async_trait]
    impl MediaDecoder for StalledDecoder {
        async fn decode(
            &self,
            _kind: MediaKind,
            _bytes: &[u8],
        ) -> BackendResult<DecodedInfo> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_decoder_times_out() {
        let outcome = warm(
            &StalledDecoder,
            MediaKind::Video,
            b"x",
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(outcome, WarmOutcome::TimedOut);
    }
}
