//! Image relay: fetch, downsize and inline-encode remote images.
//!
//! Images are embedded into the destination message as a `data:` URI, so
//! they are shrunk to a bounding box first unless the sender asked for the
//! original with the one-shot `!noresize` directive.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::common::error::{MediaError, MediaResult};
use crate::common::ImageRef;
use crate::config::MediaConfig;

/// One-shot flag that skips downsizing of the next relayed image.
///
/// Armed by the `!noresize` handler, consumed by exactly one image event
/// (whether or not that image is relayed successfully). Stays armed until an
/// image arrives.
#[derive(Debug, Clone, Default)]
pub struct NoResizeSwitch(Arc<AtomicBool>);

impl NoResizeSwitch {
    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Disarm and report whether the switch was armed.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Source of raw image bytes.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> MediaResult<Bytes>;
}

/// Fetches images over HTTP with a request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> MediaResult<Bytes> {
        let fetch_error = |e: reqwest::Error| MediaError::Fetch {
            locator: locator.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(locator)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        response.bytes().await.map_err(fetch_error)
    }
}

/// Output format of a relayed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Guess the format from the file name the sender's client reported.
    ///
    /// Anything that does not mention `.png` is treated as JPEG.
    pub fn from_display_name(name: &str) -> Self {
        if name.contains(".png") {
            ImageKind::Png
        } else {
            ImageKind::Jpeg
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
        }
    }

    fn format(&self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Base64 image ready to be embedded into a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: String,
    pub extension: &'static str,
}

impl ImagePayload {
    /// Inline `img` tag carrying the image as a `data:` URI.
    pub fn to_html(&self) -> String {
        format!(
            r#"<img src="data:image/{};base64,{}">"#,
            self.extension, self.data
        )
    }
}

/// Turns image references into inline payloads.
pub struct MediaRelay {
    fetcher: Arc<dyn MediaFetcher>,
    max_width: u32,
    max_height: u32,
    no_resize: NoResizeSwitch,
}

impl MediaRelay {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, max_width: u32, max_height: u32) -> Self {
        Self {
            fetcher,
            max_width,
            max_height,
            no_resize: NoResizeSwitch::default(),
        }
    }

    /// Build a relay fetching over HTTP with the configured bounds and timeout.
    pub fn from_config(config: &MediaConfig) -> Result<Self, reqwest::Error> {
        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        Ok(Self::new(
            Arc::new(fetcher),
            config.max_width,
            config.max_height,
        ))
    }

    /// Handle to this relay's one-shot no-resize switch.
    pub fn no_resize_switch(&self) -> NoResizeSwitch {
        self.no_resize.clone()
    }

    /// Fetch, optionally downsize, and encode an image.
    pub async fn relay(&self, image: &ImageRef) -> MediaResult<ImagePayload> {
        // Consumed by this attempt even if the fetch below fails.
        let keep_original = self.no_resize.take();
        let kind = ImageKind::from_display_name(&image.display_name);

        let raw = self.fetcher.fetch(&image.locator).await?;
        debug!(
            locator = %image.locator,
            bytes = raw.len(),
            keep_original,
            "Fetched image"
        );

        let encoded = if keep_original {
            raw.to_vec()
        } else {
            let (max_width, max_height) = (self.max_width, self.max_height);
            tokio::task::spawn_blocking(move || downscale(&raw, kind, max_width, max_height))
                .await
                .map_err(|e| MediaError::Task(e.to_string()))??
        };

        Ok(ImagePayload {
            data: base64::engine::general_purpose::STANDARD.encode(encoded),
            extension: kind.extension(),
        })
    }
}

/// Shrink an image to fit within `max_width` x `max_height`, keeping its
/// aspect ratio. Images that already fit are returned unchanged.
pub fn downscale(raw: &[u8], kind: ImageKind, max_width: u32, max_height: u32) -> MediaResult<Vec<u8>> {
    let img = image::load_from_memory(raw).map_err(MediaError::Decode)?;
    if img.width() <= max_width && img.height() <= max_height {
        return Ok(raw.to_vec());
    }

    let resized = img.resize(max_width, max_height, FilterType::Lanczos3);
    // JPEG has no alpha channel.
    let resized = match kind {
        ImageKind::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        ImageKind::Png => resized,
    };

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, kind.format())
        .map_err(MediaError::Encode)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Side;
    use crate::network::fake::{png_fixture, FakeFetcher};

    fn decoded_size(payload: &ImagePayload) -> (u32, u32) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&payload.data)
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        (img.width(), img.height())
    }

    fn image_ref(name: &str) -> ImageRef {
        ImageRef::new(Side::A, "bob", "https://media.example.org/abc", name)
    }

    #[test]
    fn test_format_from_display_name() {
        assert_eq!(ImageKind::from_display_name("cat.png"), ImageKind::Png);
        assert_eq!(ImageKind::from_display_name("cat.png.bak"), ImageKind::Png);
        assert_eq!(ImageKind::from_display_name("cat.jpg"), ImageKind::Jpeg);
        assert_eq!(ImageKind::from_display_name("cat.PNG"), ImageKind::Jpeg);
        assert_eq!(ImageKind::from_display_name("image"), ImageKind::Jpeg);
    }

    #[test]
    fn test_html_shape() {
        let payload = ImagePayload {
            data: "AAAA".to_string(),
            extension: "png",
        };
        assert_eq!(payload.to_html(), r#"<img src="data:image/png;base64,AAAA">"#);
    }

    #[test]
    fn test_switch_is_one_shot() {
        let switch = NoResizeSwitch::default();
        assert!(!switch.take());
        switch.arm();
        switch.arm();
        assert!(switch.take());
        assert!(!switch.take());
    }

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        let out = downscale(&png_fixture(1200, 900), ImageKind::Png, 600, 450).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (600, 450));

        let out = downscale(&png_fixture(1000, 200), ImageKind::Jpeg, 600, 450).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (600, 120));
    }

    #[test]
    fn test_small_image_untouched() {
        let raw = png_fixture(100, 80);
        assert_eq!(downscale(&raw, ImageKind::Png, 600, 450).unwrap(), raw);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let result = downscale(b"definitely not an image", ImageKind::Jpeg, 600, 450);
        assert!(matches!(result, Err(MediaError::Decode(_))));
    }

    #[tokio::test]
    async fn test_relay_downscales_by_default() {
        let fetcher = Arc::new(FakeFetcher::serving(png_fixture(1200, 900)));
        let relay = MediaRelay::new(fetcher.clone(), 600, 450);

        let payload = relay.relay(&image_ref("big.png")).await.unwrap();
        assert_eq!(payload.extension, "png");
        assert_eq!(decoded_size(&payload), (600, 450));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_resize_applies_to_next_image_only() {
        let fetcher = Arc::new(FakeFetcher::serving(png_fixture(1200, 900)));
        let relay = MediaRelay::new(fetcher, 600, 450);
        relay.no_resize_switch().arm();

        let first = relay.relay(&image_ref("big.png")).await.unwrap();
        assert_eq!(decoded_size(&first), (1200, 900));

        let second = relay.relay(&image_ref("big.png")).await.unwrap();
        assert_eq!(decoded_size(&second), (600, 450));
    }

    #[tokio::test]
    async fn test_failed_fetch_consumes_switch() {
        let relay = MediaRelay::new(Arc::new(FakeFetcher::failing()), 600, 450);
        let switch = relay.no_resize_switch();
        switch.arm();

        let result = relay.relay(&image_ref("big.png")).await;
        assert!(matches!(result, Err(MediaError::Fetch { .. })));
        assert!(!switch.is_armed());
    }

    async fn media_server() -> String {
        use axum::http::StatusCode;
        use axum::routing::get;

        let router = axum::Router::new()
            .route("/media/cat.png", get(|| async { png_fixture(4, 3) }))
            .route(
                "/media/gone.png",
                get(|| async { (StatusCode::NOT_FOUND, "no such media") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_fetcher_returns_body() {
        let base = media_server().await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

        let bytes = fetcher.fetch(&format!("{}/media/cat.png", base)).await.unwrap();
        assert_eq!(bytes.as_ref(), png_fixture(4, 3).as_slice());
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_error_status() {
        let base = media_server().await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let locator = format!("{}/media/gone.png", base);

        match fetcher.fetch(&locator).await {
            Err(MediaError::Fetch { locator: failed, message }) => {
                assert_eq!(failed, locator);
                assert!(message.contains("404"), "{}", message);
            }
            other => panic!("expected fetch error, got {:?}", other),
        }
    }
}
