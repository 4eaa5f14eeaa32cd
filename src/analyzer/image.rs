//! Post image download with bounded retry. Failures never fail an analysis;
//! the caller switches to the text-only prompt and records the reason.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::ImageError;

/// Media hosts that serve images without an extension in the path.
const MEDIA_HOSTS: &[&str] = &["i.redd.it", "preview.redd.it", "i.imgur.com", "imgur.com"];

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".webp", "image/webp"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Does this URL look like an image we should try to attach?
pub fn is_image_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    let path = url.path().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|(ext, _)| path.ends_with(ext)) {
        return true;
    }
    url.host_str()
        .is_some_and(|host| MEDIA_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h)))
}

/// MIME type implied by the URL path, defaulting to JPEG for bare media
/// host links.
pub fn mime_for_url(raw: &str) -> String {
    let path = Url::parse(raw)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .find(|(ext, _)| path.ends_with(ext))
        .map(|(_, mime)| mime.to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}

pub struct ImageFetcher {
    http: reqwest::Client,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl ImageFetcher {
    pub fn new(timeout_secs: u64, max_attempts: u32, cancel: CancellationToken) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            max_attempts: max_attempts.max(1),
            cancel,
        }
    }

    /// Download an image, retrying transient failures with exponential
    /// backoff. 403/404 and other client errors are permanent.
    pub async fn fetch(&self, url: &str) -> Result<ImageAttachment, ImageError> {
        let mut last_err = ImageError::Transient("no attempts made".into());

        for attempt in 0..self.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ImageError::Cancelled);
            }
            if attempt > 0 {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                debug!(url, attempt, "Retrying image download in {backoff:?}");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ImageError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }

            match self.try_fetch(url).await {
                Ok(att) => return Ok(att),
                Err(e) if e.is_transient() => {
                    warn!(url, attempt, "Transient image failure: {e}");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn try_fetch(&self, url: &str) -> Result<ImageAttachment, ImageError> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ImageError::Timeout
            } else {
                ImageError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ImageError::Permanent(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ImageError::Transient(format!("HTTP {status}")));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| ct.starts_with("image/"))
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
            .unwrap_or_else(|| mime_for_url(url));

        let data = response
            .bytes()
            .await
            .map_err(|e| ImageError::Transient(e.to_string()))?
            .to_vec();

        Ok(ImageAttachment { mime_type, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_recognition() {
        assert!(is_image_url("https://example.com/chart.png"));
        assert!(is_image_url("https://example.com/a/b/pic.JPEG"));
        assert!(is_image_url("https://example.com/anim.gif?x=1"));
        assert!(!is_image_url("https://example.com/article"));
        assert!(!is_image_url("not a url"));
    }

    #[test]
    fn test_media_host_recognition() {
        assert!(is_image_url("https://i.redd.it/abc123"));
        assert!(is_image_url("https://i.imgur.com/xyz"));
        assert!(!is_image_url("https://reddit.com/r/stocks/comments/1"));
    }

    #[test]
    fn test_mime_for_url() {
        assert_eq!(mime_for_url("https://x.test/a.png"), "image/png");
        assert_eq!(mime_for_url("https://x.test/a.jpg"), "image/jpeg");
        assert_eq!(mime_for_url("https://x.test/a.webp"), "image/webp");
        // Bare media-host link defaults to jpeg
        assert_eq!(mime_for_url("https://i.redd.it/abc123"), "image/jpeg");
    }
}
