//! Discord delivery client
//!
//! Posts the artifact as a message attachment through the REST API
//! (`POST /channels/{id}/messages`, multipart with `payload_json` and
//! `files[0]`) and maps HTTP status codes onto [`DeliveryError`] causes.

use super::types::{ChannelId, DeliveryClient, DeliveryError};
use crate::compress::MediaArtifact;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Response bodies are cut to this many characters in error messages
const MAX_BODY_IN_ERROR: usize = 300;

/// Discord credentials and endpoint
#[derive(Clone)]
pub struct DiscordSettings {
    token: String,
    /// Machine name shown in captions
    pub host_label: String,
    pub api_base: String,
    /// Bound on one upload request
    pub request_timeout: Duration,
}

impl DiscordSettings {
    pub fn new(token: impl Into<String>, host_label: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            host_label: host_label.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordSettings")
            .field("token", &"<redacted>")
            .field("host_label", &self.host_label)
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Bot client for uploading recordings
pub struct DiscordClient {
    http: reqwest::Client,
    settings: DiscordSettings,
}

impl DiscordClient {
    pub fn new(settings: DiscordSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("obs-rec/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, settings })
    }

    fn messages_url(&self, channel: ChannelId) -> String {
        format!(
            "{}/channels/{}/messages",
            self.settings.api_base.trim_end_matches('/'),
            channel
        )
    }
}

#[async_trait]
impl DeliveryClient for DiscordClient {
    async fn deliver(
        &self,
        artifact: &MediaArtifact,
        channel: ChannelId,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
            DeliveryError::Rejected(format!("cannot read {}: {}", artifact.path.display(), e))
        })?;

        let file_name = artifact.file_name();
        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(artifact.container.mime_type())
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        let form = Form::new()
            .text("payload_json", payload_json(caption, &file_name))
            .part("files[0]", part);

        tracing::info!(
            "Uploading {} ({} bytes) to channel {}",
            file_name,
            artifact.size_bytes,
            channel
        );

        let response = self
            .http
            .post(self.messages_url(channel))
            .header(AUTHORIZATION, format!("Bot {}", self.settings.token()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        classify_response(status, retry_after_header.as_deref(), &body)
    }
}

/// `payload_json` part: the caption plus the attachment descriptor
pub fn payload_json(caption: Option<&str>, file_name: &str) -> String {
    serde_json::json!({
        "content": caption.unwrap_or_default(),
        "attachments": [{"id": 0, "filename": file_name}],
    })
    .to_string()
}

/// Map an HTTP response onto a delivery outcome
pub fn classify_response(
    status: u16,
    retry_after_header: Option<&str>,
    body: &str,
) -> Result<(), DeliveryError> {
    let detail = || format!("HTTP {}: {}", status, truncate(body));
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(DeliveryError::Auth(detail())),
        413 => Err(DeliveryError::SizeRejected(detail())),
        429 => Err(DeliveryError::Transient {
            reason: detail(),
            retry_after: parse_retry_after(retry_after_header, body),
        }),
        408 | 500..=599 => Err(DeliveryError::transient(detail())),
        _ => Err(DeliveryError::Rejected(detail())),
    }
}

/// Seconds from the `Retry-After` header, or `retry_after` in the JSON body
fn parse_retry_after(header: Option<&str>, body: &str) -> Option<Duration> {
    let from_header = header.and_then(|h| h.trim().parse::<f64>().ok());
    let from_body = || {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| json.get("retry_after").and_then(|v| v.as_f64()))
    };
    from_header
        .or_else(from_body)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_IN_ERROR {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_BODY_IN_ERROR).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::ContainerFormat;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_response(200, None, "{}"), Ok(()));
        assert!(matches!(classify_response(401, None, ""), Err(DeliveryError::Auth(_))));
        assert!(matches!(classify_response(403, None, ""), Err(DeliveryError::Auth(_))));
        assert!(matches!(
            classify_response(413, None, ""),
            Err(DeliveryError::SizeRejected(_))
        ));
        assert!(matches!(
            classify_response(502, None, "bad gateway"),
            Err(DeliveryError::Transient { retry_after: None, .. })
        ));
        assert!(matches!(
            classify_response(400, None, r#"{"code": 50006}"#),
            Err(DeliveryError::Rejected(_))
        ));
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        match classify_response(429, Some("2.5"), "") {
            Err(DeliveryError::Transient { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_millis(2500)))
            }
            other => panic!("unexpected {:?}", other),
        }

        let body = r#"{"message": "You are being rate limited.", "retry_after": 1.25, "global": false}"#;
        match classify_response(429, None, body) {
            Err(DeliveryError::Transient { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_millis(1250)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unusable_retry_after_is_dropped() {
        for hint in ["1e20", "-3", "NaN", "inf", "soon"] {
            match classify_response(429, Some(hint), "") {
                Err(DeliveryError::Transient { retry_after, .. }) => {
                    assert_eq!(retry_after, None, "hint {}", hint)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        match classify_response(429, None, r#"{"retry_after": 1e300}"#) {
            Err(DeliveryError::Transient { retry_after, .. }) => assert_eq!(retry_after, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(1000);
        match classify_response(400, None, &body) {
            Err(DeliveryError::Rejected(msg)) => assert!(msg.len() < 400),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_payload_json() {
        let payload: serde_json::Value =
            serde_json::from_str(&payload_json(Some("hello"), "clip.mp4")).unwrap();
        assert_eq!(payload["content"], "hello");
        assert_eq!(payload["attachments"][0]["filename"], "clip.mp4");
    }

    #[test]
    fn test_debug_hides_token() {
        let settings = DiscordSettings::new("very-secret", "host");
        assert!(!format!("{:?}", settings).contains("very-secret"));
    }

    /// Minimal HTTP/1.1 server answering one request with a fixed response
    async fn spawn_fake_api(status: &'static str, headers: &'static str) -> (u16, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(String::new()));
        let captured = seen.clone();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            *captured.lock() = String::from_utf8_lossy(&buf).to_string();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 2\r\n{}connection: close\r\n\r\n{{}}",
                status, headers
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        (port, seen)
    }

    async fn artifact(dir: &std::path::Path) -> MediaArtifact {
        let path = dir.join("clip.mp4");
        std::fs::write(&path, b"fake mp4 bytes").unwrap();
        MediaArtifact {
            path,
            size_bytes: 14,
            container: ContainerFormat::Mp4,
            probe: None,
        }
    }

    fn client(port: u16) -> DiscordClient {
        let mut settings = DiscordSettings::new("bot-token", "host");
        settings.api_base = format!("http://127.0.0.1:{}/api/v10", port);
        DiscordClient::new(settings).unwrap()
    }

    #[tokio::test]
    async fn test_upload_request_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (port, seen) = spawn_fake_api("200 OK", "").await;

        client(port)
            .deliver(&artifact(dir.path()).await, ChannelId(987), Some("caption text"))
            .await
            .unwrap();

        let request = seen.lock().clone();
        assert!(request.starts_with("POST /api/v10/channels/987/messages HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bot bot-token"));
        assert!(request.contains("name=\"payload_json\""));
        assert!(request.contains("caption text"));
        assert!(request.contains("name=\"files[0]\"; filename=\"clip.mp4\""));
        assert!(request.contains("fake mp4 bytes"));
    }

    #[tokio::test]
    async fn test_upload_maps_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (port, _) = spawn_fake_api("429 Too Many Requests", "retry-after: 3\r\n").await;

        let err = client(port)
            .deliver(&artifact(dir.path()).await, ChannelId(1), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Transient {
                reason: "HTTP 429: {}".to_string(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client(port)
            .deliver(&artifact(dir.path()).await, ChannelId(1), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
