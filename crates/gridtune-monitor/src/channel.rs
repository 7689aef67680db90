//! Notification channels.
//!
//! A channel delivers one [`Alert`] somewhere. Delivery is best-effort:
//! the alert manager logs a failed send and moves on.
//!
//! Webhook and Slack channels POST JSON to their URL. Email and SMS go
//! through an HTTP relay that owns the provider credentials; the relay
//! receives the recipient alongside the message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use serde_json::json;
use tracing::{debug, error, info, warn};

use gridtune_core::{ChannelConfig, ChannelKind, Severity};

use crate::alert::Alert;

/// Deadline for a single HTTP delivery.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Build the channel described by `config`.
pub fn build_channel(config: &ChannelConfig) -> anyhow::Result<Arc<dyn NotificationChannel>> {
    let url = || {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("channel `{}` has no url", config.id))?;
        if !url.starts_with("http://") {
            anyhow::bail!("channel `{}`: unsupported scheme in `{url}`, point it at an http relay", config.id);
        }
        Ok::<String, anyhow::Error>(url)
    };
    let channel: Arc<dyn NotificationChannel> = match config.kind {
        ChannelKind::Log => Arc::new(LogChannel),
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(url()?)),
        ChannelKind::Slack => Arc::new(SlackChannel::new(url()?)),
        ChannelKind::Email | ChannelKind::Sms => {
            let recipient = config
                .recipient
                .clone()
                .ok_or_else(|| anyhow::anyhow!("channel `{}` has no recipient", config.id))?;
            Arc::new(RelayChannel::new(config.kind, url()?, recipient))
        }
    };
    Ok(channel)
}

/// Writes alerts to the tracing log at a level matching their severity.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        match alert.severity {
            Severity::Info => info!(rule = %alert.rule_id, value = alert.triggering_value, "{}", alert.message),
            Severity::Warning => warn!(rule = %alert.rule_id, value = alert.triggering_value, "{}", alert.message),
            Severity::Critical => error!(rule = %alert.rule_id, value = alert.triggering_value, "{}", alert.message),
        }
        Ok(())
    }
}

/// POSTs the alert record as JSON.
pub struct WebhookChannel {
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        post_json(&self.url, &serde_json::to_value(alert)?).await
    }
}

/// POSTs a Slack incoming-webhook message.
pub struct SlackChannel {
    url: String,
}

impl SlackChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let text = format!("[{:?}] {} ({})", alert.severity, alert.message, alert.rule_id);
        post_json(&self.url, &json!({ "text": text })).await
    }
}

/// Email or SMS delivered through an HTTP relay.
pub struct RelayChannel {
    kind: ChannelKind,
    url: String,
    recipient: String,
}

impl RelayChannel {
    pub fn new(kind: ChannelKind, url: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for RelayChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let body = json!({
            "channel": self.kind,
            "to": self.recipient,
            "subject": format!("gridtune alert: {}", alert.rule_id),
            "body": alert.message,
        });
        post_json(&self.url, &body).await
    }
}

/// POST a JSON body over plain HTTP/1.1 and require a 2xx answer.
async fn post_json(url: &str, body: &serde_json::Value) -> anyhow::Result<()> {
    let uri: http::Uri = url.parse()?;
    if uri.scheme_str() != Some("http") {
        anyhow::bail!("unsupported scheme in `{url}`, point the channel at an http relay");
    }
    let host = uri
        .host()
        .ok_or_else(|| anyhow::anyhow!("missing host in `{url}`"))?
        .to_string();
    let port = uri.port_u16().unwrap_or(80);
    let authority = format!("{host}:{port}");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
    let payload = serde_json::to_vec(body)?;

    let deliver = async {
        let stream = tokio::net::TcpStream::connect(&authority).await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "notification connection closed");
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&path)
            .header("host", &authority)
            .header("content-type", "application/json")
            .header("user-agent", "gridtune-monitor/0.1")
            .body(Full::new(Bytes::from(payload)))?;

        let resp = sender.send_request(req).await?;
        if !resp.status().is_success() {
            anyhow::bail!("{url} answered {}", resp.status());
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::time::timeout(DELIVERY_TIMEOUT, deliver)
        .await
        .map_err(|_| anyhow::anyhow!("delivery to {url} timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridtune_core::MetricKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn alert() -> Alert {
        Alert {
            rule_id: "high-cpu".to_string(),
            metric: MetricKind::CpuUtilization,
            severity: Severity::Critical,
            triggering_value: 0.97,
            timestamp: 1,
            message: "cpu_utilization 0.97 > 0.9".to_string(),
        }
    }

    /// Accept one request, answer with `status`, and return the raw request.
    async fn one_shot_server(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(split) = text.find("\r\n\r\n") {
                    let len = text[..split]
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + len {
                        break;
                    }
                }
            }
            let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}/hooks/alerts"), handle)
    }

    #[tokio::test]
    async fn webhook_posts_alert_json() {
        let (url, server) = one_shot_server("200 OK").await;
        WebhookChannel::new(url).send(&alert()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hooks/alerts HTTP/1.1"));
        assert!(request.contains("\"rule_id\":\"high-cpu\""));
    }

    #[tokio::test]
    async fn relay_includes_recipient() {
        let (url, server) = one_shot_server("202 Accepted").await;
        RelayChannel::new(ChannelKind::Sms, url, "+15550100")
            .send(&alert())
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.contains("\"to\":\"+15550100\""));
        assert!(request.contains("\"channel\":\"sms\""));
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let (url, server) = one_shot_server("500 Internal Server Error").await;
        let err = SlackChannel::new(url).send(&alert()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn https_is_rejected() {
        let err = WebhookChannel::new("https://hooks.example.com/x")
            .send(&alert())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn build_rejects_https_channels() {
        let config = ChannelConfig {
            id: "slack".to_string(),
            kind: ChannelKind::Slack,
            enabled: true,
            url: Some("https://hooks.slack.com/services/T0/B0/x".to_string()),
            recipient: None,
        };
        let err = build_channel(&config).err().unwrap();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn build_requires_recipient_for_relays() {
        let config = ChannelConfig {
            id: "pager".to_string(),
            kind: ChannelKind::Email,
            enabled: true,
            url: Some("http://relay:8080/send".to_string()),
            recipient: None,
        };
        assert!(build_channel(&config).is_err());

        let log = ChannelConfig {
            id: "ops".to_string(),
            kind: ChannelKind::Log,
            enabled: true,
            url: None,
            recipient: None,
        };
        assert_eq!(build_channel(&log).unwrap().kind(), ChannelKind::Log);
    }
}
