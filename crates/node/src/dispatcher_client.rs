use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::heartbeat::{HeartbeatError, HeartbeatMessage, HeartbeatSink};

/// HTTP client for the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherClient {
    base: String,
    client: Client,
}

impl DispatcherClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, HeartbeatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HeartbeatError::Transport(format!("client build: {}", e)))?;
        Ok(DispatcherClient {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn send_heartbeat(&self, message: &HeartbeatMessage) -> Result<(), HeartbeatError> {
        let url = format!("{}/heartbeat", self.base);
        let resp = self
            .client
            .post(&url)
            .json(message)
            .send()
            .await
            .map_err(|e| HeartbeatError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(HeartbeatError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl HeartbeatSink for DispatcherClient {
    async fn send(&self, message: &HeartbeatMessage) -> Result<(), HeartbeatError> {
        self.send_heartbeat(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> HeartbeatMessage {
        HeartbeatMessage {
            node_id: "n".into(),
            endpoint: "127.0.0.1:9800".into(),
            model_name: "m".into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_base_trailing_slash_trimmed() {
        let c = DispatcherClient::new("http://dispatcher:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base(), "http://dispatcher:8000");
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let c = DispatcherClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = c.send_heartbeat(&message()).await.unwrap_err();
        assert!(matches!(err, HeartbeatError::Transport(_)));
    }
}
