//! Shelly Gen1 relay over HTTP (`/relay/<id>`)

use super::{Relay, RelayStatus};
use crate::config::RelayConfig;
use crate::error::{Result, ThermiaError};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    ison: bool,
    #[serde(default)]
    source: Option<String>,
}

pub struct ShellyRelay {
    client: reqwest::Client,
    url: String,
    logger: StructuredLogger,
}

impl ShellyRelay {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            logger: get_logger_with_context(LogContext::new("shelly").with_field("url", &config.url)),
        })
    }

    async fn get(&self, query: Option<(&str, &str)>) -> Result<reqwest::Response> {
        let mut request = self.client.get(&self.url);
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ThermiaError::relay(format!("request to {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ThermiaError::relay(format!(
                "{} answered HTTP {status}",
                self.url
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Relay for ShellyRelay {
    async fn status(&self) -> Result<RelayStatus> {
        let body: StatusResponse = self
            .get(None)
            .await?
            .json()
            .await
            .map_err(|e| ThermiaError::relay(format!("unexpected status reply: {e}")))?;
        self.logger.trace(&format!(
            "ison={} source={}",
            body.ison,
            body.source.as_deref().unwrap_or("-")
        ));
        Ok(RelayStatus {
            energized: body.ison,
        })
    }

    async fn set_energized(&self, energized: bool) -> Result<()> {
        let turn = if energized { "on" } else { "off" };
        self.get(Some(("turn", turn))).await?;
        self.logger.debug(&format!("Relay turned {turn}"));
        Ok(())
    }
}
