//! Downstream processing hook.
//!
//! The pipeline hands every newly stored recording to a [`DownstreamHook`].
//! What happens there (transcription, persistence, alerting) is the hook's
//! business; the pipeline only promises to call it once per ingested file
//! and to absorb its failures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::ingest::filename::ParsedFilename;

/// Post-processing invoked after a recording lands in the store.
///
/// `emit_event` distinguishes live ingestion from silent backfills.
#[async_trait]
pub trait DownstreamHook: Send + Sync {
    async fn handle(&self, path: &Path, emit_event: bool) -> Result<()>;
}

/// Hook that does nothing; used when no downstream is configured
pub struct NullHook;

#[async_trait]
impl DownstreamHook for NullHook {
    async fn handle(&self, _path: &Path, _emit_event: bool) -> Result<()> {
        Ok(())
    }
}

/// Posts a short call announcement to a webhook.
///
/// Payload is `{"content": ...}`, which both Discord webhooks and
/// compatible receivers accept.
pub struct WebhookNotifier {
    url: String,
    units: HashMap<u32, String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, units: HashMap<u32, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            url: url.into(),
            units,
            client,
        })
    }

    /// Build a notifier from config, or `None` if notifications are
    /// disabled or no URL is set
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.notifications.enabled {
            return Ok(None);
        }
        match &config.notifications.webhook_url {
            Some(url) => Ok(Some(Self::new(url, config.units.clone())?)),
            None => {
                tracing::warn!("notifications enabled but no webhook_url configured");
                Ok(None)
            }
        }
    }

    /// Human-readable announcement for a stored recording
    fn describe(&self, path: &Path) -> String {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("recording");

        match ParsedFilename::parse(filename) {
            Some(parsed) => {
                let unit = match parsed.unit_id {
                    Some(id) => self
                        .units
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| format!("Unknown. Radio ID: {id}")),
                    None => "Unknown".to_string(),
                };
                format!("New call at {}\n\n[From: {}]", parsed.time_display, unit)
            }
            None => format!("New call: {filename}"),
        }
    }
}

#[async_trait]
impl DownstreamHook for WebhookNotifier {
    async fn handle(&self, path: &Path, emit_event: bool) -> Result<()> {
        if !emit_event {
            return Ok(());
        }

        let content = self.describe(path);

        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .context("failed to send webhook notification")?
            .error_for_status()
            .context("webhook returned an error status")?;

        info!("webhook notification sent for {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> WebhookNotifier {
        let units = [(1u32, "Engine 1".to_string())].into_iter().collect();
        WebhookNotifier::new("https://example.invalid/hook", units).unwrap()
    }

    #[test]
    fn test_describe_known_unit() {
        let message = notifier().describe(Path::new(
            "files/20251113/20251113_200214_26522_DMR_CC_3_GROUP_TGT_1_SRC_1.wav",
        ));
        assert_eq!(message, "New call at 08:02:14 PM\n\n[From: Engine 1]");
    }

    #[test]
    fn test_describe_unknown_unit() {
        let message = notifier().describe(Path::new("files/20251113/20251113_200214_999.wav"));
        assert!(message.contains("Unknown. Radio ID: 999"));
    }

    #[test]
    fn test_describe_unparseable_name() {
        let message = notifier().describe(Path::new("files/oddball.wav"));
        assert_eq!(message, "New call: oddball.wav");
    }

    #[test]
    fn test_from_config_disabled() {
        let config = Config::from_yaml("radio:\n  frequency: 461.375\n  gain: 32\n").unwrap();
        assert!(WebhookNotifier::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_from_config_enabled_without_url() {
        let yaml = "radio:\n  frequency: 461.375\n  gain: 32\nnotifications:\n  enabled: true\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(WebhookNotifier::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_null_hook_is_infallible() {
        let hook = NullHook;
        assert!(hook.handle(Path::new("/tmp/x.wav"), true).await.is_ok());
        assert!(hook.handle(Path::new("/tmp/x.wav"), false).await.is_ok());
    }
}
