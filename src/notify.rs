use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde_json::json;
use url::Url;

use crate::error::{Error, Result};

/// Best-effort run-outcome sink. Posting never fails the run; delivery
/// problems are logged and forgotten.
#[derive(Debug)]
pub struct SlackNotifier {
    webhook: Option<Url>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn disabled() -> SlackNotifier {
        SlackNotifier {
            webhook: None,
            client: reqwest::Client::new(),
        }
    }

    /// The webhook url is read from a file so the secret stays off the
    /// command line.
    pub fn from_webhook_file(path: Option<&Path>) -> Result<SlackNotifier> {
        let webhook = match path {
            None => None,
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    Error::config(format!(
                        "unreadable slack webhook file {}: {err}",
                        path.display()
                    ))
                })?;
                let url = Url::parse(raw.trim()).map_err(|err| {
                    Error::config(format!(
                        "slack webhook file {} does not contain a url: {err}",
                        path.display()
                    ))
                })?;
                Some(url)
            }
        };

        Ok(SlackNotifier {
            webhook,
            client: reqwest::Client::new(),
        })
    }

    pub async fn post(&self, text: &str) {
        let webhook = match &self.webhook {
            Some(webhook) => webhook.clone(),
            None => {
                debug!("No slack webhook configured; not sending {text:?}");
                return;
            }
        };

        let payload = json!({ "text": text });
        let result = self
            .client
            .post(webhook)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => debug!("Posted notification: {text}"),
            Err(err) => warn!("Slack notification failed: {err}"),
        }
    }
}
