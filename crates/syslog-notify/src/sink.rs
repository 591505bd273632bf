// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of encoded notifications to the chat webhook.
//!
//! Every delivery is a single attempt. There is no retry, requeue or backoff:
//! a failed notification is reported to the caller and then forgotten.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::errors::{CreationError, DeliveryError};

#[async_trait]
pub trait Sink: Send + Sync {
    /// Sends one JSON encoded notification. Returns once the remote end has
    /// answered or the attempt has failed.
    async fn deliver(&self, body: Vec<u8>) -> Result<(), DeliveryError>;
}

pub struct WebhookConfig {
    /// Incoming webhook URL, `http` or `https`.
    pub url: String,
    /// Upper bound for a single request, connection included.
    pub timeout: Duration,
}

/// Posts notifications to an incoming webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self, CreationError> {
        let url = parse_webhook_url(&config.url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(CreationError::Client)?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Validates a webhook URL: it must parse and use the `http` or `https` scheme.
pub fn parse_webhook_url(url: &str) -> Result<Url, CreationError> {
    let parsed = Url::parse(url.trim()).map_err(|e| CreationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(CreationError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn deliver(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("{status}: notification accepted");
            return Ok(());
        }

        // Slack answers errors with a short plain text reason.
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status { status, body })
    }
}
