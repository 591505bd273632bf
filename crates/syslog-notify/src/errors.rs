// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the notification pipeline.

use crate::message::MessageRecord;
use reqwest::StatusCode;
use thiserror::Error;

/// Raised by the syslog parser when a buffer cannot be turned into a record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("priority {0} is out of range")]
    BadPriority(u32),
    #[error("unexpected end of input in {0}")]
    UnexpectedEndOfInput(&'static str),
    #[error("malformed structured data")]
    MalformedStructuredData,
    #[error("invalid timestamp '{0}'")]
    BadTimestamp(String),
}

/// Raised when a notification could not be handed over to the sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to send notification: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{status}: sink rejected notification: {body}")]
    Status { status: StatusCode, body: String },
}

/// Raised while building pipeline components.
#[derive(Debug, Error)]
pub enum CreationError {
    #[error("queue capacity must be greater than 0")]
    ZeroCapacity,
    #[error("invalid sink URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Raised when the listener cannot start.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {protocol} socket to {address}: {source}")]
    Bind {
        protocol: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Returned by [`crate::dispatcher::DispatcherHandle::push`] once the
/// dispatcher has stopped. The record is handed back to the caller.
#[derive(Debug, Error)]
#[error("queue is closed")]
pub struct QueueClosed(pub MessageRecord);

/// Returned by [`crate::dispatcher::DispatcherHandle::try_push`].
#[derive(Debug, Error)]
pub enum PushError {
    #[error("queue is full")]
    Full(MessageRecord),
    #[error("queue is closed")]
    Closed(MessageRecord),
}

impl PushError {
    /// Gives back the record that could not be queued.
    #[must_use]
    pub fn into_record(self) -> MessageRecord {
        match self {
            Self::Full(record) | Self::Closed(record) => record,
        }
    }
}
