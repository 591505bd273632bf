// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors raised while resolving the server configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file line {line}: expected `key value`, got '{text}'")]
    Syntax { line: usize, text: String },

    #[error("Config file line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::Missing("slack-url");
        assert_eq!(error.to_string(), "Missing required setting: slack-url");

        let error = ConfigError::invalid("queue-capacity", "0", "must be greater than zero");
        assert_eq!(
            error.to_string(),
            "Invalid value '0' for queue-capacity: must be greater than zero"
        );

        let error = ConfigError::Syntax {
            line: 3,
            text: "bind".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Config file line 3: expected `key value`, got 'bind'"
        );
    }
}
