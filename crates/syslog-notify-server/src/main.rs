// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use syslog_notify::{
    dispatcher::{DispatchSummary, Dispatcher},
    listener::{Listener, ListenerConfig},
    sink::{WebhookConfig, WebhookSink},
};

mod config;
mod error;
mod shutdown;

use config::{Args, Config, DEFAULT_LOG_LEVEL};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = Config::resolve(Args::from_cli());

    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level.as_str());
    init_logging(log_level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Starting with {config:?}");

    let sink = match WebhookSink::new(WebhookConfig {
        url: config.slack_url.clone(),
        timeout: config.http_timeout,
    }) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error creating webhook sink: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = config.admission_filter();
    debug!("Admission filter: {filter:?}");
    let (dispatcher, handle) =
        match Dispatcher::new(sink, Arc::new(filter), config.queue_capacity) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Error creating dispatcher: {e}");
                return ExitCode::FAILURE;
            }
        };
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let cancel_token = CancellationToken::new();
    let listener_config = ListenerConfig {
        bind: config.bind.clone(),
        tcp: config.tcp,
    };
    let listener = match Listener::bind(&listener_config, handle, cancel_token.clone()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{e}");
            // the handle went down with the listener, so the dispatcher is done
            finish_dispatcher(dispatcher_task).await;
            return ExitCode::FAILURE;
        }
    };
    info!("Listening to {}", config.bind);
    let listener_task = tokio::spawn(listener.spin());

    shutdown::shutdown_signal().await;
    info!("Shutdown the server...");
    cancel_token.cancel();

    if let Err(e) = listener_task.await {
        error!("Listener task failed: {e}");
    }
    if let Some(summary) = finish_dispatcher(dispatcher_task).await {
        debug!("Final dispatch summary: {summary:?}");
    }

    info!("Server is down");
    ExitCode::SUCCESS
}

/// Waits for the dispatcher loop. A panicked or aborted task is logged.
async fn finish_dispatcher(task: JoinHandle<DispatchSummary>) -> Option<DispatchSummary> {
    match task.await {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!("Dispatcher task failed: {e}");
            None
        }
    }
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
}
