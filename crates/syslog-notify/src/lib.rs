// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog to chat webhook bridge.
//!
//! Syslog messages received by the [`listener::Listener`] are parsed into
//! [`message::MessageRecord`]s, admitted through an [`filter::AdmissionFilter`]
//! into the bounded queue of a [`dispatcher::Dispatcher`], transformed into
//! chat [`payload::Notification`]s and delivered one at a time to a
//! [`sink::Sink`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod constants;
pub mod dispatcher;
pub mod errors;
pub mod filter;
pub mod listener;
pub mod message;
pub mod parser;
pub mod payload;
pub mod sink;
