// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Default number of records buffered by a dispatcher before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Default address the syslog listener binds to.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:1514";

/// Default per-request timeout for webhook deliveries, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Largest UDP datagram read by the listener. Longer datagrams are truncated.
pub const UDP_BUFFER_SIZE: usize = 1024;

/// Longest line accepted on a TCP connection before it is cut.
pub const TCP_MAX_LINE_LENGTH: usize = 8192;

/// Priority assumed for messages without a `<PRI>` part (user.notice).
pub const DEFAULT_PRIORITY: u8 = 13;
