// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog server receiving messages and feeding them to a dispatcher.
//!
//! Messages arrive as UDP datagrams (one message per datagram) and, when
//! enabled, as newline delimited lines over TCP on the same address. Every
//! accepted TCP connection is served by its own task. All of them push into
//! the same [`DispatcherHandle`].
//!
//! The listener runs until its cancellation token fires. It then stops
//! reading, waits for its connection tasks and drops its handles, which
//! closes the dispatcher queue for writes.

use chrono::Local;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{TCP_MAX_LINE_LENGTH, UDP_BUFFER_SIZE};
use crate::dispatcher::{Admission, DispatcherHandle};
use crate::errors::{ListenerError, QueueClosed};
use crate::parser;

// Socket errors back off up to 10ms * 2^5 between reads.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Configuration for the syslog listener
pub struct ListenerConfig {
    /// Address to bind to (e.g., "0.0.0.0:1514")
    pub bind: String,
    /// Also accept newline delimited syslog over TCP on the same address
    pub tcp: bool,
}

// BufferReader abstracts where datagrams come from.
enum BufferReader {
    /// UDP socket reader
    UdpSocket(UdpSocket),

    /// Mirror reader for testing - replays a fixed buffer
    #[cfg_attr(not(test), allow(dead_code))]
    MirrorTest(Vec<u8>, SocketAddr),

    /// Reader for testing - every read fails
    #[cfg(test)]
    FailingTest,
}

impl BufferReader {
    async fn read(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => {
                // Longer datagrams are truncated by the kernel.
                let mut buf = [0; UDP_BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                Ok((buf[..amt].to_owned(), src))
            }
            BufferReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
            #[cfg(test)]
            BufferReader::FailingTest => Err(io::Error::other("socket gone")),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            BufferReader::UdpSocket(socket) => socket.local_addr(),
            BufferReader::MirrorTest(_, src) => Ok(*src),
            #[cfg(test)]
            BufferReader::FailingTest => Err(io::Error::other("socket gone")),
        }
    }
}

/// Syslog server receiving, parsing and forwarding messages.
pub struct Listener {
    cancel_token: CancellationToken,
    handle: DispatcherHandle,
    buffer_reader: BufferReader,
    tcp_listener: Option<TcpListener>,
}

impl Listener {
    /// Binds the listening sockets. Records will be pushed to `handle`.
    pub async fn bind(
        config: &ListenerConfig,
        handle: DispatcherHandle,
        cancel_token: CancellationToken,
    ) -> Result<Listener, ListenerError> {
        let socket =
            UdpSocket::bind(&config.bind)
                .await
                .map_err(|source| ListenerError::Bind {
                    protocol: "udp",
                    address: config.bind.clone(),
                    source,
                })?;

        let tcp_listener = if config.tcp {
            let listener =
                TcpListener::bind(&config.bind)
                    .await
                    .map_err(|source| ListenerError::Bind {
                        protocol: "tcp",
                        address: config.bind.clone(),
                        source,
                    })?;
            Some(listener)
        } else {
            None
        };

        Ok(Listener {
            cancel_token,
            handle,
            buffer_reader: BufferReader::UdpSocket(socket),
            tcp_listener,
        })
    }

    /// Address of the UDP socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.buffer_reader.local_addr()
    }

    /// Address of the TCP listener, when TCP is enabled.
    pub fn tcp_local_addr(&self) -> Option<io::Result<SocketAddr>> {
        self.tcp_listener.as_ref().map(TcpListener::local_addr)
    }

    /// Main loop. Returns after cancellation once every connection task has
    /// finished, or early if the dispatcher stops accepting records.
    pub async fn spin(self) {
        let mut connections = JoinSet::new();
        let mut read_errors = 0;
        let mut accept_errors = 0;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("Listener received shutdown signal");
                    break;
                }
                read = self.buffer_reader.read() => match read {
                    Ok((buf, src)) => {
                        read_errors = 0;
                        if !forward(&self.handle, &buf, src).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read syslog datagram: {}", e);
                        if !back_off(&mut read_errors, &self.cancel_token).await {
                            break;
                        }
                    }
                },
                accepted = accept(self.tcp_listener.as_ref()) => match accepted {
                    Ok((stream, peer)) => {
                        accept_errors = 0;
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.handle.clone(),
                            self.cancel_token.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept syslog connection: {}", e);
                        if !back_off(&mut accept_errors, &self.cancel_token).await {
                            break;
                        }
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Syslog connection task failed: {}", e);
                    }
                }
            }
        }

        if !connections.is_empty() {
            debug!("Waiting for {} syslog connections to close", connections.len());
        }
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Syslog connection task failed: {}", e);
            }
        }

        self.handle.close();
        info!("Listener stopped");
    }

    /// Receive one datagram and forward it.
    #[cfg(test)]
    async fn consume_datagram(&self) -> bool {
        match self.buffer_reader.read().await {
            Ok((buf, src)) => forward(&self.handle, &buf, src).await,
            Err(e) => {
                error!("Failed to read syslog datagram: {}", e);
                true
            }
        }
    }
}

/// Delay after the given number of consecutive socket errors:
/// 10ms * 2^errors, capped at 320ms.
fn error_backoff(consecutive_errors: u32) -> Duration {
    Duration::from_millis(10u64 << consecutive_errors.min(MAX_BACKOFF_SHIFT))
}

/// Counts one more consecutive error and sleeps accordingly. Returns false if
/// cancelled meanwhile.
async fn back_off(consecutive_errors: &mut u32, cancel_token: &CancellationToken) -> bool {
    *consecutive_errors = consecutive_errors.saturating_add(1);
    tokio::select! {
        () = sleep(error_backoff(*consecutive_errors)) => true,
        () = cancel_token.cancelled() => false,
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Reads lines from one TCP connection until EOF, error or shutdown.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handle: DispatcherHandle,
    cancel_token: CancellationToken,
) {
    debug!("Accepted syslog connection from {}", peer);
    let limit = TCP_MAX_LINE_LENGTH as u64;
    let mut reader = BufReader::new(stream).take(limit);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        reader.set_limit(limit);
        let read = tokio::select! {
            () = cancel_token.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                if !forward(&handle, &line, peer).await {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read from syslog connection {}: {}", peer, e);
                break;
            }
        }
    }

    debug!("Closed syslog connection from {}", peer);
}

/// Parses a frame and pushes the record. Returns `false` once the dispatcher
/// has stopped and nothing more can be forwarded.
async fn forward(handle: &DispatcherHandle, buf: &[u8], src: SocketAddr) -> bool {
    let received_at = Local::now().fixed_offset();
    let record = match parser::parse(buf, received_at) {
        Ok(record) => record,
        Err(e) => {
            debug!("Dropping unparseable syslog message from {}: {}", src, e);
            return true;
        }
    };
    trace!(
        "Received message from {}: [{}] {}",
        src,
        record.tag(),
        record.content()
    );

    match handle.push(record).await {
        Ok(Admission::Queued | Admission::Rejected) => true,
        Err(QueueClosed(record)) => {
            warn!(
                "Dispatcher queue is closed, dropping message with tag '{}'",
                record.tag()
            );
            false
        }
    }
}
