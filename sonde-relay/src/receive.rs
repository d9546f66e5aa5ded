//! UDP receive loop feeding the bounded input queue.
//!
//! Never waits on the queue: a datagram arriving while the queue is full is
//! dropped and logged. Receive errors pause the loop briefly; a run of
//! `MAX_CONSECUTIVE_ERRORS` failures stops it.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Pause after a failed receive.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Failed receives in a row before the loop gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 20;

/// One received datagram with its arrival time.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub received: DateTime<Utc>,
}

impl Datagram {
    pub fn new(data: Vec<u8>) -> Self {
        Datagram {
            data,
            received: Utc::now(),
        }
    }

    pub fn received_local(&self) -> DateTime<Local> {
        self.received.with_timezone(&Local)
    }
}

/// Where datagrams come from. `UdpSocket` in the daemon.
#[async_trait]
pub trait DatagramSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

pub async fn receive_loop<S: DatagramSource>(
    source: S,
    buffer_size: usize,
    tx: mpsc::Sender<Datagram>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut failures = 0u32;

    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = source.recv_datagram(&mut buf) => result,
        };
        let (len, peer) = match result {
            Ok(received) => {
                failures = 0;
                received
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_ERRORS {
                    error!(%e, failures, "UDP receive keeps failing, receiver stopped");
                    break;
                }
                error!(%e, failures, "UDP receive failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
                continue;
            }
        };
        trace!(len, %peer, "datagram received");

        match tx.try_send(Datagram::new(buf[..len].to_vec())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("input queue full, datagram dropped"),
            Err(TrySendError::Closed(_)) => {
                debug!("input queue closed");
                break;
            }
        }
    }
    debug!("receive loop stopped");
}
