//! Message transport seam for the interactive protocols.
//!
//! Protocols exchange [`Frame`]s: a kind discriminator plus an opaque byte
//! body. Variable-length data always travels as two consecutive frames, a
//! length header describing the payload's element counts followed by the
//! payload itself, so a receiver can validate sizes before touching the
//! body. The [`Transport`] trait abstracts delivery; [`LocalTransport`]
//! wires a set of nodes together over in-process channels, which is what
//! the tests and single-machine simulations run on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::config::PROTOCOL_TIMEOUT;
use crate::error::ProtocolError;

const LOG_TARGET: &str = "veilstats::protocols::transport";

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub from: String,
    pub kind: u8,
    pub bytes: Vec<u8>,
}

/// Delivery abstraction the protocol state machines run on.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_name(&self) -> &str;

    async fn send(&self, to: &str, kind: u8, bytes: Vec<u8>) -> Result<(), ProtocolError>;

    /// Wait for the next inbound frame. `expecting` names what the caller is
    /// blocked on and is reported when the receive times out.
    async fn recv(&self, expecting: &str) -> Result<Frame, ProtocolError>;
}

/// In-process transport backed by unbounded channels.
pub struct LocalTransport {
    name: String,
    peers: Arc<HashMap<String, mpsc::UnboundedSender<Frame>>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Frame>>,
    timeout: Duration,
}

impl LocalTransport {
    /// Wire up one transport per name, all able to reach each other.
    pub fn router(names: &[&str]) -> Vec<LocalTransport> {
        Self::router_with_timeout(names, PROTOCOL_TIMEOUT)
    }

    pub fn router_with_timeout(names: &[&str], timeout: Duration) -> Vec<LocalTransport> {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for &name in names {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(name.to_string(), tx);
            receivers.push((name.to_string(), rx));
        }
        let peers = Arc::new(senders);
        receivers
            .into_iter()
            .map(|(name, rx)| LocalTransport {
                name,
                peers: Arc::clone(&peers),
                inbox: Mutex::new(rx),
                timeout,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    async fn send(&self, to: &str, kind: u8, bytes: Vec<u8>) -> Result<(), ProtocolError> {
        let tx = self
            .peers
            .get(to)
            .ok_or_else(|| ProtocolError::Transport(format!("unknown node {to}")))?;
        tracing::trace!(
            target: LOG_TARGET,
            from = %self.name,
            to,
            kind,
            bytes = bytes.len(),
            "sending frame"
        );
        tx.send(Frame {
            from: self.name.clone(),
            kind,
            bytes,
        })
        .map_err(|_| ProtocolError::Transport(format!("node {to} hung up")))
    }

    async fn recv(&self, expecting: &str) -> Result<Frame, ProtocolError> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(self.timeout, inbox.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ProtocolError::Transport(format!(
                "inbox of {} closed while waiting for {expecting}",
                self.name
            ))),
            Err(_) => Err(ProtocolError::Timeout {
                node: self.name.clone(),
                expecting: expecting.to_string(),
            }),
        }
    }
}
