//! Control channel: correlated command/response exchanges
//!
//! Control commands share the session's single AV channel with the media
//! streams. A scoped [`ControlChannel`] acquisition starts a dedicated
//! listener that decodes incoming replies and routes each one to the
//! caller that is waiting on its opcode; the listener is shut down on
//! every exit path via a cancellation token, and the session's busy flag
//! is released by the listener itself on the way out, so two live
//! listeners can never overlap.
//!
//! "No reply within the timeout" is a normal outcome (an empty sentinel
//! payload); a transport-level failure while listening is a distinguished
//! error surfaced to every waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::protocol::ControlMessage;
use crate::transport::{ChannelHandle, TransportBinding};
use crate::{Error, Result};

/// How long the listener blocks in one vendor poll
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default wait for a correlated reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<Bytes>>>>;
type Fault = Arc<Mutex<Option<i32>>>;

/// Scoped acquisition of a session's control channel
pub struct ControlChannel {
    binding: Arc<dyn TransportBinding>,
    channel: ChannelHandle,
    pending: PendingMap,
    fault: Fault,
    cancel: CancellationToken,
    listener: Option<tokio::task::JoinHandle<()>>,
}

impl ControlChannel {
    /// Start the listener. Fails if another acquisition is live; `busy` is
    /// the session-owned exclusivity flag, cleared by the listener on exit.
    pub(crate) fn open(
        binding: Arc<dyn TransportBinding>,
        channel: ChannelHandle,
        busy: Arc<AtomicBool>,
    ) -> Result<Self> {
        if busy.swap(true, Ordering::SeqCst) {
            return Err(Error::Protocol(
                "control channel already acquired for this session".into(),
            ));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let fault: Fault = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let listener = {
            let binding = Arc::clone(&binding);
            let pending = Arc::clone(&pending);
            let fault = Arc::clone(&fault);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                while !cancel.is_cancelled() {
                    match binding.recv_ioctl(channel, POLL_INTERVAL) {
                        Ok(Some(raw)) => match ControlMessage::decode(&raw) {
                            Ok(reply) => {
                                let waiter = pending.lock().unwrap().remove(&reply.code);
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(reply.payload);
                                    }
                                    None => {
                                        debug!("unsolicited control reply {}", reply.code)
                                    }
                                }
                            }
                            Err(e) => warn!("discarding undecodable control reply: {e}"),
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!("control listener stopping: {e}");
                            if let Error::Transport { code } = e {
                                *fault.lock().unwrap() = Some(code);
                            }
                            break;
                        }
                    }
                }
                // Dropping the map wakes every waiter with a closed channel
                pending.lock().unwrap().clear();
                busy.store(false, Ordering::SeqCst);
            })
        };

        Ok(Self {
            binding,
            channel,
            pending,
            fault,
            cancel,
            listener: Some(listener),
        })
    }

    /// Send a command and get a handle on its correlated reply
    pub fn send(&self, message: &ControlMessage) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(message.reply_code(), tx);
        self.binding.send_ioctl(self.channel, &message.encode())?;
        Ok(PendingReply {
            rx,
            fault: Arc::clone(&self.fault),
        })
    }

    /// Fire-and-forget send; any reply is discarded as unsolicited
    pub fn send_no_wait(&self, message: &ControlMessage) -> Result<()> {
        self.binding.send_ioctl(self.channel, &message.encode())
    }

    /// Send and block on the reply, up to `timeout`
    pub async fn call(&self, message: &ControlMessage, timeout: Duration) -> Result<Bytes> {
        self.send(message)?.wait(timeout).await
    }

    /// Stop the listener and wait until it is fully gone
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(listener) = self.listener.take() {
            let _ = listener.await;
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        // The listener clears the busy flag once it observes the token
        self.cancel.cancel();
    }
}

/// Correlated reply, future/promise style
pub struct PendingReply {
    rx: oneshot::Receiver<Bytes>,
    fault: Fault,
}

impl PendingReply {
    /// Wait for the reply.
    ///
    /// An empty payload means the camera did not answer in time; transport
    /// failures observed by the listener surface as `Err`.
    pub async fn wait(self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_closed)) => match *self.fault.lock().unwrap() {
                Some(code) => Err(Error::transport(code)),
                None => Err(Error::Protocol("control listener closed".into())),
            },
            Err(_elapsed) => match *self.fault.lock().unwrap() {
                Some(code) => Err(Error::transport(code)),
                None => Ok(Bytes::new()),
            },
        }
    }
}
