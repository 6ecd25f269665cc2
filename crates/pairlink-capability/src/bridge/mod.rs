//! Capability backed by a helper process.
//!
//! The helper owns the actual messaging client. Pairlink talks to it with
//! JSON-RPC requests over stdio; the helper pushes lifecycle events back as
//! notifications. A single reader task routes responses to waiting
//! requests and forwards notifications, in order, to the event channel.

pub mod protocol;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pairlink_core::config::BridgeConfig;
use pairlink_core::{Destination, LifecycleEvent, SessionCredential};

use crate::error::CapabilityError;
use crate::events::EventSender;
use crate::traits::{AccountInfo, MessagePayload, MessageReceipt, MessagingCapability, RemoteState};

use protocol::{
    decode_notification, methods, GetStateResult, Incoming, InitializeParams, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, SendMessageParams,
};
use transport::{LineReader, LineWriter, StdioTransport};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, JsonRpcError>>>>>;

/// State shared between the capability and its reader task.
struct Shared {
    pending: Pending,
    events: Mutex<Option<EventSender>>,
    info: RwLock<Option<AccountInfo>>,
    closed: AtomicBool,
}

/// Messaging capability that delegates to a helper process.
pub struct BridgeCapability {
    writer: tokio::sync::Mutex<LineWriter>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
    child: tokio::sync::Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
}

impl BridgeCapability {
    /// Spawn the helper described by `config`.
    pub async fn spawn(config: &BridgeConfig) -> Result<Self, CapabilityError> {
        let transport = StdioTransport::spawn(
            &config.command,
            &config.args,
            &config.env,
            config.working_dir.as_ref(),
        )
        .await?;

        info!(command = %config.command, "Bridge helper started");

        let mut bridge = Self::from_io(
            transport.reader,
            transport.writer,
            Duration::from_secs(config.request_timeout_secs),
        );
        bridge.child = tokio::sync::Mutex::new(Some(transport.child));
        Ok(bridge)
    }

    /// Build a bridge over an already-connected reader and writer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_io(reader: LineReader, writer: LineWriter, timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            pending: Arc::new(Mutex::new(HashMap::new())),
            events: Mutex::new(None),
            info: RwLock::new(None),
            closed: AtomicBool::new(false),
        });

        let reader_task = tokio::spawn(read_loop(reader, shared.clone()));

        Self {
            writer: tokio::sync::Mutex::new(writer),
            shared,
            next_id: AtomicU64::new(1),
            timeout,
            child: tokio::sync::Mutex::new(None),
            reader_task,
        }
    }

    /// Check if the helper is still reachable.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for the response.
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, CapabilityError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(CapabilityError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request)?;

        // Register before writing so a fast answer can't be missed.
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.send(&request_json).await
        };
        if let Err(e) = write_result {
            self.shared.pending.lock().remove(&id);
            return Err(e.into());
        }

        debug!(id = id, method = method, "Bridge request sent");

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(CapabilityError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                warn!(id = id, method = method, "Bridge request timed out");
                return Err(CapabilityError::Timeout(self.timeout.as_secs()));
            }
        };

        match outcome {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| CapabilityError::protocol(format!("bad '{}' result: {}", method, e))),
            Err(error) => Err(CapabilityError::remote(error.code, error.message)),
        }
    }
}

impl Drop for BridgeCapability {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route everything the helper writes until it goes away.
async fn read_loop(mut reader: LineReader, shared: Arc<Shared>) {
    loop {
        let line = match reader.receive().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Bridge helper stream ended");
                break;
            }
        };

        match Incoming::parse(&line) {
            Ok(Incoming::Response { id, outcome }) => {
                let waiter = shared.pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(id = id, "Response for unknown or expired request"),
                }
            }
            Ok(Incoming::Notification { method, params }) => {
                match decode_notification(&method, params) {
                    Ok(decoded) => {
                        match &decoded.event {
                            LifecycleEvent::Ready(_) | LifecycleEvent::Authenticated(_) => {
                                if decoded.info.is_some() {
                                    *shared.info.write() = decoded.info;
                                }
                            }
                            LifecycleEvent::PairingTokenIssued(_)
                            | LifecycleEvent::Disconnected { .. }
                            | LifecycleEvent::AuthFailed { .. } => {
                                *shared.info.write() = None;
                            }
                        }
                        forward(&shared, decoded.event);
                    }
                    Err(e) => warn!(method = %method, error = %e, "Ignoring bridge notification"),
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed line from bridge helper"),
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    *shared.info.write() = None;
    // Dropping the senders fails every waiting request with `Closed`.
    shared.pending.lock().clear();
    forward(&shared, LifecycleEvent::disconnected("bridge exited"));
}

fn forward(shared: &Shared, event: LifecycleEvent) {
    match shared.events.lock().as_ref() {
        Some(events) => {
            events.emit(event);
        }
        None => warn!(event = event.name(), "Lifecycle event before initialize, dropped"),
    }
}

#[async_trait]
impl MessagingCapability for BridgeCapability {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn initialize(
        &self,
        restore: Option<SessionCredential>,
        events: EventSender,
    ) -> Result<(), CapabilityError> {
        *self.shared.events.lock() = Some(events);

        let params = InitializeParams {
            session: restore.as_ref().map(SessionCredential::to_base64),
        };
        let _: Value = self.request(methods::INITIALIZE, Some(params)).await?;
        info!(restoring = restore.is_some(), "Bridge helper initialized");
        Ok(())
    }

    async fn get_state(&self) -> Result<RemoteState, CapabilityError> {
        let result: GetStateResult = self.request(methods::GET_STATE, None::<Value>).await?;
        Ok(RemoteState::parse(&result.state))
    }

    async fn send_message(
        &self,
        to: &Destination,
        payload: MessagePayload,
    ) -> Result<MessageReceipt, CapabilityError> {
        let params = SendMessageParams::new(to.as_str(), payload);
        let receipt: Option<MessageReceipt> =
            self.request(methods::SEND_MESSAGE, Some(params)).await?;
        Ok(receipt.unwrap_or_default())
    }

    async fn logout(&self) -> Result<(), CapabilityError> {
        let _: Value = self.request(methods::LOGOUT, None::<Value>).await?;
        *self.shared.info.write() = None;
        Ok(())
    }

    fn info(&self) -> Option<AccountInfo> {
        self.shared.info.read().clone()
    }

    async fn shutdown(&self) -> Result<(), CapabilityError> {
        if !self.is_closed() {
            let notice = JsonRpcNotification::new(methods::SHUTDOWN, None::<Value>);
            let notice = serde_json::to_string(&notice)?;
            if let Err(e) = self.writer.lock().await.send(&notice).await {
                debug!(error = %e, "Bridge helper did not take the shutdown notice");
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = transport::terminate(&mut child).await {
                error!(error = %e, "Failed to stop bridge helper");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    /// The helper's end of the pipe, driven by the test.
    struct FakeHelper {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        out: WriteHalf<DuplexStream>,
    }

    impl FakeHelper {
        async fn next_request(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn write(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.out.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn bridge_pair(timeout: Duration) -> (BridgeCapability, FakeHelper) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);

        let bridge = BridgeCapability::from_io(
            LineReader::new(BufReader::new(our_read)),
            LineWriter::new(our_write),
            timeout,
        );
        let helper = FakeHelper {
            lines: BufReader::new(their_read).lines(),
            out: their_write,
        };
        (bridge, helper)
    }

    #[tokio::test]
    async fn test_initialize_sends_restore_hint() {
        let (bridge, mut helper) = bridge_pair(Duration::from_secs(5));
        let (tx, _rx) = event_channel();
        let credential = SessionCredential::new(b"C1".to_vec());

        let init = tokio::spawn(async move {
            bridge.initialize(Some(credential), tx).await.map(|_| bridge)
        });

        let request = helper.next_request().await;
        assert_eq!(request["method"], "initialize");
        assert_eq!(request["params"]["session"], "QzE=");
        helper
            .write(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}))
            .await;

        assert!(init.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_notifications_become_ordered_events() {
        let (bridge, mut helper) = bridge_pair(Duration::from_secs(5));
        let (tx, mut rx) = event_channel();

        let init = tokio::spawn(async move { bridge.initialize(None, tx).await.map(|_| bridge) });
        let request = helper.next_request().await;
        helper
            .write(json!({"jsonrpc": "2.0", "id": request["id"], "result": null}))
            .await;
        let bridge = init.await.unwrap().unwrap();

        helper
            .write(json!({"jsonrpc": "2.0", "method": "qr", "params": {"token": "T1"}}))
            .await;
        helper
            .write(json!({"jsonrpc": "2.0", "method": "ready", "params": {"session": "QzE=", "info": {"id": "1@c.us"}}}))
            .await;

        assert_eq!(rx.recv().await.unwrap().name(), "pairing-token-issued");
        assert_eq!(
            rx.recv().await.unwrap(),
            LifecycleEvent::Ready(SessionCredential::new(b"C1".to_vec()))
        );
        assert_eq!(bridge.info().unwrap().id, "1@c.us");
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let (bridge, mut helper) = bridge_pair(Duration::from_secs(5));
        let bridge = Arc::new(bridge);

        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.get_state().await })
        };
        let request = helper.next_request().await;
        assert_eq!(request["method"], "getState");
        helper
            .write(json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32000, "message": "browser crashed"}}))
            .await;

        match call.await.unwrap() {
            Err(CapabilityError::Remote { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "browser crashed");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (bridge, mut helper) = bridge_pair(Duration::from_millis(50));
        let result = bridge.get_state().await;
        assert!(matches!(result, Err(CapabilityError::Timeout(_))));
        // The request still reached the helper.
        assert_eq!(helper.next_request().await["method"], "getState");
    }

    #[tokio::test]
    async fn test_shutdown_notice_has_no_id() {
        let (bridge, mut helper) = bridge_pair(Duration::from_secs(5));
        bridge.shutdown().await.unwrap();

        let notice = helper.next_request().await;
        assert_eq!(notice["jsonrpc"], "2.0");
        assert_eq!(notice["method"], "shutdown");
        assert!(notice.get("id").is_none());
    }

    #[tokio::test]
    async fn test_helper_exit_fails_pending_and_disconnects() {
        let (bridge, mut helper) = bridge_pair(Duration::from_secs(5));
        let (tx, mut rx) = event_channel();
        let bridge = Arc::new(bridge);

        let init = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.initialize(None, tx).await })
        };
        let _ = helper.next_request().await;
        drop(helper);

        assert!(matches!(init.await.unwrap(), Err(CapabilityError::Closed)));
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::disconnected("bridge exited"));
        assert!(bridge.is_closed());
        assert!(matches!(bridge.get_state().await, Err(CapabilityError::Closed)));
    }
}
