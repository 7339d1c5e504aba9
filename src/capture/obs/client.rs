//! OBS WebSocket client
//!
//! Request/response only: the client identifies with no event
//! subscriptions and learns the recording state by polling
//! `GetRecordStatus`. The socket is opened lazily, reused across cycles and
//! discarded after any transport failure.

use super::protocol::{
    auth_response, Envelope, Hello, Identify, RecordStatus, Request, RequestResponse,
    StopRecordData, OP_HELLO, OP_IDENTIFIED, OP_IDENTIFY, OP_REQUEST, OP_REQUEST_RESPONSE,
    RPC_VERSION, STATUS_OUTPUT_NOT_RUNNING, STATUS_OUTPUT_RUNNING,
};
use super::ObsSettings;
use crate::capture::traits::{CaptureBackend, CaptureBackendError, StoppedRecording};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capture backend talking to OBS Studio
pub struct ObsClient {
    settings: ObsSettings,
    connection: Mutex<Option<WsStream>>,
}

impl ObsClient {
    pub fn new(settings: ObsSettings) -> Self {
        Self {
            settings,
            connection: Mutex::new(None),
        }
    }

    /// Open the socket and complete the identify handshake
    async fn connect(&self) -> Result<WsStream, CaptureBackendError> {
        let url = self.settings.url();
        let deadline = Instant::now() + self.settings.timeout;

        let (mut ws, _) = tokio::time::timeout_at(deadline, connect_async(url.as_str()))
            .await
            .map_err(|_| CaptureBackendError::Unreachable(format!("timed out connecting to {url}")))?
            .map_err(|e| CaptureBackendError::Unreachable(format!("{url}: {e}")))?;

        let hello = next_envelope(&mut ws, deadline).await.map_err(as_unreachable)?;
        if hello.op != OP_HELLO {
            return Err(CaptureBackendError::Protocol(format!(
                "expected Hello, got op {}",
                hello.op
            )));
        }
        let hello: Hello = serde_json::from_value(hello.d)
            .map_err(|e| CaptureBackendError::Protocol(format!("invalid Hello: {e}")))?;

        let authentication = match (&hello.authentication, &self.settings.password) {
            (Some(challenge), Some(password)) => Some(auth_response(password, challenge)),
            (Some(_), None) => {
                return Err(CaptureBackendError::Unreachable(
                    "OBS requires a password but none is configured".to_string(),
                ))
            }
            (None, _) => None,
        };

        let identify = Identify {
            rpc_version: RPC_VERSION.min(hello.rpc_version),
            authentication,
            event_subscriptions: 0,
        };
        send_envelope(&mut ws, OP_IDENTIFY, &identify)
            .await
            .map_err(as_unreachable)?;

        // OBS closes the socket instead of answering when authentication fails
        let identified = next_envelope(&mut ws, deadline).await.map_err(|e| {
            CaptureBackendError::Unreachable(format!("identify rejected (wrong password?): {e}"))
        })?;
        if identified.op != OP_IDENTIFIED {
            return Err(CaptureBackendError::Protocol(format!(
                "expected Identified, got op {}",
                identified.op
            )));
        }

        tracing::info!(
            "Connected to OBS at {} (obs-websocket {})",
            url,
            hello.obs_web_socket_version.as_deref().unwrap_or("unknown")
        );
        Ok(ws)
    }

    /// Send one request and wait for its response
    async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Option<Value>, CaptureBackendError> {
        let request = Request {
            request_type: request_type.to_string(),
            request_id: Uuid::new_v4().to_string(),
            request_data,
        };

        let mut guard = self.connection.lock().await;
        let reused = guard.is_some();
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(ws) = guard.as_mut() else {
            return Err(CaptureBackendError::Unreachable("no connection".to_string()));
        };

        if let Err(e) = send_envelope(ws, OP_REQUEST, &request).await {
            *guard = None;
            if !reused {
                return Err(e);
            }
            // Socket kept from an earlier cycle went stale before the request
            // left; retry once on a fresh connection
            tracing::debug!("Stale OBS connection ({}), reconnecting", e);
            let mut fresh = self.connect().await?;
            send_envelope(&mut fresh, OP_REQUEST, &request).await?;
            *guard = Some(fresh);
        }

        let Some(ws) = guard.as_mut() else {
            return Err(CaptureBackendError::Unreachable("no connection".to_string()));
        };
        let deadline = Instant::now() + self.settings.timeout;
        let response = match await_response(ws, &request.request_id, deadline).await {
            Ok(response) => response,
            Err(e) => {
                *guard = None;
                return Err(e);
            }
        };

        tracing::debug!(
            "OBS {} -> code {}",
            response.request_type,
            response.request_status.code
        );
        check_status(response)
    }
}

#[async_trait]
impl CaptureBackend for ObsClient {
    fn id(&self) -> &str {
        "obs"
    }

    async fn start_recording(&self) -> Result<(), CaptureBackendError> {
        self.request("StartRecord", None).await?;
        Ok(())
    }

    async fn stop_recording(&self) -> Result<StoppedRecording, CaptureBackendError> {
        let data = self.request("StopRecord", None).await?;
        let output_path = match data {
            Some(data) => serde_json::from_value::<StopRecordData>(data)
                .map_err(|e| CaptureBackendError::Protocol(format!("invalid StopRecord data: {e}")))?
                .output_path
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            None => None,
        };
        Ok(StoppedRecording { output_path })
    }

    async fn is_recording(&self) -> Result<bool, CaptureBackendError> {
        let data = self
            .request("GetRecordStatus", None)
            .await?
            .ok_or_else(|| CaptureBackendError::Protocol("GetRecordStatus returned no data".into()))?;
        let status: RecordStatus = serde_json::from_value(data)
            .map_err(|e| CaptureBackendError::Protocol(format!("invalid GetRecordStatus data: {e}")))?;
        Ok(status.output_active)
    }

    async fn shutdown(&self) {
        if self.connection.lock().await.is_none() {
            return;
        }

        if let Ok(true) = self.is_recording().await {
            match self.stop_recording().await {
                Ok(_) => tracing::info!("Stopped OBS recording on shutdown"),
                Err(e) => tracing::warn!("Failed to stop OBS recording on shutdown: {}", e),
            }
        }

        if let Some(mut ws) = self.connection.lock().await.take() {
            let _ = ws.close(None).await;
        }
        tracing::info!("Disconnected from OBS");
    }
}

fn check_status(response: RequestResponse) -> Result<Option<Value>, CaptureBackendError> {
    let status = response.request_status;
    if status.result {
        return Ok(response.response_data);
    }
    Err(match status.code {
        STATUS_OUTPUT_RUNNING => CaptureBackendError::AlreadyRecording,
        STATUS_OUTPUT_NOT_RUNNING => CaptureBackendError::NotRecording,
        code => CaptureBackendError::Rejected {
            code,
            comment: status.comment.unwrap_or_default(),
        },
    })
}

fn as_unreachable(e: CaptureBackendError) -> CaptureBackendError {
    match e {
        CaptureBackendError::Disconnected(msg) => CaptureBackendError::Unreachable(msg),
        other => other,
    }
}

async fn send_envelope<T: serde::Serialize>(
    ws: &mut WsStream,
    op: u8,
    data: &T,
) -> Result<(), CaptureBackendError> {
    let envelope = Envelope::new(op, data)
        .map_err(|e| CaptureBackendError::Protocol(format!("encode failed: {e}")))?;
    let text = serde_json::to_string(&envelope)
        .map_err(|e| CaptureBackendError::Protocol(format!("encode failed: {e}")))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| CaptureBackendError::Disconnected(e.to_string()))
}

/// Read frames until a JSON envelope arrives
async fn next_envelope(ws: &mut WsStream, deadline: Instant) -> Result<Envelope, CaptureBackendError> {
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| CaptureBackendError::Unreachable("timed out waiting for OBS".to_string()))?;

        match frame {
            None => {
                return Err(CaptureBackendError::Disconnected(
                    "connection closed".to_string(),
                ))
            }
            Some(Err(e)) => return Err(CaptureBackendError::Disconnected(e.to_string())),
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| CaptureBackendError::Protocol(format!("invalid frame: {e}")));
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed with code {}: {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "closed".to_string());
                return Err(CaptureBackendError::Disconnected(reason));
            }
            Some(Ok(_)) => continue,
        }
    }
}

async fn await_response(
    ws: &mut WsStream,
    request_id: &str,
    deadline: Instant,
) -> Result<RequestResponse, CaptureBackendError> {
    loop {
        let envelope = next_envelope(ws, deadline).await?;
        if envelope.op != OP_REQUEST_RESPONSE {
            continue;
        }
        let response: RequestResponse = serde_json::from_value(envelope.d)
            .map_err(|e| CaptureBackendError::Protocol(format!("invalid response: {e}")))?;
        if response.request_id == request_id {
            return Ok(response);
        }
    }
}
