//! OBS WebSocket v5 message types
//!
//! Only the subset needed to drive recording: the identify handshake and
//! request/response frames. Event frames are parsed as opaque envelopes and
//! dropped by the client.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_EVENT: u8 = 5;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

/// RPC version this client speaks
pub const RPC_VERSION: u32 = 1;

/// `OutputRunning` request status
pub const STATUS_OUTPUT_RUNNING: u16 = 500;
/// `OutputNotRunning` request status
pub const STATUS_OUTPUT_NOT_RUNNING: u16 = 501;

/// Any frame on the wire: `{"op": <u8>, "d": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(op: u8, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            d: serde_json::to_value(data)?,
        })
    }
}

/// Server greeting (op 0)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Authentication parameters sent with `Hello` when a password is set
#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Client identification (op 1)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

/// Request (op 6)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// Response to a request (op 7)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `GetRecordStatus` response data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatus {
    pub output_active: bool,
    #[serde(default)]
    pub output_paused: bool,
    #[serde(default)]
    pub output_bytes: u64,
}

/// `StopRecord` response data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordData {
    #[serde(default)]
    pub output_path: Option<String>,
}

/// Compute the identify authentication string:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, challenge: &AuthChallenge) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, challenge.salt)));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge.challenge)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_matches_reference() {
        let challenge = AuthChallenge {
            challenge: "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=".to_string(),
            salt: "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=".to_string(),
        };
        assert_eq!(
            auth_response("supersecretpassword", &challenge),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn test_hello_without_auth() {
        let raw = r#"{"op":0,"d":{"obsWebSocketVersion":"5.4.2","rpcVersion":1}}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.op, OP_HELLO);
        let hello: Hello = serde_json::from_value(envelope.d).unwrap();
        assert_eq!(hello.rpc_version, 1);
        assert!(hello.authentication.is_none());
    }

    #[test]
    fn test_identify_omits_missing_auth() {
        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication: None,
            event_subscriptions: 0,
        };
        let json = serde_json::to_value(Envelope::new(OP_IDENTIFY, &identify).unwrap()).unwrap();
        assert_eq!(json["op"], 1);
        assert_eq!(json["d"]["rpcVersion"], 1);
        assert_eq!(json["d"]["eventSubscriptions"], 0);
        assert!(json["d"].get("authentication").is_none());
    }

    #[test]
    fn test_stop_record_response() {
        let raw = r#"{
            "requestType": "StopRecord",
            "requestId": "abc",
            "requestStatus": {"result": true, "code": 100},
            "responseData": {"outputPath": "/videos/2024-05-01 10-00-00.mkv"}
        }"#;
        let response: RequestResponse = serde_json::from_str(raw).unwrap();
        assert!(response.request_status.result);
        let data: StopRecordData = serde_json::from_value(response.response_data.unwrap()).unwrap();
        assert_eq!(data.output_path.as_deref(), Some("/videos/2024-05-01 10-00-00.mkv"));
    }
}
