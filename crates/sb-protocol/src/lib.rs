// sb-protocol: RPC wire protocol types and serialization.
//
// Every frame on the wire is a u32 big-endian length prefix followed by a
// UTF-8 JSON rendering of the `Message` envelope.  The envelope's numeric
// `type` field selects the payload variant.  The legacy TLV/magic-number
// framing is intentionally not implemented.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codec;

pub use codec::{CodecError, MessageCodec, MAX_FRAME_SIZE};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Numeric codes frozen by the wire contract.
pub mod codes {
    /// `serialization` field: JSON is the only supported encoding.
    pub const SERIALIZATION_JSON: u8 = 1;
    /// `compression` field: no compression is the only supported value.
    pub const COMPRESSION_NONE: u8 = 0;
    /// `RpcResponse.code` for a successful invocation.
    pub const RESPONSE_SUCCESS: i64 = 200;
    /// `RpcResponse.code` for a failed invocation.
    pub const RESPONSE_FAIL: i64 = 500;
    /// Heartbeat request token.
    pub const PING: &str = "PING";
    /// Heartbeat response token.
    pub const PONG: &str = "PONG";
}

/// Message type discriminators carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    HeartbeatReq = 3,
    HeartbeatResp = 4,
    RegRegister = 5,
    RegUnregister = 6,
    RegLookup = 7,
    RegResponse = 8,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::HeartbeatReq),
            4 => Some(Self::HeartbeatResp),
            5 => Some(Self::RegRegister),
            6 => Some(Self::RegUnregister),
            7 => Some(Self::RegLookup),
            8 => Some(Self::RegResponse),
            _ => None,
        }
    }
}

/// Envelope status: 0 OK, anything else FAIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    Fail,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::Fail => 1,
        }
    }

    pub fn from_code(code: u8) -> Self {
        if code == 0 { Status::Ok } else { Status::Fail }
    }
}

// ---------------------------------------------------------------------------
// Service key derivation
// ---------------------------------------------------------------------------

/// Canonical service key: `name_version_group`.
///
/// Null string fields are normalized to empty *before* derivation (the
/// deserializers below already do this), so consumers and the registry
/// derive identical keys for the same logical service.
pub fn service_key(name: &str, version: &str, group: &str) -> String {
    format!("{name}_{version}_{group}")
}

/// Key synthesized at the registry boundary for registrations whose
/// service name is empty.
pub fn unknown_service_key(address: &str) -> String {
    format!("unknown_service_{address}")
}

/// Canonical type name for a JSON parameter value, used to populate
/// `RpcRequest.parameter_types`.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

fn de_null_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Explicit nulls for string fields are equivalent to the empty string
    // everywhere.
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_weight() -> u32 {
    1
}

/// A remote method invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcRequest {
    #[serde(deserialize_with = "de_null_string")]
    pub service_name: String,
    #[serde(deserialize_with = "de_null_string")]
    pub method_name: String,
    /// Canonical type names, positionally matching `parameters`.
    pub parameter_types: Vec<String>,
    pub parameters: Vec<Value>,
    #[serde(deserialize_with = "de_null_string")]
    pub version: String,
    #[serde(deserialize_with = "de_null_string")]
    pub group: String,
}

impl RpcRequest {
    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.version, &self.group)
    }
}

/// The result of a remote method invocation.
///
/// `code` is nullable on the wire; provider-side dispatch coerces a missing
/// code to 500 before replying.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcResponse {
    pub code: Option<i64>,
    #[serde(deserialize_with = "de_null_string")]
    pub message: String,
    pub data: Value,
}

impl RpcResponse {
    pub fn success(data: Value) -> Self {
        RpcResponse {
            code: Some(codes::RESPONSE_SUCCESS),
            message: String::new(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        RpcResponse {
            code: Some(codes::RESPONSE_FAIL),
            message: message.into(),
            data: Value::Null,
        }
    }
}

/// A provider endpoint advertised to (and returned by) the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    #[serde(deserialize_with = "de_null_string")]
    pub service_name: String,
    #[serde(deserialize_with = "de_null_string")]
    pub version: String,
    #[serde(deserialize_with = "de_null_string")]
    pub group: String,
    /// `host:port` of the provider endpoint.
    #[serde(deserialize_with = "de_null_string")]
    pub address: String,
    /// Accepted in the model; the core load balancer ignores it.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl ServiceInfo {
    pub fn new(
        service_name: impl Into<String>,
        version: impl Into<String>,
        group: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        ServiceInfo {
            service_name: service_name.into(),
            version: version.into(),
            group: group.into(),
            address: address.into(),
            weight: 1,
        }
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.version, &self.group)
    }
}

/// A registry lookup by (name, version, group).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupRequest {
    #[serde(deserialize_with = "de_null_string")]
    pub service_name: String,
    #[serde(deserialize_with = "de_null_string")]
    pub version: String,
    #[serde(deserialize_with = "de_null_string")]
    pub group: String,
}

impl LookupRequest {
    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.version, &self.group)
    }
}

/// The body of a REG_RESPONSE, disambiguated by JSON shape:
/// null ⇒ ack, string ⇒ error message, array ⇒ lookup results.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryReply {
    Ack,
    Error(String),
    Services(Vec<ServiceInfo>),
}

// ---------------------------------------------------------------------------
// Message envelope
// ---------------------------------------------------------------------------

/// Typed payload, selected by the envelope's `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(RpcRequest),
    Response(RpcResponse),
    /// HEARTBEAT_REQ, carrying the ASCII token "PING".
    HeartbeatPing,
    /// HEARTBEAT_RESP, carrying the ASCII token "PONG".
    HeartbeatPong,
    Register(ServiceInfo),
    Unregister(ServiceInfo),
    Lookup(LookupRequest),
    RegistryReply(RegistryReply),
    /// A structurally valid frame with a `type` code this implementation
    /// does not know.  Receivers log and discard it; it never tears down
    /// the connection.
    Unknown { type_code: u8, body: Option<Value> },
}

impl Payload {
    pub fn type_code(&self) -> u8 {
        match self {
            Payload::Request(_) => MessageType::Request.code(),
            Payload::Response(_) => MessageType::Response.code(),
            Payload::HeartbeatPing => MessageType::HeartbeatReq.code(),
            Payload::HeartbeatPong => MessageType::HeartbeatResp.code(),
            Payload::Register(_) => MessageType::RegRegister.code(),
            Payload::Unregister(_) => MessageType::RegUnregister.code(),
            Payload::Lookup(_) => MessageType::RegLookup.code(),
            Payload::RegistryReply(_) => MessageType::RegResponse.code(),
            Payload::Unknown { type_code, .. } => *type_code,
        }
    }
}

/// The wire envelope.  `request_id` is assigned only by the initiating side
/// of an exchange and is strictly monotonic per client session.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub serialization: u8,
    pub compression: u8,
    pub request_id: u64,
    pub status: Status,
    pub payload: Payload,
}

impl Message {
    fn with_payload(request_id: u64, status: Status, payload: Payload) -> Self {
        Message {
            serialization: codes::SERIALIZATION_JSON,
            compression: codes::COMPRESSION_NONE,
            request_id,
            status,
            payload,
        }
    }

    pub fn request(request_id: u64, request: RpcRequest) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::Request(request))
    }

    pub fn response(request_id: u64, status: Status, response: RpcResponse) -> Self {
        Self::with_payload(request_id, status, Payload::Response(response))
    }

    pub fn ping(request_id: u64) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::HeartbeatPing)
    }

    pub fn pong(request_id: u64) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::HeartbeatPong)
    }

    pub fn register(request_id: u64, info: ServiceInfo) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::Register(info))
    }

    pub fn unregister(request_id: u64, info: ServiceInfo) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::Unregister(info))
    }

    pub fn lookup(request_id: u64, request: LookupRequest) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::Lookup(request))
    }

    pub fn registry_ok(request_id: u64) -> Self {
        Self::with_payload(request_id, Status::Ok, Payload::RegistryReply(RegistryReply::Ack))
    }

    pub fn registry_err(request_id: u64, message: impl Into<String>) -> Self {
        Self::with_payload(
            request_id,
            Status::Fail,
            Payload::RegistryReply(RegistryReply::Error(message.into())),
        )
    }

    pub fn registry_services(request_id: u64, services: Vec<ServiceInfo>) -> Self {
        Self::with_payload(
            request_id,
            Status::Ok,
            Payload::RegistryReply(RegistryReply::Services(services)),
        )
    }
}

// ---------------------------------------------------------------------------
// Wire form (flat JSON object) and conversions
// ---------------------------------------------------------------------------

/// Flat JSON rendering of the envelope.  Fields missing on the wire take
/// their zero value.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireMessage {
    #[serde(rename = "type")]
    type_code: u8,
    serialization: u8,
    compression: u8,
    request_id: u64,
    status: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl Message {
    /// Serialize to the flat JSON wire object.
    pub fn to_wire_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let payload = match &self.payload {
            Payload::Request(r) => Some(serde_json::to_value(r)?),
            Payload::Response(r) => Some(serde_json::to_value(r)?),
            Payload::HeartbeatPing => Some(Value::String(codes::PING.to_owned())),
            Payload::HeartbeatPong => Some(Value::String(codes::PONG.to_owned())),
            Payload::Register(i) | Payload::Unregister(i) => Some(serde_json::to_value(i)?),
            Payload::Lookup(l) => Some(serde_json::to_value(l)?),
            Payload::RegistryReply(RegistryReply::Ack) => None,
            Payload::RegistryReply(RegistryReply::Error(m)) => Some(Value::String(m.clone())),
            Payload::RegistryReply(RegistryReply::Services(s)) => Some(serde_json::to_value(s)?),
            Payload::Unknown { body, .. } => body.clone(),
        };
        serde_json::to_vec(&WireMessage {
            type_code: self.payload.type_code(),
            serialization: self.serialization,
            compression: self.compression,
            request_id: self.request_id,
            status: self.status.code(),
            payload,
        })
    }

    /// Decode the flat JSON wire object into a typed envelope.
    ///
    /// Unknown `type` codes decode into [`Payload::Unknown`]; a payload that
    /// does not match the shape its `type` demands is an error the session
    /// layer reports without closing the connection.
    pub fn from_wire_json(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireMessage = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::Malformed(format!("envelope JSON: {e}")))?;

        let mismatch = |expected: &str| {
            CodecError::Malformed(format!(
                "payload mismatch for message type {}: expected {expected}",
                wire.type_code
            ))
        };

        let body = wire.payload;
        let payload = match MessageType::from_code(wire.type_code) {
            Some(MessageType::Request) => Payload::Request(
                decode_body(body).map_err(|_| mismatch("request object"))?,
            ),
            Some(MessageType::Response) => Payload::Response(
                decode_body(body).map_err(|_| mismatch("response object"))?,
            ),
            Some(MessageType::HeartbeatReq) => Payload::HeartbeatPing,
            Some(MessageType::HeartbeatResp) => Payload::HeartbeatPong,
            Some(MessageType::RegRegister) => Payload::Register(
                decode_body(body).map_err(|_| mismatch("service info"))?,
            ),
            Some(MessageType::RegUnregister) => Payload::Unregister(
                decode_body(body).map_err(|_| mismatch("service info"))?,
            ),
            Some(MessageType::RegLookup) => Payload::Lookup(
                decode_body(body).map_err(|_| mismatch("lookup request"))?,
            ),
            Some(MessageType::RegResponse) => match body {
                None | Some(Value::Null) => Payload::RegistryReply(RegistryReply::Ack),
                Some(Value::String(m)) => Payload::RegistryReply(RegistryReply::Error(m)),
                Some(v @ Value::Array(_)) => Payload::RegistryReply(RegistryReply::Services(
                    serde_json::from_value(v).map_err(|_| mismatch("service info list"))?,
                )),
                Some(_) => return Err(mismatch("null, string or service info list")),
            },
            None => Payload::Unknown {
                type_code: wire.type_code,
                body,
            },
        };

        Ok(Message {
            serialization: wire.serialization,
            compression: wire.compression,
            request_id: wire.request_id,
            status: Status::from_code(wire.status),
            payload,
        })
    }
}

/// Decode an optional payload body; an absent body yields the type's
/// zero/empty value.
fn decode_body<T: Default + serde::de::DeserializeOwned>(
    body: Option<Value>,
) -> Result<T, serde_json::Error> {
    match body {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v),
    }
}
