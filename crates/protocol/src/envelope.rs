use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Error details carried by an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// An envelope that does not fit the exchange it belongs to.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0:?} without payload")]
    MissingPayload(MessageType),

    #[error("{0:?} is not answered")]
    NoResponse(MessageType),

    #[error("reply id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("expected {expected:?} reply, got {actual:?}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorBody),
}

/// Envelope for every frame exchanged between uploader and store.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the receiver knows which type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: raw,
            error: None,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Deserializes a payload this message type cannot go without.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        self.parse_payload()?
            .ok_or(EnvelopeError::MissingPayload(self.msg_type))
    }

    /// Creates an error message.
    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Answers this request with the response type its own type calls for.
    pub fn respond<T: Serialize>(&self, payload: &T) -> Result<Self, EnvelopeError> {
        let msg_type = self
            .msg_type
            .response_type()
            .ok_or(EnvelopeError::NoResponse(self.msg_type))?;
        Ok(Message::new(&self.id, msg_type, Some(payload))?)
    }

    /// Creates an error response for this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Message::error(&self.id, code, message)
    }

    /// Reads this message as the answer to request `request_id` of type
    /// `request_type`.
    ///
    /// The id must match. An error envelope becomes [`EnvelopeError::Remote`];
    /// any other type than the request's response type is rejected before
    /// the payload is decoded.
    pub fn into_response<T: DeserializeOwned>(
        mut self,
        request_id: &str,
        request_type: MessageType,
    ) -> Result<T, EnvelopeError> {
        if self.id != request_id {
            return Err(EnvelopeError::IdMismatch {
                expected: request_id.to_string(),
                actual: self.id,
            });
        }
        if let Some(body) = self.error.take() {
            return Err(EnvelopeError::Remote(body));
        }
        let expected = request_type
            .response_type()
            .ok_or(EnvelopeError::NoResponse(request_type))?;
        if self.msg_type != expected {
            return Err(EnvelopeError::UnexpectedType {
                expected,
                actual: self.msg_type,
            });
        }
        self.payload_as()
    }
}
