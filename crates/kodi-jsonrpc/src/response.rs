use serde_json::{Map, Value};

use crate::error::{JsonRpcErrorObject, MessageError};
use crate::notification::RawNotification;
use crate::types::RequestId;

/// A decoded response to an earlier request
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcErrorObject) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the result payload or the server-reported error.
    ///
    /// An error object takes precedence over a result. A missing or `null` result
    /// yields `Ok(None)`.
    pub fn into_result(self) -> Result<Option<Value>, JsonRpcErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.filter(|result| !result.is_null())),
        }
    }
}

/// Classification of one message read off the wire
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Carries an identifier: answers a request
    Response(JsonRpcResponse),
    /// No identifier, has a method: pushed by the server
    Notification(RawNotification),
    /// Neither identifier nor method
    Unparseable(Value),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value.
    ///
    /// An identifier wins over a method; a message with neither is `Unparseable`.
    /// Fields with the wrong type are reported as [`MessageError`].
    pub fn classify(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut object) = value else {
            return Err(MessageError::NotAnObject(preview(&value)));
        };

        let id = match take_non_null(&mut object, "id") {
            Some(raw) => Some(RequestId::from_value(&raw).ok_or(MessageError::InvalidField {
                field: "id",
                expected: "non-negative integer",
            })?),
            None => None,
        };

        let method = match take_non_null(&mut object, "method") {
            Some(Value::String(method)) => Some(method),
            Some(_) => {
                return Err(MessageError::InvalidField {
                    field: "method",
                    expected: "string",
                });
            }
            None => None,
        };

        match (id, method) {
            (Some(id), _) => {
                let error = take_non_null(&mut object, "error")
                    .map(serde_json::from_value::<JsonRpcErrorObject>)
                    .transpose()
                    .map_err(|source| MessageError::InvalidErrorObject { id, source })?;
                Ok(JsonRpcMessage::Response(JsonRpcResponse {
                    id,
                    result: take_non_null(&mut object, "result"),
                    error,
                }))
            }
            (None, Some(method)) => Ok(JsonRpcMessage::Notification(RawNotification {
                method,
                params: take_non_null(&mut object, "params"),
            })),
            (None, None) => Ok(JsonRpcMessage::Unparseable(Value::Object(object))),
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Notification(_))
    }
}

fn take_non_null(object: &mut Map<String, Value>, field: &str) -> Option<Value> {
    object.remove(field).filter(|value| !value.is_null())
}

fn preview(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 64 {
        let mut cut = 64;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
