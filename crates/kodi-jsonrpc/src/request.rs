use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// Named request parameters
pub type Params = Map<String, Value>;

/// A JSON-RPC request.
///
/// `id` is present iff a response is wanted; the client assigns it at send time, so
/// requests are normally built without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
}

impl JsonRpcRequest {
    /// Create a request with no parameters
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
            version: JsonRpcVersion::V2_0,
        }
    }

    /// Replace the parameter map
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Add a single named parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Get a parameter by name
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// Whether this request expects a response
    pub fn wants_response(&self) -> bool {
        self.id.is_some()
    }
}
