//! Pending-request table and the caller-facing response handle.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use kodi_jsonrpc::{JsonRpcResponse, RequestId, value::kind_of};

use crate::error::{ClientError, ClientResult, ProtocolError};

type Slot = oneshot::Sender<ClientResult<JsonRpcResponse>>;

struct PendingTable {
    next_id: u32,
    slots: HashMap<RequestId, Slot>,
}

/// Outstanding requests keyed by identifier.
///
/// The identifier counter lives under the same lock as the slots, so an identifier is
/// never handed out while a slot with that identifier is still registered.
pub(crate) struct PendingRequests {
    table: Mutex<PendingTable>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(PendingTable {
                next_id: 0,
                slots: HashMap::new(),
            }),
        }
    }

    /// Assign an identifier and register a slot for it
    pub(crate) fn register(&self) -> (RequestId, oneshot::Receiver<ClientResult<JsonRpcResponse>>) {
        let mut table = self.table.lock();
        let mut id = RequestId(table.next_id);
        while table.slots.contains_key(&id) {
            id = id.next();
        }
        table.next_id = id.next().value();

        let (sender, receiver) = oneshot::channel();
        table.slots.insert(id, sender);
        (id, receiver)
    }

    /// Fill the slot for `response.id`. Gives the response back if nobody is waiting.
    pub(crate) fn deliver(&self, response: JsonRpcResponse) -> Result<(), JsonRpcResponse> {
        let Some(slot) = self.table.lock().slots.remove(&response.id) else {
            return Err(response);
        };
        // The receiver may have gone away between lookup and send
        match slot.send(Ok(response)) {
            Ok(()) | Err(Err(_)) => Ok(()),
            Err(Ok(response)) => Err(response),
        }
    }

    /// Fail the slot for `id` with `error`, if it is still registered
    pub(crate) fn fail(&self, id: RequestId, error: ClientError) {
        if let Some(slot) = self.table.lock().slots.remove(&id) {
            let _ = slot.send(Err(error));
        }
    }

    /// Drop the slot for `id` without filling it
    pub(crate) fn retire(&self, id: RequestId) -> bool {
        self.table.lock().slots.remove(&id).is_some()
    }

    /// Drop every slot; waiting readers observe a closed connection
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<Slot> = self.table.lock().slots.drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(ClientError::ClosedConnection));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().slots.len()
    }

    #[cfg(test)]
    fn set_next_id(&self, next_id: u32) {
        self.table.lock().next_id = next_id;
    }
}

/// Handle for the response to one sent request.
///
/// A handle is pending until it has been read once. Handles for requests sent without
/// wanting a response are never pending.
pub struct ResponseHandle {
    id: Option<RequestId>,
    receiver: Option<oneshot::Receiver<ClientResult<JsonRpcResponse>>>,
    pending: Option<Arc<PendingRequests>>,
}

impl ResponseHandle {
    pub(crate) fn pending(
        id: RequestId,
        receiver: oneshot::Receiver<ClientResult<JsonRpcResponse>>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            id: Some(id),
            receiver: Some(receiver),
            pending: Some(pending),
        }
    }

    /// Handle for a request that expects no response
    pub(crate) fn none() -> Self {
        Self {
            id: None,
            receiver: None,
            pending: None,
        }
    }

    /// Whether a read on this handle can still yield a response
    pub fn is_pending(&self) -> bool {
        self.receiver.is_some()
    }

    /// Identifier assigned to the request, if it wanted a response
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    /// Wait for the result mapping. A zero `timeout` waits indefinitely.
    ///
    /// A `null` or absent result reads as an empty map; any other non-object result is
    /// a protocol error (use [`read_value`](Self::read_value) for those methods).
    pub async fn read(&mut self, timeout: Duration) -> ClientResult<Map<String, Value>> {
        match self.read_value(timeout).await? {
            Value::Null => Ok(Map::new()),
            Value::Object(result) => Ok(result),
            other => Err(ProtocolError::InvalidResponse(format!(
                "expected an object result, found {}",
                kind_of(&other)
            ))
            .into()),
        }
    }

    /// Wait for the raw result value. A zero `timeout` waits indefinitely.
    pub async fn read_value(&mut self, timeout: Duration) -> ClientResult<Value> {
        let Some(receiver) = self.receiver.take() else {
            return Err(ClientError::NoPendingResponse);
        };

        let delivered = if timeout.is_zero() {
            receiver.await
        } else {
            match tokio::time::timeout(timeout, receiver).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    self.retire();
                    debug!(id = ?self.id, timeout_ms = timeout.as_millis() as u64, "Read timed out");
                    return Err(ClientError::ReadTimeout);
                }
            }
        };
        self.pending = None;

        let response = delivered.map_err(|_| ClientError::ClosedConnection)??;
        Ok(response.into_result()?.unwrap_or(Value::Null))
    }

    fn retire(&mut self) {
        if let (Some(id), Some(pending)) = (self.id, self.pending.take()) {
            pending.retire(id);
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        // Also covers a read future dropped mid-wait
        self.retire();
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}
