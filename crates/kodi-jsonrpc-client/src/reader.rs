//! Reader loop: decodes incoming messages and routes them.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use kodi_jsonrpc::{JsonRpcMessage, MessageError, RawNotification};

use crate::connection::Shared;
use crate::error::{ClientError, ProtocolError, TransportError};
use crate::notifications::PushOutcome;
use crate::transport::Link;

/// Read until the connection closes, reconnecting on transport failures
pub(crate) async fn run_reader(shared: Arc<Shared>) {
    debug!("Reader loop started");

    let Ok(mut link) = shared.reconnector.link().await else {
        debug!("Reader loop stopped before first link");
        return;
    };

    loop {
        match link.read().await {
            Ok(Ok(message)) => dispatch(&shared, message),
            Ok(Err(e)) => warn!(error = %e, "Decoding message from server failed"),
            Err(e) => {
                if shared.closing.is_cancelled() {
                    break;
                }
                match e {
                    TransportError::Closed => {
                        debug!(generation = link.generation(), "Link replaced while reading")
                    }
                    e => {
                        error!(generation = link.generation(), error = %e, "Reading from server failed");
                        error!(
                            "If this error persists, make sure you are using the JSON-RPC port, not the HTTP port!"
                        );
                    }
                }
                match reconnect(&shared, link.generation()).await {
                    Some(replacement) => link = replacement,
                    None => break,
                }
            }
        }
    }

    debug!("Reader loop stopped");
}

/// Keep asking the controller for a link until one arrives or the connection closes
async fn reconnect(shared: &Shared, failed_generation: u64) -> Option<Arc<Link>> {
    loop {
        match shared.reconnector.reconnect(failed_generation).await {
            Ok(link) => return Some(link),
            Err(ClientError::ClosedConnection) => return None,
            Err(e) => warn!(error = %e, "Reconnect failed, trying again"),
        }
    }
}

fn dispatch(shared: &Shared, message: Value) {
    match JsonRpcMessage::classify(message) {
        Ok(JsonRpcMessage::Response(response)) => {
            debug!(id = %response.id, is_error = response.is_error(), "Received response");
            if let Err(response) = shared.pending.deliver(response) {
                warn!(id = %response.id, "Received response for unknown request");
            }
        }
        Ok(JsonRpcMessage::Notification(raw)) => deliver_notification(shared, raw),
        Ok(JsonRpcMessage::Unparseable(message)) => {
            warn!(message = %message, "Received unparseable message")
        }
        Err(MessageError::InvalidErrorObject { id, source }) => {
            warn!(id = %id, error = %source, "Received response with malformed error object");
            let reason = format!("malformed error object: {source}");
            shared
                .pending
                .fail(id, ProtocolError::InvalidResponse(reason).into());
        }
        Err(e) => warn!(error = %e, "Received malformed message"),
    }
}

fn deliver_notification(shared: &Shared, raw: RawNotification) {
    let method = raw.method.clone();
    let notification = match raw.decode() {
        Ok(notification) => notification,
        Err(e) => {
            warn!(method = %method, error = %e, "Decoding notification failed");
            return;
        }
    };
    debug!(
        method = %notification.method,
        item_type = ?notification.item_type(),
        "Received notification"
    );

    // Enqueue inline while there is room so arrival order holds; only a full queue
    // needs a delivery task that may wait out the grace period
    if let Err(notification) = shared.notifications.try_push(notification) {
        let queue = shared.notifications.clone();
        shared.deliveries.spawn(async move {
            if queue.push(notification).await == PushOutcome::Discarded {
                debug!(method = %method, "Notification discarded, connection closed");
            }
        });
    }
}
