//! Writer loop: the single consumer of the outbound queue.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use kodi_jsonrpc::JsonRpcRequest;

use crate::connection::Shared;
use crate::error::ClientResult;
use crate::reconnect::Reconnector;

/// Write queued requests in order until the outbound queue is closed
pub(crate) async fn run_writer(shared: Arc<Shared>, mut outbound: mpsc::Receiver<JsonRpcRequest>) {
    debug!("Writer loop started");

    while let Some(request) = outbound.recv().await {
        if let Err(e) = write_with_retry(&shared.reconnector, &request).await {
            error!(
                method = %request.method,
                id = ?request.id,
                error = %e,
                "Failed sending request, dropping it"
            );
            if let Some(id) = request.id {
                shared.pending.fail(id, e);
            }
        }
    }

    debug!("Writer loop stopped");
}

/// Write once; on failure reconnect and write exactly once more
async fn write_with_retry(reconnector: &Reconnector, request: &JsonRpcRequest) -> ClientResult<()> {
    let link = reconnector.link().await?;
    let failure = match link.write(request).await {
        Ok(()) => {
            trace!(method = %request.method, id = ?request.id, "Request written");
            return Ok(());
        }
        Err(e) => e,
    };

    warn!(
        method = %request.method,
        generation = link.generation(),
        error = %failure,
        "Failed encoding request, reconnecting"
    );
    let link = reconnector.reconnect(link.generation()).await?;
    link.write(request).await?;
    debug!(method = %request.method, generation = link.generation(), "Request written after reconnect");
    Ok(())
}
