use super::protocol::*;
use super::router::RequestRouter;
use crate::correlation::table::Correlations;
use crate::correlation::types::ReplyEnvelope;
use crate::error::CommandError;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_forward_command(
    Extension(router): Extension<Arc<RequestRouter>>,
    Json(req): Json<ForwardCommandRequest>,
) -> (StatusCode, Json<ForwardResponse>) {
    tracing::debug!(
        "Received forwarded {} for {} from {}",
        req.command.kind(),
        req.command.dataset(),
        req.from
    );

    match router.accept_forwarded(req.command).await {
        Ok(()) => (StatusCode::OK, Json(ForwardResponse::accepted())),
        Err(e) => {
            let status = match &e {
                CommandError::Moved { .. } => StatusCode::CONFLICT,
                CommandError::NotAuthoritative
                | CommandError::Unavailable(_)
                | CommandError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                CommandError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ForwardResponse::rejected(e)))
        }
    }
}

pub async fn handle_reply(
    Extension(correlations): Extension<Arc<Correlations>>,
    Json(envelope): Json<ReplyEnvelope>,
) -> (StatusCode, Json<ReplyResponse>) {
    // Late replies are normal after a deadline; still answer 200.
    let delivered = correlations.deliver(envelope);
    (StatusCode::OK, Json(ReplyResponse { delivered }))
}
