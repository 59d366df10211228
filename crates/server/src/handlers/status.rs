//! Upload status polling, extra metadata, and the live event stream.

use crate::error::{ApiError, ApiResult};
use crate::handlers::IdQuery;
use crate::metrics::EVENT_STREAMS_ACTIVE;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use parcel_core::UploadStatus;
use parcel_storage::Ticker;
use serde_json::json;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// GET /v1/status?id=
pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Json<UploadStatus>> {
    let id = query.archive_id()?;
    Ok(Json(state.store.status(&id).await?))
}

/// POST /v1/status?id=
///
/// Attaches an arbitrary JSON value to the upload. The upload does not need
/// to exist yet.
pub async fn set_extra(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let id = query.archive_id()?;
    let extra: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    state.store.set_extra(&id, extra);
    Ok(Json(json!({"status": "ok"})))
}

/// Ends the ticker and releases the gauge when the client goes away.
struct EventStreamGuard {
    _cancel: DropGuard,
}

impl EventStreamGuard {
    fn new(cancel: CancellationToken) -> Self {
        EVENT_STREAMS_ACTIVE.inc();
        Self {
            _cancel: cancel.drop_guard(),
        }
    }
}

impl Drop for EventStreamGuard {
    fn drop(&mut self) {
        EVENT_STREAMS_ACTIVE.dec();
    }
}

/// GET /v1/events?id=
///
/// Server-sent `status` events at the configured cadence until the upload
/// reaches a terminal state or the client disconnects.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = query.archive_id()?;
    let (counter, size) = state.store.progress(&id).await?;

    let cancel = CancellationToken::new();
    let rx = Ticker::spawn(counter, state.events_interval(), cancel.clone());
    let guard = EventStreamGuard::new(cancel);
    debug!(upload = %id, "Opened status event stream");

    let events = futures::stream::unfold((rx, guard), move |(mut rx, guard)| async move {
        let Some(progress) = rx.recv().await else {
            return None;
        };
        let event = Event::default()
            .event("status")
            .json_data(progress.to_status(size));
        Some((event, (rx, guard)))
    });

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events),
    ))
}
