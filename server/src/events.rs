//! Server-sent events bridge for the broadcast hub.
//!
//! Each SSE client gets its own hub subscription. A blocking task moves
//! events from the hub's channel into a tokio channel the response streams
//! from; it ends when either side goes away.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use mirrortv_ipc::HubEvent;

use crate::error::ApiError;
use crate::state::AppState;

/// How often the bridge checks whether the SSE client is still connected.
const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

const BRIDGE_BUFFER: usize = 16;

#[tracing::instrument(skip(state))]
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let engine = state.engine.clone();
    let hub_rx = tokio::task::spawn_blocking(move || engine.subscribe())
        .await
        .map_err(|e| ApiError::internal(format!("Subscribe task failed: {e}")))??;

    info!("SSE client connected");

    let (tx, rx) = mpsc::channel(BRIDGE_BUFFER);
    tokio::task::spawn_blocking(move || bridge(hub_rx, tx));

    let stream = ReceiverStream::new(rx).filter_map(|event| match to_sse_event(&event) {
        Ok(sse) => Some(Ok(sse)),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn bridge(hub_rx: Receiver<HubEvent>, tx: mpsc::Sender<HubEvent>) {
    loop {
        match hub_rx.recv_timeout(BRIDGE_POLL_INTERVAL) {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Hub dropped SSE subscriber");
                break;
            }
        }
    }
    info!("SSE client disconnected");
}

/// SSE event named after the hub event, with the JSON body as data.
fn to_sse_event(event: &HubEvent) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(Event::default().event(event.name()).data(data))
}
