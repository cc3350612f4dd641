use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::HubError;
use crate::hub::Hub;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

/// Every HTTP and WebSocket route the hub serves.
pub fn routes(hub: Arc<Hub>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub.clone()))
        .map(|ws: warp::ws::Ws, hub: Arc<Hub>| {
            ws.on_upgrade(move |socket| hub.handle_connection(socket))
        });

    let history_route = warp::path!("groups" / String / "messages")
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(with_hub(hub.clone()))
        .and_then(history);

    let health_route = warp::path!("health")
        .and(warp::get())
        .and(with_hub(hub.clone()))
        .and_then(health);

    let static_files = warp::fs::dir(hub.config().static_dir.clone());

    ws_route
        .or(history_route)
        .or(health_route)
        .or(static_files)
        .with(warp::cors().allow_any_origin())
}

fn with_hub(hub: Arc<Hub>) -> impl Filter<Extract = (Arc<Hub>,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

async fn history(
    group_id: String,
    query: HistoryQuery,
    hub: Arc<Hub>,
) -> Result<warp::reply::Response, Infallible> {
    match hub.history(&query.user_id, &group_id, query.limit).await {
        Ok(messages) => Ok(warp::reply::json(&messages).into_response()),
        Err(err) => Ok(error_reply(&err).into_response()),
    }
}

async fn health(hub: Arc<Hub>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "ok",
        "connections": hub.registry().len().await,
        "users": hub.registry().user_count().await,
        "rooms": hub.rooms().room_count().await,
    })))
}

fn error_reply(err: &HubError) -> impl Reply {
    let status = match err {
        HubError::Unauthorized(_) => StatusCode::FORBIDDEN,
        HubError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(warp::reply::json(&json!({ "error": err.to_string() })), status)
}
