use axum::{
    debug_handler,
    extract::{Path, Query, State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    AppResult,
    platform::{Filter, Listen, Platform, PlatformError, PlatformResult, Table},
};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    access_token: String,
    column: Option<String>,
    eq: Option<String>,
}

/// What the caller may listen to on `table`. Room-scoped tables need a
/// `room_id` filter on a room the caller belongs to; moderation tables are
/// for admins.
async fn authorize(platform: &Platform, table: Table, query: &FeedQuery) -> PlatformResult<Listen> {
    let caller = platform.caller(&query.access_token).await?;
    caller.require_active()?;

    let requested = match (&query.column, &query.eq) {
        (Some(column), Some(eq)) => Some((column.as_str(), eq.as_str())),
        (None, None) => None,
        _ => return Err(PlatformError::forbidden("column and eq go together")),
    };

    let filter = match table {
        Table::Messages | Table::Files => {
            let room_id = requested
                .filter(|(column, _)| *column == "room_id")
                .and_then(|(_, eq)| Uuid::parse_str(eq).ok())
                .ok_or_else(|| PlatformError::forbidden("a room_id filter is required"))?;

            if !platform.is_room_member(room_id, caller.id).await? {
                return Err(PlatformError::forbidden("not a member of this room"));
            }
            Some(Filter::eq("room_id", room_id))
        }
        Table::Profiles | Table::Reports => {
            caller.require_admin()?;
            requested.map(column_filter)
        }
        Table::Rooms | Table::RoomMembers => requested.map(column_filter),
    };

    let listen = Listen::table(table);
    Ok(match filter {
        Some(filter) => listen.filter(filter),
        None => listen,
    })
}

/// Query values arrive as text while rows carry typed JSON. Ids are
/// normalised and JSON scalars are read as such; anything else is a string.
fn column_filter((column, eq): (&str, &str)) -> Filter {
    if let Ok(id) = Uuid::parse_str(eq) {
        return Filter::eq(column, id);
    }
    match serde_json::from_str::<Value>(eq) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => Filter::eq(column, value),
        _ => Filter::eq(column, eq),
    }
}

#[debug_handler(state = super::AppState)]
pub async fn changes(
    Path(table): Path<Table>,
    Query(query): Query<FeedQuery>,
    State(platform): State<Platform>,

    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let listen = authorize(&platform, table, &query).await?;
    let mut channel = platform
        .realtime()
        .channel(format!("ws-{table}"))
        .on(listen)
        .subscribe();
    info!(%table, "change feed opened");

    Ok(ws.on_upgrade(async move |socket| {
        let (mut sender, mut receiver) = socket.split();

        let mut forward = tokio::spawn(async move {
            while let Some(change) = channel.recv().await {
                let Ok(text) = serde_json::to_string(&change) else {
                    continue;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // inbound frames are ignored; the loop only notices the close
        let mut inbound = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut forward => inbound.abort(),
            _ = &mut inbound => forward.abort(),
        };
        debug!(%table, "change feed closed");
    }))
}
