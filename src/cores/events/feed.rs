//! Consumers of the event bus: SSE endpoint, JSON-lines sink and console printer.
use futures::{Future, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use warp::{Filter, sse};

use super::bus::{EventBus, EventStream};
use crate::errors::UltrascanError;

fn with_bus(bus: EventBus) -> impl Filter<Extract = (EventBus,), Error = Infallible> + Clone {
    warp::any().map(move || bus.clone())
}

/// `GET /stream` (server-sent events, one JSON event per message) and
/// `GET /health`.
pub fn routes(
    bus: EventBus,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let stream = warp::path("stream")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_bus(bus.clone()))
        .map(|bus: EventBus| {
            let events = bus.subscribe().into_stream().filter_map(|event| async move {
                let data = event.to_json_line().ok()?;
                Some(Ok::<_, Infallible>(sse::Event::default().data(data)))
            });
            sse::reply(sse::keep_alive().stream(events))
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_bus(bus))
        .map(|bus: EventBus| {
            warp::reply::json(&json!({
                "status": if bus.is_closed() { "finished" } else { "running" },
                "events": bus.published(),
            }))
        });

    stream.or(health)
}

/// Bind the feed server. The returned future runs until `shutdown` fires and
/// open streams have ended.
pub fn serve(
    bus: EventBus,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), UltrascanError> {
    warp::serve(routes(bus))
        .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })
        .map_err(|e| UltrascanError::Config(format!("cannot bind live feed on {addr}: {e}")))
}

pub async fn write_json_lines<W>(mut events: EventStream, mut writer: W) -> Result<u64, UltrascanError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(event) = events.next().await {
        let mut line = event.to_json_line()?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        written += 1;
    }
    writer.flush().await?;
    Ok(written)
}

pub async fn print_console(mut events: EventStream) -> u64 {
    let mut printed = 0u64;
    while let Some(event) = events.next().await {
        println!("{}", event.console_line());
        printed += 1;
    }
    printed
}
