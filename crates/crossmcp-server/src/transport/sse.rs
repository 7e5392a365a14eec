//! SSE framing for the server-to-client event stream.
//!
//! Both the streamable-http GET stream and the legacy SSE transport
//! deliver outbound frames as `message` events; the event id carries a
//! monotonic sequence so clients can resume with `Last-Event-ID`.

use super::adapter::OutboundFrame;
use crate::error::ServerResult;
use bytes::Bytes;
use crossmcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Serialize)]
#[serde(untagged)]
enum WireFrame<'a> {
    Response(&'a JsonRpcResponse),
    Request(&'a JsonRpcRequest),
    Notification(&'a JsonRpcNotification),
}

/// Render one frame as an SSE `message` event.
pub fn frame_event(frame: &OutboundFrame, event_id: u64) -> ServerResult<String> {
    let wire = match frame {
        OutboundFrame::Response(response) => WireFrame::Response(response),
        OutboundFrame::Request(request) => WireFrame::Request(request),
        OutboundFrame::Notification(notification) => WireFrame::Notification(notification),
    };
    let data = serde_json::to_string(&wire)?;
    Ok(format!("id: {event_id}\nevent: message\ndata: {data}\n\n"))
}

/// Turn an outbound channel into a byte stream of SSE events.
pub fn event_stream(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
) -> impl Stream<Item = ServerResult<Bytes>> {
    async_stream::stream! {
        let mut event_id: u64 = 0;
        while let Some(frame) = rx.recv().await {
            event_id += 1;
            yield frame_event(&frame, event_id).map(Bytes::from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossmcp_protocol::jsonrpc::RequestId;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn frames_render_as_message_events() {
        let response = JsonRpcResponse::success(json!({"ok": true}), RequestId::from(7));
        let event = frame_event(&OutboundFrame::Response(response), 3).unwrap();

        assert!(event.starts_with("id: 3\nevent: message\ndata: "));
        assert!(event.ends_with("\n\n"));
        let data = event
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(parsed["result"]["ok"], true);
        assert_eq!(parsed["id"], 7);
    }

    #[tokio::test]
    async fn stream_assigns_sequential_ids() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(OutboundFrame::Notification(JsonRpcNotification::new(
            "notifications/a",
            None,
        )))
        .unwrap();
        tx.send(OutboundFrame::Notification(JsonRpcNotification::new(
            "notifications/b",
            None,
        )))
        .unwrap();
        drop(tx);

        let events: Vec<String> = event_stream(rx)
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("id: 1\n"));
        assert!(events[1].starts_with("id: 2\n"));
    }
}
