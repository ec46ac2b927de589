use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use livefeed::{
    Client, ConnectionState, StreamError, Subscription, WebSocketMessage, WebSocketOptions,
    WsPayload,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Echo server. Every close frame it receives is reported on the channel.
async fn echo_server() -> (String, mpsc::UnboundedReceiver<(u16, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closes_tx, closes_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let closes_tx = closes_tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if socket.send(message).await.is_err() {
                                return;
                            }
                        }
                        Message::Close(frame) => {
                            let info = frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((1005, String::new()));
                            let _ = closes_tx.send(info);
                            return;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("http://{}", addr), closes_rx)
}

/// Server that closes every connection with `1001 bye` and reports whether
/// the client answered with a close frame of its own.
async fn closing_server() -> (String, mpsc::UnboundedReceiver<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let replies_tx = replies_tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = accept_async(stream).await else {
                    return;
                };
                let farewell = CloseFrame {
                    code: CloseCode::Away,
                    reason: "bye".into(),
                };
                if socket.send(Message::Close(Some(farewell))).await.is_err() {
                    return;
                }
                let answered = loop {
                    match socket.next().await {
                        Some(Ok(Message::Close(_))) => break true,
                        Some(Ok(_)) => continue,
                        _ => break false,
                    }
                };
                let _ = replies_tx.send(answered);
            });
        }
    });

    (format!("ws://{}", addr), replies_rx)
}

async fn next_payload(messages: &mut Subscription<WebSocketMessage>) -> WsPayload {
    tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("session ended")
        .expect("session failed")
        .payload
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (base_url, mut closes) = echo_server().await;
    let client = Client::builder().base_url(base_url).build().unwrap();

    let (ws, mut messages) = client
        .connect_websocket("/echo", WebSocketOptions::default())
        .unwrap();

    match next_payload(&mut messages).await {
        WsPayload::Open(url) => assert!(url.starts_with("ws://127.0.0.1:")),
        other => panic!("expected open, got {:?}", other),
    }
    assert_eq!(ws.state(), ConnectionState::Connected);

    ws.send_text("hello").unwrap();
    assert_eq!(next_payload(&mut messages).await, WsPayload::Text("hello".into()));

    ws.send_binary(vec![0u8, 1, 2]).unwrap();
    assert_eq!(
        next_payload(&mut messages).await,
        WsPayload::Binary(Bytes::from_static(&[0, 1, 2]))
    );

    ws.disconnect_with(4000, "done").await;
    assert_eq!(
        next_payload(&mut messages).await,
        WsPayload::Close {
            code: 4000,
            reason: "done".into()
        }
    );
    assert!(messages.recv().await.is_none());
    assert!(matches!(ws.send_text("late"), Err(StreamError::NotConnected)));

    let close = tokio::time::timeout(Duration::from_secs(5), closes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(close, (4000, "done".to_string()));
}

#[tokio::test]
async fn test_explicit_ping_is_answered() {
    let (base_url, _closes) = echo_server().await;
    let client = Client::builder().base_url(base_url).build().unwrap();

    let (ws, mut messages) = client
        .connect_websocket("/echo", WebSocketOptions::default())
        .unwrap();
    assert!(matches!(next_payload(&mut messages).await, WsPayload::Open(_)));

    ws.ping(Bytes::from_static(b"are you there")).unwrap();
    assert_eq!(
        next_payload(&mut messages).await,
        WsPayload::Ping(Bytes::from_static(b"are you there"))
    );
    assert_eq!(
        next_payload(&mut messages).await,
        WsPayload::Pong(Bytes::from_static(b"are you there"))
    );

    ws.disconnect().await;
}

#[tokio::test]
async fn test_refused_connection_gives_up() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new();
    let (ws, messages) = client
        .connect_websocket(
            &format!("ws://{}/", addr),
            WebSocketOptions::new()
                .reconnect_interval(Duration::from_millis(20))
                .max_reconnect_attempts(2),
        )
        .unwrap();

    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(5), messages.collect::<Vec<_>>())
        .await
        .unwrap();

    assert_eq!(items.len(), 4);
    assert!(items[..3]
        .iter()
        .all(|item| matches!(item.as_ref().unwrap().payload, WsPayload::Error(_))));
    assert!(items[3].is_err());
    assert_eq!(ws.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_remote_close_is_answered() {
    let (base_url, mut replies) = closing_server().await;
    let client = Client::new();

    let (ws, mut messages) = client
        .connect_websocket(
            &format!("{}/bye", base_url),
            WebSocketOptions::new().auto_reconnect(false),
        )
        .unwrap();

    assert!(matches!(next_payload(&mut messages).await, WsPayload::Open(_)));
    assert_eq!(
        next_payload(&mut messages).await,
        WsPayload::Close {
            code: 1001,
            reason: "bye".into()
        }
    );

    let answered = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(answered);

    ws.disconnect().await;
}
