//! The bidirectional, binary-clean copy loop shared by every leg of the
//! proxy path (spec §5): two independent pumps joined by "first completes
//! cancels the other", preserving FIFO order within each leg while placing
//! no ordering constraint between them.

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use gw_common::error::GwResult;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Runs both directions of a proxy leg to completion. Returns once either
/// side closes or errors; the caller is responsible for tearing down
/// whatever owns the `upstream` leg (killing a bridge adapter, dropping a
/// cluster VM connection) once this returns.
pub async fn pump_bidirectional<S>(
    downstream: WebSocket,
    upstream: WebSocketStream<S>,
) -> GwResult<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut down_tx, mut down_rx) = downstream.split();
    let (mut up_tx, mut up_rx) = upstream.split();

    let down_to_up = async {
        while let Some(msg) = down_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, "downstream leg errored");
                    break;
                }
            };
            let Some(converted) = axum_to_tungstenite(msg) else {
                break;
            };
            if up_tx.send(converted).await.is_err() {
                break;
            }
        }
        let _ = up_tx.close().await;
    };

    let up_to_down = async {
        while let Some(msg) = up_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, "upstream leg errored");
                    break;
                }
            };
            let Some(converted) = tungstenite_to_axum(msg) else {
                break;
            };
            if down_tx.send(converted).await.is_err() {
                break;
            }
        }
        let _ = down_tx.close().await;
    };

    tokio::select! {
        _ = down_to_up => {}
        _ = up_to_down => {}
    }

    Ok(())
}

fn axum_to_tungstenite(msg: AxumMessage) -> Option<TungsteniteMessage> {
    match msg {
        AxumMessage::Binary(b) => Some(TungsteniteMessage::Binary(b)),
        AxumMessage::Text(t) => Some(TungsteniteMessage::Text(t)),
        AxumMessage::Ping(p) => Some(TungsteniteMessage::Ping(p)),
        AxumMessage::Pong(p) => Some(TungsteniteMessage::Pong(p)),
        AxumMessage::Close(frame) => Some(TungsteniteMessage::Close(frame.map(|f| {
            TungsteniteCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason,
            }
        }))),
    }
}

fn tungstenite_to_axum(msg: TungsteniteMessage) -> Option<AxumMessage> {
    match msg {
        TungsteniteMessage::Binary(b) => Some(AxumMessage::Binary(b)),
        TungsteniteMessage::Text(t) => Some(AxumMessage::Text(t)),
        TungsteniteMessage::Ping(p) => Some(AxumMessage::Ping(p)),
        TungsteniteMessage::Pong(p) => Some(AxumMessage::Pong(p)),
        TungsteniteMessage::Close(frame) => Some(AxumMessage::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason,
        }))),
        TungsteniteMessage::Frame(_) => {
            warn!("dropped raw tungstenite frame with no axum equivalent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axum_close_frame_round_trips_through_tungstenite() {
        let frame = CloseFrame {
            code: 1000,
            reason: "bye".into(),
        };
        let converted = axum_to_tungstenite(AxumMessage::Close(Some(frame.clone())));
        let TungsteniteMessage::Close(Some(tframe)) = converted.unwrap() else {
            panic!("expected close frame");
        };
        let back = tungstenite_to_axum(TungsteniteMessage::Close(Some(tframe))).unwrap();
        let AxumMessage::Close(Some(back_frame)) = back else {
            panic!("expected close frame");
        };
        assert_eq!(back_frame.code, frame.code);
        assert_eq!(back_frame.reason, frame.reason);
    }

    #[test]
    fn binary_payload_is_preserved_byte_for_byte() {
        let payload = b"RFB 003.008\n".to_vec();
        let converted = axum_to_tungstenite(AxumMessage::Binary(payload.clone())).unwrap();
        let TungsteniteMessage::Binary(b) = converted else {
            panic!("expected binary");
        };
        assert_eq!(b, payload);
    }
}
