use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::Bus;
use crate::dispatch::SessionRegistry;
use crate::model::{PriceTick, TriggeredAlert};

/// Server-to-client events.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerEvent<'a> {
    #[serde(rename = "connection-success")]
    ConnectionSuccess { client_id: Uuid },
    #[serde(rename = "price-update")]
    PriceUpdate {
        symbol: &'a str,
        price: f64,
        event_time_ms: i64,
    },
    #[serde(rename = "triggered-alert")]
    TriggeredAlert(&'a TriggeredAlert),
}

/// Client-to-server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "subscribe-symbol")]
    SubscribeSymbol { symbol: String },
    #[serde(rename = "unsubscribe-symbol")]
    UnsubscribeSymbol { symbol: String },
    #[serde(rename = "request-prices")]
    RequestPrices { symbols: Vec<String> },
}

#[derive(Clone)]
pub struct WsState {
    pub bus: Arc<Bus>,
    pub sessions: Arc<SessionRegistry>,
}

pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: WsState) {
    let session_id = Uuid::new_v4();
    state.sessions.register(session_id, None);
    info!(%session_id, "ws session connected");

    let greeting = ServerEvent::ConnectionSuccess { client_id: session_id };
    if send_event(&mut socket, &greeting).await.is_err() {
        state.sessions.unregister(session_id);
        return;
    }

    let mut prices_rx = state.bus.subscribe_prices();
    let mut alerts_rx = state.bus.subscribe_alerts();

    loop {
        tokio::select! {
            tick = prices_rx.recv() => {
                match tick {
                    Ok(tick) => {
                        if !state.sessions.should_deliver(session_id, &tick.symbol) {
                            continue;
                        }
                        if send_event(&mut socket, &price_event(&tick)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%session_id, skipped = n, "ws session lagged on prices topic");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            triggered = alerts_rx.recv() => {
                match triggered {
                    Ok(triggered) => {
                        if !state.sessions.should_deliver(session_id, &triggered.symbol) {
                            continue;
                        }
                        if send_event(&mut socket, &ServerEvent::TriggeredAlert(&triggered)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%session_id, skipped = n, "ws session lagged on alerts topic, disconnecting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_client_message(&state, session_id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.unregister(session_id);
    info!(%session_id, "ws session disconnected");
}

fn handle_client_message(state: &WsState, session_id: Uuid, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(%session_id, error = ?err, "ignoring malformed ws client message");
            return;
        }
    };

    match message {
        ClientMessage::SubscribeSymbol { symbol } => state.sessions.subscribe_symbol(session_id, &symbol),
        ClientMessage::UnsubscribeSymbol { symbol } => state.sessions.unsubscribe_symbol(session_id, &symbol),
        ClientMessage::RequestPrices { symbols } => {
            for symbol in symbols {
                state.sessions.subscribe_symbol(session_id, &symbol);
            }
        }
    }
}

fn price_event(tick: &PriceTick) -> ServerEvent<'_> {
    ServerEvent::PriceUpdate {
        symbol: &tick.symbol,
        price: tick.price,
        event_time_ms: tick.event_time_ms,
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent<'_>) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).expect("server events always serialize");
    socket.send(Message::Text(payload.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BasePriceSource, GateResults};

    #[test]
    fn connection_success_serializes_with_tag() {
        let id = Uuid::nil();
        let json = serde_json::to_string(&ServerEvent::ConnectionSuccess { client_id: id }).unwrap();
        assert!(json.contains("\"type\":\"connection-success\""));
        assert!(json.contains(&id.to_string()));
    }

    #[test]
    fn price_update_serializes_expected_fields() {
        let tick = PriceTick {
            symbol: "BTCUSDT".into(),
            price: 105.5,
            event_time_ms: 42,
            volume_24h: None,
            price_change_pct_24h: None,
        };
        let json = serde_json::to_string(&price_event(&tick)).unwrap();
        assert!(json.contains("\"type\":\"price-update\""));
        assert!(json.contains("\"symbol\":\"BTCUSDT\""));
        assert!(json.contains("\"price\":105.5"));
    }

    #[test]
    fn triggered_alert_event_serializes_inner_payload() {
        let triggered = TriggeredAlert {
            trigger_id: Uuid::nil(),
            alert_id: Uuid::nil(),
            symbol: "ETHUSDT".into(),
            triggered_at_ms: 1,
            price: 10.0,
            base_price_used: 9.0,
            base_price_source: BasePriceSource::CandleOpen,
            pct_change: 11.1,
            volume_24h: None,
            conditions: GateResults {
                min_volume: true,
                change_pct: true,
                count: true,
            },
            notifications_attempted: vec![],
        };
        let json = serde_json::to_string(&ServerEvent::TriggeredAlert(&triggered)).unwrap();
        assert!(json.contains("\"type\":\"triggered-alert\""));
        assert!(json.contains("\"symbol\":\"ETHUSDT\""));
    }

    #[test]
    fn client_message_parses_subscribe_symbol() {
        let message: ClientMessage = serde_json::from_str(r#"{"type":"subscribe-symbol","symbol":"BTCUSDT"}"#).unwrap();
        assert!(matches!(message, ClientMessage::SubscribeSymbol { symbol } if symbol == "BTCUSDT"));
    }

    #[test]
    fn client_message_parses_request_prices() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"request-prices","symbols":["BTCUSDT","ETHUSDT"]}"#).unwrap();
        match message {
            ClientMessage::RequestPrices { symbols } => assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]),
            _ => panic!("expected RequestPrices"),
        }
    }

    #[test]
    fn session_subscription_drives_delivery_filter() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, None);
        registry.subscribe_symbol(id, "BTCUSDT");
        assert!(registry.should_deliver(id, "BTCUSDT"));
        assert!(!registry.should_deliver(id, "ETHUSDT"));
    }
}
