//! WebSocket session for push-style flag consumption

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::services::FlagService;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundEvent};
use crate::websocket::{ConnectionRegistry, SubscriberId};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Text frame pushed to the client
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

/// Registry handle for a completed subscription
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Registered {
    flag_key: String,
    subscriber_id: SubscriberId,
}

/// One WebSocket connection and its per-flag subscriptions
pub struct WsSession {
    registry: ConnectionRegistry,
    flags: FlagService,
    subscriptions: HashMap<String, SubscriberId>,
    hb: Instant,
}

impl WsSession {
    fn new(registry: ConnectionRegistry, flags: FlagService) -> Self {
        Self {
            registry,
            flags,
            subscriptions: HashMap::new(),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!("WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_subscribe(&mut self, flag_key: String, ctx: &mut ws::WebsocketContext<Self>) {
        if self.subscriptions.contains_key(&flag_key) {
            send_event(ctx, &WsOutboundEvent::Subscribed { flag_key });
            return;
        }

        let registry = self.registry.clone();
        let flags = self.flags.clone();
        let addr = ctx.address();

        actix::spawn(async move {
            let (subscriber_id, mut rx) = registry.add_subscriber(&flag_key).await;
            addr.do_send(Registered {
                flag_key: flag_key.clone(),
                subscriber_id,
            });

            addr.do_send(text_event(&WsOutboundEvent::Subscribed {
                flag_key: flag_key.clone(),
            }));

            // Subscribing immediately yields current state.
            match flags.find_by_key(&flag_key).await {
                Ok(flag) => addr.do_send(text_event(&WsOutboundEvent::FlagState {
                    flag_key: flag_key.clone(),
                    flag,
                })),
                Err(e) => addr.do_send(text_event(&WsOutboundEvent::Error {
                    message: e.to_string(),
                })),
            }

            // Forward pushed updates until the registry entry is removed
            // (unsubscribe or disconnect), which drops the sender.
            while let Some(msg) = rx.recv().await {
                addr.do_send(TextMessage(msg));
            }
        });
    }

    fn handle_unsubscribe(&mut self, flag_key: String, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(subscriber_id) = self.subscriptions.remove(&flag_key) {
            let registry = self.registry.clone();
            let key = flag_key.clone();
            actix::spawn(async move {
                registry.remove_subscriber(&key, subscriber_id).await;
            });
        }
        send_event(ctx, &WsOutboundEvent::Unsubscribed { flag_key });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session started");
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(
            "WebSocket session stopped, cleaning up {} subscriptions",
            self.subscriptions.len()
        );

        let registry = self.registry.clone();
        let subscriptions: Vec<(String, SubscriberId)> = self.subscriptions.drain().collect();

        actix::spawn(async move {
            for (flag_key, subscriber_id) in subscriptions {
                registry.remove_subscriber(&flag_key, subscriber_id).await;
            }
        });
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<Registered> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Registered, _ctx: &mut Self::Context) {
        // A racing double-subscribe keeps the first registration.
        if self.subscriptions.contains_key(&msg.flag_key) {
            let registry = self.registry.clone();
            actix::spawn(async move {
                registry
                    .remove_subscriber(&msg.flag_key, msg.subscriber_id)
                    .await;
            });
            return;
        }
        self.subscriptions.insert(msg.flag_key, msg.subscriber_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsInboundEvent>(&text) {
                Ok(WsInboundEvent::Subscribe { flag_key }) => {
                    self.handle_subscribe(flag_key, ctx);
                }
                Ok(WsInboundEvent::Unsubscribe { flag_key }) => {
                    self.handle_unsubscribe(flag_key, ctx);
                }
                Ok(WsInboundEvent::Get { flag_key }) => {
                    let flags = self.flags.clone();
                    let addr = ctx.address();
                    actix::spawn(async move {
                        let event = match flags.find_by_key(&flag_key).await {
                            Ok(flag) => WsOutboundEvent::FlagState { flag_key, flag },
                            Err(e) => WsOutboundEvent::Error {
                                message: e.to_string(),
                            },
                        };
                        addr.do_send(text_event(&event));
                    });
                }
                Ok(WsInboundEvent::Evaluate { flag_key, context }) => {
                    let flags = self.flags.clone();
                    let addr = ctx.address();
                    actix::spawn(async move {
                        let event = match flags.evaluate(&flag_key, &context).await {
                            Ok(result) => WsOutboundEvent::Evaluation { flag_key, result },
                            Err(e) => WsOutboundEvent::Error {
                                message: e.to_string(),
                            },
                        };
                        addr.do_send(text_event(&event));
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to parse WS message: {:?}", e);
                    send_event(
                        ctx,
                        &WsOutboundEvent::Error {
                            message: format!("unrecognized message: {}", e),
                        },
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!("WebSocket close message received: {:?}", reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

fn text_event(event: &WsOutboundEvent) -> TextMessage {
    TextMessage(serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize outbound event: {}", e);
        r#"{"type":"error","message":"internal serialization error"}"#.to_string()
    }))
}

fn send_event(ctx: &mut ws::WebsocketContext<WsSession>, event: &WsOutboundEvent) {
    let TextMessage(payload) = text_event(event);
    ctx.text(payload);
}

/// HTTP handler upgrading to the flag subscription protocol
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(state.registry.clone(), state.flags.clone());
    ws::start(session, &req, stream)
}
