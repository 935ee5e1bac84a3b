// src/api/handlers/ws.rs
use actix::{Actor, StreamHandler, Handler, Message, Addr, AsyncContext};
use actix_web::{web, HttpRequest, HttpResponse, Error};
use actix_web_actors::ws;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::events::RunEvent;

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct RunUpdate(pub RunEvent);

/// Fans run events out to every connected dashboard.
#[derive(Clone, Default)]
pub struct WsBroker {
    clients: Arc<RwLock<Vec<Addr<WsConnection>>>>,
}

impl WsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, addr: Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.push(addr);
    }

    pub async fn unregister(&self, addr: &Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.retain(|c| c != addr);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn broadcast(&self, event: RunEvent) {
        let clients = self.clients.read().await;
        let update = RunUpdate(event);
        for client in clients.iter() {
            client.do_send(update.clone());
        }
    }
}

/// Pumps runner events into the broker until the runner goes away.
pub async fn forward_events(broker: WsBroker, mut events: broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => broker.broadcast(event).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("WebSocket feed lagged, {} event(s) dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub struct WsConnection {
    broker: WsBroker,
}

impl WsConnection {
    pub fn new(broker: WsBroker) -> Self {
        Self { broker }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.register(addr).await;
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.unregister(&addr).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => ctx.close(reason),
            // the feed is one-way
            _ => (),
        }
    }
}

impl Handler<RunUpdate> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: RunUpdate, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg.0) {
            Ok(json) => ctx.text(json),
            Err(e) => log::error!("Failed to serialize run event: {}", e),
        }
    }
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    broker: web::Data<WsBroker>,
) -> Result<HttpResponse, Error> {
    let conn = WsConnection::new(broker.get_ref().clone());
    ws::start(conn, &req, stream)
}
