use futures::{SinkExt, StreamExt};
use lobby_runtime::{GameModule, GameRegistry, LobbyApi, LobbyServer, LobbyView, Origin, ServerConfig};
use lobby_types::{GameDescriptor, ModuleError, PlayerRecord};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Echo;

impl GameModule for Echo {
    fn on_player_join(&mut self, _: &LobbyView<'_>, _: &mut LobbyApi<'_>, _: &PlayerRecord) -> Result<(), ModuleError> {
        Ok(())
    }

    fn on_action(&mut self, _: &LobbyView<'_>, api: &mut LobbyApi<'_>, from: Origin<'_>, payload: &Value) -> Result<(), ModuleError> {
        api.send_to_host("relay", json!({ "from": from.id(), "data": payload }));
        Ok(())
    }
}

async fn start_server() -> (Arc<LobbyServer>, String) {
    let mut games = GameRegistry::new();
    games.register_fn(GameDescriptor::new("echo", "Echo"), || Box::new(Echo)).unwrap();
    let server = Arc::new(LobbyServer::new(ServerConfig::default(), games));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (server, url)
}

async fn send(client: &mut Client, event: &str, payload: Value) {
    let frame = json!({ "event": event, "payload": payload }).to_string();
    client.send(Message::text(frame)).await.unwrap();
}

async fn next_event(client: &mut Client, name: &str) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            let message: Value = serde_json::from_str(text.as_str()).unwrap();
            if message["eventName"] == name {
                return message["payload"].clone();
            }
        }
    }
}

#[tokio::test]
async fn test_lobby_over_websocket() {
    let (server, url) = start_server().await;

    let (mut host, _) = connect_async(url.as_str()).await.unwrap();
    let (mut player, _) = connect_async(url.as_str()).await.unwrap();
    assert!(next_event(&mut host, "connected").await["id"].is_string());
    let player_id = next_event(&mut player, "connected").await["id"].clone();

    send(&mut host, "createLobby", json!({ "gameId": "echo" })).await;
    let code = next_event(&mut host, "lobbyCreated").await["code"].as_str().unwrap().to_string();

    send(&mut player, "joinLobby", json!({ "code": code.to_lowercase(), "name": "Ana" })).await;
    next_event(&mut player, "lobbyJoined").await;
    assert_eq!(next_event(&mut host, "playerJoined").await["name"], json!("Ana"));

    send(&mut player, "action", json!({ "code": code, "data": { "move": 4 } })).await;
    let relay = next_event(&mut host, "relay").await;
    assert_eq!(relay["from"], player_id);
    assert_eq!(relay["data"], json!({ "move": 4 }));

    send(&mut player, "action", json!({ "code": "QQQQ", "data": {} })).await;
    assert_eq!(next_event(&mut player, "error").await["kind"], json!("lobbyNotFound"));

    // Closing the host socket ends the lobby for everyone in it.
    host.close(None).await.unwrap();
    assert_eq!(next_event(&mut player, "gameEnded").await["reason"], json!("host left"));

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_notifies_lobbies() {
    let (server, url) = start_server().await;
    let (mut host, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut host, "createLobby", json!({ "gameId": "echo" })).await;
    next_event(&mut host, "lobbyCreated").await;

    server.shutdown();
    assert_eq!(next_event(&mut host, "gameEnded").await["reason"], json!("server shutdown"));
}
