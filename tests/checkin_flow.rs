//! End-to-end exercises of the line protocol against a real listener.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use ulid::Ulid;

use innkeep::hotel::HotelManager;
use innkeep::wire;

const TOKEN: &str = "sesame";

async fn start_server() -> SocketAddr {
    let dir = std::env::temp_dir()
        .join("innkeep_test_wire")
        .join(Ulid::new().to_string());
    std::fs::create_dir_all(&dir).unwrap();

    let hotels = Arc::new(HotelManager::new(dir, 1000));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let hm = hotels.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, hm, TOKEN.into()).await;
            });
        }
    });
    addr
}

fn date(days: i64) -> String {
    let d: NaiveDate = chrono::Utc::now().date_naive() + chrono::Duration::days(days);
    d.to_string()
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self { reader: BufReader::new(read), writer }
    }

    /// Connect and complete the hello handshake.
    async fn open(addr: SocketAddr, hotel: &str) -> Self {
        let mut c = Self::connect(addr).await;
        let hello = c
            .send(json!({ "op": "hello", "hotel": hotel, "token": TOKEN }))
            .await;
        assert_eq!(hello["ok"], true, "handshake failed: {hello}");
        c
    }

    async fn send(&mut self, req: Value) -> Value {
        let mut line = req.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.recv().await
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Register a room and return its id.
    async fn room(&mut self, capacity: u32) -> String {
        let resp = self
            .send(json!({ "op": "register_room", "room_id": null, "capacity": capacity }))
            .await;
        assert_eq!(resp["ok"], true, "{resp}");
        resp["room_id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn bad_token_is_rejected_before_anything_else() {
    let addr = start_server().await;
    let mut c = Client::connect(addr).await;
    let resp = c
        .send(json!({ "op": "hello", "hotel": "grand", "token": "wrong" }))
        .await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"], "unauthorized");

    // The connection is closed afterwards.
    let mut line = String::new();
    assert_eq!(c.reader.read_line(&mut line).await.unwrap(), 0);
}

#[tokio::test]
async fn first_line_must_be_hello() {
    let addr = start_server().await;
    let mut c = Client::connect(addr).await;
    let resp = c
        .send(json!({ "op": "verify", "booking_id": Ulid::new(), "passcode": "ABC123" }))
        .await;
    assert_eq!(resp["error"], "bad_request");
}

#[tokio::test]
async fn full_checkin_flow() {
    let addr = start_server().await;
    let mut c = Client::open(addr, "grand").await;
    let room = c.room(2).await;
    let guest = Ulid::new();

    let booked = c
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": guest,
            "check_in": date(10), "check_out": date(15), "guests": 2,
        }))
        .await;
    assert_eq!(booked["ok"], true, "{booked}");
    let booking_id = booked["booking_id"].as_str().unwrap().to_string();
    let passcode = booked["passcode"].as_str().unwrap().to_string();
    assert_eq!(passcode.len(), 6);

    // Wrong code, then the real one.
    let resp = c
        .send(json!({ "op": "verify", "booking_id": booking_id, "passcode": "XXXXXX" }))
        .await;
    assert_eq!(resp["matched"], false);
    let resp = c
        .send(json!({ "op": "verify", "booking_id": booking_id, "passcode": passcode }))
        .await;
    assert_eq!(resp["matched"], true);

    let listed = c
        .send(json!({ "op": "list_active", "room_id": room, "from": date(1), "to": date(30) }))
        .await;
    assert_eq!(listed["bookings"].as_array().unwrap().len(), 1);

    let resp = c
        .send(json!({ "op": "cancel", "booking_id": booking_id, "requester_id": guest }))
        .await;
    assert_eq!(resp["ok"], true);

    // Dead passcode, empty calendar.
    let resp = c
        .send(json!({ "op": "verify", "booking_id": booking_id, "passcode": passcode }))
        .await;
    assert_eq!(resp["matched"], false);
    let listed = c
        .send(json!({ "op": "list_active", "room_id": room, "from": date(1), "to": date(30) }))
        .await;
    assert!(listed["bookings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn conflicting_and_adjacent_reserves_over_the_wire() {
    let addr = start_server().await;
    let mut c = Client::open(addr, "grand").await;
    let room = c.room(4).await;

    let first = c
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": Ulid::new(),
            "check_in": date(10), "check_out": date(15), "guests": 1,
        }))
        .await;
    assert_eq!(first["ok"], true);

    let clash = c
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": Ulid::new(),
            "check_in": date(12), "check_out": date(17), "guests": 1,
        }))
        .await;
    assert_eq!(clash["ok"], false);
    assert_eq!(clash["error"], "date_conflict");
    assert_eq!(clash["retryable"], false);

    let turnover = c
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": Ulid::new(),
            "check_in": date(15), "check_out": date(20), "guests": 1,
        }))
        .await;
    assert_eq!(turnover["ok"], true, "{turnover}");
}

#[tokio::test]
async fn hotels_do_not_share_rooms() {
    let addr = start_server().await;
    let mut alpha = Client::open(addr, "alpha").await;
    let mut beta = Client::open(addr, "beta").await;

    let room = alpha.room(2).await;

    // Beta has never heard of alpha's room.
    let resp = beta
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": Ulid::new(),
            "check_in": date(10), "check_out": date(15), "guests": 1,
        }))
        .await;
    assert_eq!(resp["error"], "room_not_found");
}

#[tokio::test]
async fn subscription_pushes_changes_without_passcodes() {
    let addr = start_server().await;
    let mut watcher = Client::open(addr, "grand").await;
    let mut booker = Client::open(addr, "grand").await;

    let room = watcher.room(2).await;
    let resp = watcher.send(json!({ "op": "subscribe", "room_id": room })).await;
    assert_eq!(resp["ok"], true);

    let booked = booker
        .send(json!({
            "op": "reserve", "room_id": room, "user_id": Ulid::new(),
            "check_in": date(10), "check_out": date(15), "guests": 2,
        }))
        .await;
    assert_eq!(booked["ok"], true);

    let notice = watcher.recv().await;
    assert_eq!(notice["event"], "booking_created");
    assert_eq!(notice["room_id"].as_str().unwrap(), room);
    assert!(notice.get("passcode").is_none());
}

#[tokio::test]
async fn subscribe_requires_a_registered_room() {
    let addr = start_server().await;
    let mut c = Client::open(addr, "grand").await;

    let resp = c
        .send(json!({ "op": "subscribe", "room_id": Ulid::new() }))
        .await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"], "room_not_found");

    // A registered room subscribes fine on the same connection.
    let room = c.room(2).await;
    let resp = c.send(json!({ "op": "subscribe", "room_id": room })).await;
    assert_eq!(resp["ok"], true);
}

#[tokio::test]
async fn malformed_lines_get_bad_request() {
    let addr = start_server().await;
    let mut c = Client::open(addr, "grand").await;
    let resp = c.send(json!({ "op": "levitate" })).await;
    assert_eq!(resp["error"], "bad_request");

    // The connection survives a bad line.
    let room = c.room(1).await;
    assert_eq!(room.len(), 26);
}
