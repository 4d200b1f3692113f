use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotbook::calendar::{CalendarPolicy, HolidayCalendar};
use slotbook::directory::LocalDirectory;
use slotbook::engine::BookingEngine;
use slotbook::identity::AdminAllowList;
use slotbook::store::WalSlotStore;
use slotbook::wire::{self, ServerContext};

// ── Test infrastructure ──────────────────────────────────────

const PASSWORD: &str = "slotbook";

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalSlotStore::open(dir.join("slots.wal")).unwrap());
    let ctx = Arc::new(ServerContext {
        engine: BookingEngine::new(
            store,
            Arc::new(LocalDirectory::new()),
            Arc::new(CalendarPolicy::new(HolidayCalendar::builtin())),
        ),
        admins: AdminAllowList::parse("boss@example.org"),
        password: PASSWORD.to_string(),
    });

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, ctx).await;
            });
        }
    });

    addr
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    pushes: VecDeque<Value>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            pushes: VecDeque::new(),
        }
    }

    /// Connect and sign in as `id`.
    async fn login(addr: SocketAddr, id: &str, email: &str) -> Self {
        let mut client = Self::connect(addr).await;
        let resp = client
            .request(json!({
                "op": "hello",
                "password": PASSWORD,
                "user": {"id": id, "display_name": id.to_uppercase(), "email": email},
            }))
            .await;
        assert_eq!(resp["status"], "ok", "{resp}");
        client
    }

    async fn read_line(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for server")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Send one request and return its response, buffering any pushes
    /// that arrive in between.
    async fn request(&mut self, req: Value) -> Value {
        self.framed.send(req.to_string()).await.unwrap();
        loop {
            let msg = self.read_line().await;
            if msg.get("event").is_some() {
                self.pushes.push_back(msg);
            } else {
                return msg;
            }
        }
    }

    async fn next_push(&mut self) -> Value {
        if let Some(push) = self.pushes.pop_front() {
            return push;
        }
        let msg = self.read_line().await;
        assert_eq!(msg["event"], "snapshot", "expected a push, got {msg}");
        msg
    }

    async fn claim(&mut self, date: &str, label: &str, position: usize) -> Value {
        let resp = self
            .request(json!({"op": "claim", "date": date, "label": label, "position": position}))
            .await;
        if resp["status"] != "confirm_required" {
            return resp;
        }
        self.request(json!({
            "op": "claim", "date": date, "label": label, "position": position,
            "confirmed": true, "kind": resp["kind"], "holder_id": resp["holder_id"],
        }))
        .await
    }
}

fn day<'a>(days: &'a Value, date: &str) -> &'a Value {
    days.as_array()
        .unwrap()
        .iter()
        .find(|d| d["date"] == date)
        .unwrap_or_else(|| panic!("{date} not in view"))
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn hello_is_required_and_checked() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.request(json!({"op": "month", "year": 2024, "month": 7})).await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["code"], "unauthenticated");

    let resp = client
        .request(json!({"op": "hello", "password": "nope", "user": {"id": "u1"}}))
        .await;
    assert_eq!(resp["code"], "unauthenticated");

    let resp = client
        .request(json!({"op": "hello", "password": PASSWORD, "user": {"id": "u1"}}))
        .await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["result"]["id"], "u1");
    assert_eq!(resp["result"]["is_privileged"], false);
    assert_eq!(resp["result"]["registered"], true);
}

#[tokio::test]
async fn malformed_lines_keep_connection_open() {
    let addr = start_test_server().await;
    let mut client = Client::login(addr, "u1", "u1@example.org").await;

    client.framed.send("not json".to_string()).await.unwrap();
    let resp = client.read_line().await;
    assert_eq!(resp["code"], "bad_request");

    let resp = client.request(json!({"op": "month", "year": 2024, "month": 13})).await;
    assert_eq!(resp["code"], "bad_request");

    let resp = client.request(json!({"op": "month", "year": 2024, "month": 7})).await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn claim_asks_before_writing() {
    let addr = start_test_server().await;
    let mut client = Client::login(addr, "u1", "u1@example.org").await;

    let resp = client
        .request(json!({"op": "claim", "date": "2024-07-05", "label": "AM", "position": 0}))
        .await;
    assert_eq!(resp["status"], "confirm_required");
    assert_eq!(resp["kind"], "claim");
    assert_eq!(
        resp["prompt"],
        "Are you sure you want to sign up for 2024-07-05 AM (8:00 AM - 9:00 AM)?"
    );

    let view = client.request(json!({"op": "month", "year": 2024, "month": 7})).await;
    assert_eq!(day(&view["result"], "2024-07-05")["slots"][0]["positions"][0], "available");

    let resp = client
        .request(json!({
            "op": "claim", "date": "2024-07-05", "label": "AM", "position": 0,
            "confirmed": true, "kind": "claim",
        }))
        .await;
    assert_eq!(resp["status"], "ok", "{resp}");
    assert_eq!(resp["result"]["outcome"], "claimed");

    let view = client.request(json!({"op": "month", "year": 2024, "month": 7})).await;
    assert_eq!(day(&view["result"], "2024-07-05")["slots"][0]["positions"][0], "held_by_me");

    let resp = client
        .request(json!({
            "op": "claim", "date": "2024-07-05", "label": "AM", "position": 0,
            "confirmed": true,
        }))
        .await;
    assert_eq!(resp["code"], "bad_request");
}

#[tokio::test]
async fn stale_confirmation_is_conflict() {
    let addr = start_test_server().await;
    let mut u1 = Client::login(addr, "u1", "u1@example.org").await;
    let mut u2 = Client::login(addr, "u2", "u2@example.org").await;

    let resp = u1
        .request(json!({"op": "claim", "date": "2024-07-08", "label": "PM", "position": 2}))
        .await;
    assert_eq!(resp["kind"], "claim");

    assert_eq!(u2.claim("2024-07-08", "PM", 2).await["result"]["outcome"], "claimed");

    let resp = u1
        .request(json!({
            "op": "claim", "date": "2024-07-08", "label": "PM", "position": 2,
            "confirmed": true, "kind": "claim",
        }))
        .await;
    assert_eq!(resp["code"], "conflict");
}

#[tokio::test]
async fn policy_and_permission_errors() {
    let addr = start_test_server().await;
    let mut u1 = Client::login(addr, "u1", "u1@example.org").await;
    let mut u2 = Client::login(addr, "u2", "u2@example.org").await;

    let resp = u1.claim("2024-07-04", "AM", 0).await;
    assert_eq!(resp["code"], "policy_violation");
    let resp = u1.claim("2024-07-06", "PM", 0).await;
    assert_eq!(resp["code"], "policy_violation");
    let resp = u1.claim("2024-07-05", "AM", 4).await;
    assert_eq!(resp["code"], "invalid_position");

    u1.claim("2024-07-05", "AM", 1).await;
    let resp = u2.claim("2024-07-05", "AM", 1).await;
    assert_eq!(resp["code"], "slot_taken");

    let resp = u2
        .request(json!({"op": "roster", "start": "2024-07-01", "end": "2024-07-31"}))
        .await;
    assert_eq!(resp["code"], "forbidden");
}

#[tokio::test]
async fn subscriber_sees_other_sessions_claims() {
    let addr = start_test_server().await;
    let mut watcher = Client::login(addr, "u1", "u1@example.org").await;
    let mut actor = Client::login(addr, "u2", "u2@example.org").await;

    let resp = watcher
        .request(json!({"op": "subscribe", "year": 2024, "month": 7}))
        .await;
    assert_eq!(resp["status"], "ok");
    let initial = watcher.next_push().await;
    assert_eq!(initial["year"], 2024);
    assert_eq!(initial["month"], 7);
    let first_revision = initial["revision"].as_u64().unwrap();

    assert_eq!(actor.claim("2024-07-05", "PM", 3).await["result"]["outcome"], "claimed");

    let push = watcher.next_push().await;
    assert!(push["revision"].as_u64().unwrap() > first_revision);
    let friday = day(&push["days"], "2024-07-05");
    assert_eq!(friday["slots"][1]["positions"][3], "held_by_other");
    assert_eq!(friday["slots"][1]["positions"][0], "available");

    // Claims outside the subscribed month are not pushed.
    actor.claim("2024-08-01", "AM", 0).await;
    let resp = watcher
        .request(json!({"op": "unsubscribe", "year": 2024, "month": 7}))
        .await;
    assert_eq!(resp["result"]["removed"], true);
    assert!(watcher.pushes.is_empty(), "unexpected push: {:?}", watcher.pushes);
}

#[tokio::test]
async fn admin_override_and_roster() {
    let addr = start_test_server().await;
    let mut u1 = Client::login(addr, "u1", "u1@example.org").await;
    let mut boss = Client::login(addr, "boss", "Boss@Example.org").await;

    let resp = u1
        .request(json!({"op": "profile", "name": "Ada Lovelace", "phone_number": "555-0100"}))
        .await;
    assert_eq!(resp["result"]["name"], "Ada Lovelace");

    u1.claim("2024-07-05", "AM", 0).await;
    u1.claim("2024-07-05", "AM", 1).await;

    let resp = boss
        .request(json!({"op": "claim", "date": "2024-07-05", "label": "AM", "position": 0}))
        .await;
    assert_eq!(resp["kind"], "override");
    assert_eq!(
        resp["prompt"],
        "This slot is already taken by Ada Lovelace. Do you want to remove it?"
    );
    let resp = boss.claim("2024-07-05", "AM", 0).await;
    assert_eq!(resp["result"]["outcome"], "overridden");
    assert_eq!(resp["result"]["previous"], "u1");

    let resp = boss
        .request(json!({"op": "roster", "start": "2024-07-01", "end": "2024-07-31"}))
        .await;
    assert_eq!(resp["status"], "ok", "{resp}");
    let rows = resp["result"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["position"], 1);
    assert_eq!(rows[0]["name"], "Ada Lovelace");
    assert_eq!(rows[0]["email"], "u1@example.org");
    assert_eq!(rows[0]["time_range"], "8:00 AM - 9:00 AM");
}

#[tokio::test]
async fn override_confirmation_is_bound_to_the_holder_shown() {
    let addr = start_test_server().await;
    let mut u1 = Client::login(addr, "u1", "u1@example.org").await;
    let mut u3 = Client::login(addr, "u3", "u3@example.org").await;
    let mut boss = Client::login(addr, "boss", "boss@example.org").await;

    u1.claim("2024-07-17", "AM", 2).await;
    let shown = boss
        .request(json!({"op": "claim", "date": "2024-07-17", "label": "AM", "position": 2}))
        .await;
    assert_eq!(shown["kind"], "override");
    assert_eq!(shown["holder_id"], "u1");

    // u1 gives the position up and u3 takes it before the admin answers.
    assert_eq!(u1.claim("2024-07-17", "AM", 2).await["result"]["outcome"], "released");
    assert_eq!(u3.claim("2024-07-17", "AM", 2).await["result"]["outcome"], "claimed");

    let resp = boss
        .request(json!({
            "op": "claim", "date": "2024-07-17", "label": "AM", "position": 2,
            "confirmed": true, "kind": "override", "holder_id": shown["holder_id"],
        }))
        .await;
    assert_eq!(resp["code"], "conflict", "{resp}");

    let view = u3.request(json!({"op": "month", "year": 2024, "month": 7})).await;
    assert_eq!(day(&view["result"], "2024-07-17")["slots"][0]["positions"][2], "held_by_me");
}

#[tokio::test]
async fn admin_rights_follow_the_identity_presented_at_hello() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    // Privilege comes from the allow-listed email the client presents,
    // once the shared password checks out.
    let resp = client
        .request(json!({
            "op": "hello", "password": PASSWORD,
            "user": {"id": "someone", "email": "BOSS@example.org"},
        }))
        .await;
    assert_eq!(resp["result"]["is_privileged"], true, "{resp}");

    let mut other = Client::connect(addr).await;
    let resp = other
        .request(json!({
            "op": "hello", "password": "guess",
            "user": {"id": "someone", "email": "boss@example.org"},
        }))
        .await;
    assert_eq!(resp["code"], "unauthenticated");
    let resp = other
        .request(json!({"op": "roster", "start": "2024-07-01", "end": "2024-07-31"}))
        .await;
    assert_eq!(resp["code"], "unauthenticated");
}
