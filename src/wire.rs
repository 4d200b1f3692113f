//! Newline-delimited JSON protocol over TCP.
//!
//! Each request line is one object tagged by `op`; each gets exactly one
//! response line tagged by `status`. Subscribed months are pushed as
//! `{"event":"snapshot",...}` lines interleaved with responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::directory::{LocalDirectory, ProfileError};
use crate::engine::{AskFirst, BookingEngine, BookingError, ConfirmedAs, DayView, Outcome, PromptKind};
use crate::identity::{AdminAllowList, AuthenticatedUser};
use crate::limits::{MAX_LINE_LEN, MAX_OCCUPANT_ID_LEN, MAX_SUBSCRIPTIONS_PER_CONNECTION};
use crate::model::*;
use crate::observability;
use crate::store::{Subscription, WalSlotStore};

pub type Engine = BookingEngine<WalSlotStore, LocalDirectory>;

/// Shared by every connection.
///
/// Trust boundary: `hello` checks only the shared `password`. The `user`
/// fields that follow it (id, email) are taken as given, so any client that
/// knows the password can sign in as any id, and as an admin by naming an
/// allow-listed email. Deploy behind a gateway that authenticates users and
/// fills in `user` itself; never expose the port to untrusted clients.
pub struct ServerContext {
    pub engine: Engine,
    /// Emails or ids granted admin; matched against the self-reported
    /// identity in `hello`.
    pub admins: AdminAllowList,
    /// Shared secret every client presents in `hello`.
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        password: String,
        user: AuthenticatedUser,
    },
    Month {
        year: i32,
        month: u32,
        /// Overrides the server's local date for `is_today`.
        #[serde(default)]
        today: Option<NaiveDate>,
    },
    Claim {
        date: NaiveDate,
        label: SlotLabel,
        position: usize,
        #[serde(default)]
        confirmed: bool,
        /// The prompt kind the user agreed to; required when `confirmed`.
        #[serde(default)]
        kind: Option<PromptKind>,
        /// For an override, the `holder_id` from the prompt the user agreed to.
        #[serde(default)]
        holder_id: Option<String>,
    },
    Roster {
        start: NaiveDate,
        end: NaiveDate,
    },
    Subscribe {
        year: i32,
        month: u32,
    },
    Unsubscribe {
        year: i32,
        month: u32,
    },
    Profile {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        phone_number: Option<String>,
    },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Month { .. } => "month",
            Request::Claim { .. } => "claim",
            Request::Roster { .. } => "roster",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::Profile { .. } => "profile",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        op: &'static str,
        result: serde_json::Value,
    },
    ConfirmRequired {
        kind: PromptKind,
        prompt: String,
        date: NaiveDate,
        label: SlotLabel,
        position: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        holder_id: Option<String>,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl Response {
    fn ok<T: Serialize>(op: &'static str, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => Response::Ok { op, result },
            Err(e) => Response::error("internal", e),
        }
    }

    fn error(code: &'static str, message: impl ToString) -> Self {
        Response::Error {
            code,
            message: message.to_string(),
        }
    }

    fn status(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "ok",
            Response::ConfirmRequired { .. } => "confirm_required",
            Response::Error { .. } => "error",
        }
    }
}

impl From<BookingError> for Response {
    fn from(e: BookingError) -> Self {
        Response::error(e.code(), e)
    }
}

#[derive(Debug, Serialize)]
struct SnapshotPush<'a> {
    event: &'static str,
    year: i32,
    month: u32,
    revision: u64,
    days: &'a [DayView],
}

#[derive(Debug, Serialize)]
struct Welcome<'a> {
    id: &'a str,
    is_privileged: bool,
    registered: bool,
}

#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    LineTooLong,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "io error: {e}"),
            ConnectionError::LineTooLong => {
                write!(f, "request line longer than {MAX_LINE_LEN} bytes")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<LinesCodecError> for ConnectionError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ConnectionError::LineTooLong,
            LinesCodecError::Io(e) => ConnectionError::Io(e),
        }
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Per-connection state.
struct Session {
    principal: Option<Principal>,
    feeds: HashMap<(i32, u32), JoinHandle<()>>,
    push_tx: mpsc::Sender<String>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, feed) in self.feeds.drain() {
            feed.abort();
        }
    }
}

pub async fn process_connection(
    socket: TcpStream,
    ctx: Arc<ServerContext>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (push_tx, mut push_rx) = mpsc::channel::<String>(16);
    let mut session = Session {
        principal: None,
        feeds: HashMap::new(),
        push_tx,
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let resp = Response::error("bad_request", ConnectionError::LineTooLong);
                        send(&mut framed, &resp).await?;
                        return Err(ConnectionError::LineTooLong);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let resp = match serde_json::from_str::<Request>(&line) {
                    Ok(req) => handle(&ctx, &mut session, req).await,
                    Err(e) => Response::error("bad_request", e),
                };
                send(&mut framed, &resp).await?;
            }
            Some(push) = push_rx.recv() => {
                framed.send(push).await?;
            }
        }
    }

    if let Some(p) = &session.principal {
        debug!("{} disconnected", p.id);
    }
    Ok(())
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    resp: &Response,
) -> Result<(), ConnectionError> {
    let line = serde_json::to_string(resp)
        .map_err(|e| ConnectionError::Io(std::io::Error::other(e)))?;
    framed.send(line).await?;
    Ok(())
}

async fn handle(ctx: &ServerContext, session: &mut Session, req: Request) -> Response {
    let op = req.op();
    let start = Instant::now();
    let resp = dispatch(ctx, session, req).await;
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => resp.status())
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    resp
}

async fn dispatch(ctx: &ServerContext, session: &mut Session, req: Request) -> Response {
    let op = req.op();
    if let Request::Hello { password, user } = req {
        return hello(ctx, session, password, user);
    }
    let Some(principal) = session.principal.clone() else {
        return Response::error("unauthenticated", "send hello first");
    };
    let engine = &ctx.engine;

    match req {
        Request::Hello { .. } => unreachable!("handled above"),
        Request::Month { year, month, today: at } => {
            match engine.month_view(year, month, at.unwrap_or_else(today), &principal).await {
                Ok(days) => Response::ok(op, &days),
                Err(e) => e.into(),
            }
        }
        Request::Claim {
            date,
            label,
            position,
            confirmed,
            kind,
            holder_id,
        } => {
            let reply = confirmed.then_some((kind, holder_id));
            claim(engine, &principal, date, label, position, reply).await
        }
        Request::Roster { start, end } => match engine.admin_roster(start, end, &principal).await {
            Ok(roster) => Response::ok(op, &roster),
            Err(e) => e.into(),
        },
        Request::Subscribe { year, month } => {
            subscribe(ctx, session, &principal, year, month).await
        }
        Request::Unsubscribe { year, month } => {
            let removed = match session.feeds.remove(&(year, month)) {
                Some(feed) => {
                    feed.abort();
                    true
                }
                None => false,
            };
            Response::ok(op, &serde_json::json!({ "removed": removed }))
        }
        Request::Profile { name, phone_number } => {
            match engine.directory().update_profile(&principal.id, name, phone_number) {
                Ok(info) => Response::ok(op, &info),
                Err(e @ ProfileError::NotRegistered(_)) => Response::error("not_found", e),
                Err(e @ ProfileError::NameTooLong) => Response::error("bad_request", e),
                Err(e @ ProfileError::Storage(_)) => Response::error("internal", e),
            }
        }
    }
}

fn hello(
    ctx: &ServerContext,
    session: &mut Session,
    password: String,
    user: AuthenticatedUser,
) -> Response {
    if password != ctx.password {
        warn!("hello rejected for {}: bad password", user.id);
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Response::error("unauthenticated", "invalid password");
    }
    if user.id.is_empty() || user.id.len() > MAX_OCCUPANT_ID_LEN {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Response::error("bad_request", "user id must be 1..=128 bytes");
    }

    let principal = ctx.admins.resolve(user);
    let registered = match ctx.engine.directory().register_if_absent(&principal) {
        Ok(created) => created,
        Err(e) => return Response::error("internal", e),
    };
    info!(
        "{} signed in{}",
        principal.id,
        if principal.is_privileged { " (admin)" } else { "" }
    );
    let resp = Response::ok(
        "hello",
        &Welcome {
            id: &principal.id,
            is_privileged: principal.is_privileged,
            registered,
        },
    );
    session.principal = Some(principal);
    resp
}

async fn claim(
    engine: &Engine,
    principal: &Principal,
    date: NaiveDate,
    label: SlotLabel,
    position: usize,
    reply: Option<(Option<PromptKind>, Option<String>)>,
) -> Response {
    let Some((kind, holder_id)) = reply else {
        let ask = AskFirst::new();
        return match engine.claim_or_release(date, label, position, principal, &ask).await {
            Ok(Outcome::Declined) => match ask.into_prompt() {
                Some(prompt) => Response::ConfirmRequired {
                    kind: prompt.kind,
                    prompt: prompt.to_string(),
                    date,
                    label,
                    position,
                    holder_id: prompt.holder_id,
                },
                None => Response::error("internal", "no prompt recorded"),
            },
            Ok(outcome) => Response::ok("claim", &outcome),
            Err(e) => e.into(),
        };
    };

    let Some(kind) = kind else {
        return Response::error("bad_request", "confirmed claim must carry the prompt kind");
    };
    let agreed = ConfirmedAs::from_reply(kind, holder_id);
    match engine
        .claim_or_release(date, label, position, principal, &agreed)
        .await
    {
        // The action the user agreed to no longer applies: the prompt no
        // longer matches, or someone else took the position meanwhile.
        Ok(Outcome::Declined) | Err(BookingError::SlotTaken { .. }) => {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            BookingError::Conflict.into()
        }
        Ok(outcome) => Response::ok("claim", &outcome),
        Err(e) => e.into(),
    }
}

async fn subscribe(
    ctx: &ServerContext,
    session: &mut Session,
    principal: &Principal,
    year: i32,
    month: u32,
) -> Response {
    session.feeds.retain(|_, feed| !feed.is_finished());
    if session.feeds.contains_key(&(year, month)) {
        return Response::ok("subscribe", &serde_json::json!({ "year": year, "month": month }));
    }
    if session.feeds.len() >= MAX_SUBSCRIPTIONS_PER_CONNECTION {
        return Response::error(
            "bad_request",
            format!("at most {MAX_SUBSCRIPTIONS_PER_CONNECTION} subscriptions per connection"),
        );
    }
    let feed = match ctx.engine.subscribe_month(year, month).await {
        Ok(feed) => feed,
        Err(e) => return e.into(),
    };
    let task = tokio::spawn(forward_snapshots(
        ctx.engine.clone(),
        feed,
        year,
        month,
        principal.clone(),
        session.push_tx.clone(),
    ));
    session.feeds.insert((year, month), task);
    Response::ok("subscribe", &serde_json::json!({ "year": year, "month": month }))
}

/// Projects each snapshot for `viewer` and queues it for the socket.
/// Ends when the connection goes away; aborting the task drops the feed.
async fn forward_snapshots(
    engine: Engine,
    mut feed: Subscription,
    year: i32,
    month: u32,
    viewer: Principal,
    tx: mpsc::Sender<String>,
) {
    while let Some(snapshot) = feed.next().await {
        let days = match engine.project_month(&snapshot.entries, year, month, today(), &viewer) {
            Ok(days) => days,
            Err(e) => {
                warn!("dropping feed {year}-{month:02} for {}: {e}", viewer.id);
                return;
            }
        };
        let push = SnapshotPush {
            event: "snapshot",
            year,
            month,
            revision: snapshot.revision,
            days: &days,
        };
        let line = match serde_json::to_string(&push) {
            Ok(line) => line,
            Err(e) => {
                warn!("snapshot encode failed: {e}");
                return;
            }
        };
        if tx.send(line).await.is_err() {
            return;
        }
    }
}
