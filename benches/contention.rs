use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use slotbook::calendar::{CalendarPolicy, HolidayCalendar, days_between};
use slotbook::directory::LocalDirectory;
use slotbook::engine::{BookingEngine, BookingError, ConfirmedAs, Outcome, PromptKind};
use slotbook::model::{POSITIONS, Principal, SlotLabel};
use slotbook::store::{SlotStore, WalSlotStore};

type Engine = BookingEngine<WalSlotStore, LocalDirectory>;

const CLAIM: ConfirmedAs = ConfirmedAs::new(PromptKind::Claim);
const RELEASE: ConfirmedAs = ConfirmedAs::new(PromptKind::Release);

fn engine() -> Engine {
    let dir = std::env::temp_dir().join(format!("slotbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = WalSlotStore::open(dir.join("slots.wal")).expect("open store");
    BookingEngine::new(
        Arc::new(store),
        Arc::new(LocalDirectory::new()),
        Arc::new(CalendarPolicy::new(HolidayCalendar::builtin())),
    )
}

/// Bookable dates from 2024-01-01 onward.
fn bookable_days(engine: &Engine, n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = start.checked_add_days(Days::new(4 * n as u64 + 60)).unwrap();
    days_between(start, end)
        .filter(|d| engine.policy().is_bookable(*d))
        .take(n)
        .collect()
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let engine = engine();
    let days = bookable_days(&engine, 250);
    let user = Principal::new("seq", false);

    let mut latencies = Vec::new();
    let start = Instant::now();
    for date in &days {
        for label in SlotLabel::ALL {
            for pos in 0..POSITIONS {
                let t = Instant::now();
                engine
                    .claim_or_release(*date, label, pos, &user, &CLAIM)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {} claims in {:.2}s ({:.0} ops/s)",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("claim", &mut latencies);
}

/// Many volunteers race for the same few positions; each position must end
/// up with exactly one winner.
async fn phase2_contended() {
    let engine = engine();
    let days = bookable_days(&engine, 20);
    let n_users = 32;

    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for u in 0..n_users {
        let engine = engine.clone();
        let days = days.clone();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let user = Principal::new(format!("u{u}"), false);
            let mut latencies = Vec::new();
            for date in days {
                for pos in 0..POSITIONS {
                    let t = Instant::now();
                    match engine
                        .claim_or_release(date, SlotLabel::Am, pos, &user, &CLAIM)
                        .await
                    {
                        Ok(Outcome::Claimed) => {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(BookingError::Conflict) => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                        // Lost the race before confirming.
                        Ok(Outcome::Declined) | Err(BookingError::SlotTaken { .. }) => {}
                        other => panic!("unexpected {other:?}"),
                    }
                    latencies.push(t.elapsed());
                }
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    println!(
        "  {n_users} users x {} positions in {:.2}s: {wins} wins, {} conflicts",
        days.len() * POSITIONS,
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    assert_eq!(wins, days.len() * POSITIONS, "every position has one winner");
    print_latency("contended claim", &mut all);
}

/// Month feeds keep up while writers churn.
async fn phase3_feed_under_load() {
    let engine = engine();
    let days: Vec<NaiveDate> = bookable_days(&engine, 60)
        .into_iter()
        .filter(|d| d.format("%Y-%m").to_string() == "2024-02")
        .collect();
    let stop = Arc::new(AtomicBool::new(false));

    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let days = days.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let user = Principal::new(format!("w{w}"), false);
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let date = days[i % days.len()];
                let _ = engine.claim_or_release(date, SlotLabel::Pm, w, &user, &CLAIM).await;
                let _ = engine.claim_or_release(date, SlotLabel::Pm, w, &user, &RELEASE).await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut feed = engine.subscribe_month(2024, 2).await.unwrap();
            let mut gaps = Vec::new();
            let mut last_revision = 0;
            let mut t = Instant::now();
            for _ in 0..200 {
                let Some(snapshot) = feed.next().await else { break };
                assert!(snapshot.revision >= last_revision);
                last_revision = snapshot.revision;
                gaps.push(t.elapsed());
                t = Instant::now();
            }
            gaps
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("snapshot interval", &mut all);

    let t = Instant::now();
    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let entries = engine.store().query_range(start, end).await.unwrap();
    println!(
        "  final range read: {} entries in {:.2}ms",
        entries.len(),
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== slotbook contention benchmark ===\n");

    println!("[phase 1] sequential claims");
    phase1_sequential().await;

    println!("\n[phase 2] contended claims");
    phase2_contended().await;

    println!("\n[phase 3] month feed under write load");
    phase3_feed_under_load().await;

    println!("\n=== benchmark complete ===");
}
