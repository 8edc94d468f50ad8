use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use carbook::directory::InMemoryDirectory;
use carbook::engine::{Engine, EngineError};
use carbook::model::{BookingStatus, Vehicle};

const VEHICLES: usize = 20;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn day(offset: u64) -> NaiveDate {
    today().checked_add_days(Days::new(offset)).unwrap()
}

fn vehicle_id(i: usize) -> String {
    format!("car-{i:03}")
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

fn setup() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("carbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let directory = Arc::new(InMemoryDirectory::with_vehicles((0..VEHICLES).map(|i| Vehicle {
        id: vehicle_id(i),
        owner_id: format!("owner-{}", i % 4),
        daily_rate: 50 + i as u64,
        listed: true,
        name: None,
        location: None,
    })));
    let engine = Engine::new(dir.join("bookings.wal"), directory)
        .unwrap()
        .with_clock(Arc::new(today));
    println!("  {VEHICLES} vehicles, wal at {}", dir.display());
    Arc::new(engine)
}

/// Back-to-back one-day bookings on one vehicle, one at a time.
async fn phase1_sequential(engine: &Engine) {
    let n = 300;
    let vid = vehicle_id(0);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine
            .create_booking(&vid, "renter-seq", day(i), day(i + 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// One task per vehicle, no contention: group commit should batch fsyncs.
async fn phase2_parallel_vehicles(engine: &Arc<Engine>) {
    let n_per_task = 100u64;
    let start = Instant::now();
    let mut handles = Vec::new();

    for v in 1..VEHICLES {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let vid = vehicle_id(v);
            for j in 0..n_per_task {
                let from = j * 2;
                engine
                    .create_booking(&vid, &format!("renter-{v}"), day(from), day(from + 2))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = (VEHICLES - 1) as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        VEHICLES - 1,
        elapsed.as_secs_f64()
    );
}

/// Many renters race for the same week on the same vehicles.
async fn phase3_contended(engine: &Arc<Engine>) {
    let racers = 50;
    let slots = 10u64;
    let mut handles = Vec::new();
    let start = Instant::now();

    for r in 0..racers {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut won = 0u32;
            let mut latencies = Vec::new();
            for slot in 0..slots {
                // Each slot is a week starting well past earlier phases.
                let from = 400 + slot * 7 + (r as u64 % 3);
                let vid = vehicle_id((slot as usize) % VEHICLES);
                let t = Instant::now();
                match engine
                    .create_booking(&vid, &format!("racer-{r}"), day(from), day(from + 5))
                    .await
                {
                    Ok(_) => won += 1,
                    Err(EngineError::SlotUnavailable(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut wins = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (won, l) = h.await.unwrap();
        wins += won;
        latencies.extend(l);
    }
    println!(
        "  {racers} racers x {slots} slots: {wins} accepted in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    print_latency("contended create", &mut latencies);
}

/// Availability reads while owners confirm and cancel.
async fn phase4_reads_under_transitions(engine: &Arc<Engine>) {
    let mut writer_handles = Vec::new();
    for owner in 0..4 {
        let engine = engine.clone();
        writer_handles.push(tokio::spawn(async move {
            let owner_id = format!("owner-{owner}");
            let bookings = engine.list_bookings_for_owner(&owner_id).await.unwrap();
            for (i, b) in bookings.iter().filter(|b| b.status == BookingStatus::Pending).enumerate() {
                let to = if i % 3 == 0 {
                    BookingStatus::Cancelled
                } else {
                    BookingStatus::Confirmed
                };
                engine.change_status(b.id, &owner_id, to).await.unwrap();
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500u64;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader as usize);
            for i in 0..reads_per_reader {
                let vid = vehicle_id((r + i as usize) % VEHICLES);
                let from = i % 300;
                let t = Instant::now();
                engine.is_available(&vid, day(from), day(from + 3)).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    for h in writer_handles {
        h.await.unwrap();
    }
    print_latency("availability query", &mut all_latencies);
}

async fn verify_no_double_booking(engine: &Engine) {
    let mut checked = 0;
    for owner in 0..4 {
        let bookings = engine.list_bookings_for_owner(&format!("owner-{owner}")).await.unwrap();
        let mut held: Vec<_> = bookings.iter().filter(|b| b.status.holds_dates()).collect();
        held.sort_by(|a, b| (&a.vehicle_id, a.pickup_date).cmp(&(&b.vehicle_id, b.pickup_date)));
        for pair in held.windows(2) {
            if pair[0].vehicle_id == pair[1].vehicle_id {
                assert!(
                    pair[0].return_date <= pair[1].pickup_date,
                    "double booking: {} and {}",
                    pair[0].id,
                    pair[1].id
                );
            }
        }
        checked += bookings.len();
    }
    println!("  {checked} bookings checked, no overlaps");
}

#[tokio::main]
async fn main() {
    println!("=== carbook stress benchmark ===\n");

    println!("[setup]");
    let engine = setup();

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] parallel writes across vehicles");
    phase2_parallel_vehicles(&engine).await;

    println!("\n[phase 3] contended writes on shared slots");
    phase3_contended(&engine).await;

    println!("\n[phase 4] read latency under status changes");
    phase4_reads_under_transitions(&engine).await;

    println!("\n[verify]");
    verify_no_double_booking(&engine).await;

    println!("\n[compaction]");
    let t = Instant::now();
    let n = engine.compact_wal().await.unwrap();
    println!("  compacted {n} bookings in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
}
