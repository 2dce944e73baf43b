// tests/scheduler_single_flight.rs
//
// Randomized overlapping dispatch: ticks, manual crawls and toggles fired from
// several tasks at once must never run two scans of the same source together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use newsflow::registry::SourceUpdate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SOURCES: usize = 4;
const WORKERS: u64 = 6;
const STEPS: usize = 60;

fn url(i: usize) -> String {
    format!("https://site{i}.test/")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_triggers_never_overlap_a_source() {
    let h = Arc::new(common::harness());
    h.fetcher.set_scan_delay(Duration::from_millis(15));
    let ids: Vec<_> = (0..SOURCES)
        .map(|i| {
            let u = url(i);
            h.fetcher.set_listing(&u, &[&format!("{u}news/{i}")]);
            h.add_source(&u)
        })
        .collect();

    let mut tasks = Vec::new();
    for w in 0..WORKERS {
        let h = Arc::clone(&h);
        let ids = ids.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(0x5eed + w);
            for _ in 0..STEPS {
                let id = ids[rng.random_range(0..ids.len())];
                match rng.random_range(0..4) {
                    0 => {
                        // pretend the clock jumped past every interval
                        let ahead = ChronoDuration::minutes(rng.random_range(0..30));
                        h.app.scheduler.dispatch_due(Utc::now() + ahead);
                    }
                    1 | 2 => {
                        let _ = h.app.scheduler.crawl_now(id);
                    }
                    _ => {
                        let _ = h.app.scheduler.update(
                            id,
                            SourceUpdate {
                                interval_minutes: Some(rng.random_range(5..60)),
                                ..SourceUpdate::default()
                            },
                        );
                    }
                }
                let pause = rng.random_range(0..4);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }));
    }
    for t in tasks {
        t.await.expect("worker panicked");
    }
    h.settle().await;

    for i in 0..SOURCES {
        let u = url(i);
        assert!(h.fetcher.scan_calls(&u) >= 1, "source {i} never crawled");
        assert_eq!(
            h.fetcher.peak_concurrent_scans(&u),
            1,
            "source {i} had overlapping scans"
        );
    }
    assert_eq!(h.app.registry.in_flight(), 0);
    // every source ingested its single item exactly once
    assert_eq!(h.app.store.len(), SOURCES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_during_storm_leaves_nothing_running() {
    let h = Arc::new(common::harness());
    h.fetcher.set_scan_delay(Duration::from_millis(40));
    let ids: Vec<_> = (0..SOURCES)
        .map(|i| {
            let u = url(i);
            h.fetcher.set_listing(&u, &[]);
            h.add_source(&u)
        })
        .collect();
    assert!(h.app.scheduler.start());

    let storm = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(7);
            for _ in 0..20 {
                let id = ids[rng.random_range(0..ids.len())];
                let _ = h.app.scheduler.crawl_now(id);
                tokio::time::sleep(Duration::from_millis(rng.random_range(0..5))).await;
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.app.scheduler.stop().await);
    storm.await.expect("storm panicked");
    h.settle().await;

    let status = h.app.scheduler.status();
    assert!(!status.running);
    assert_eq!(status.in_flight, 0);
    for i in 0..SOURCES {
        assert!(h.fetcher.peak_concurrent_scans(&url(i)) <= 1);
    }
}
