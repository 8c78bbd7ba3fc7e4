use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidpilot::{AutomationError, WorkerPool};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn never_exceeds_the_worker_limit() {
    let pool = WorkerPool::new(2, Duration::from_secs(1));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let results = pool
        .run_all((0..6).collect(), |id| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<u32, AutomationError>(id * 10)
            }
        })
        .await;

    assert_eq!(results.len(), 6);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let mut values: Vec<u32> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
    values.sort();
    assert_eq!(values, vec![0, 10, 20, 30, 40, 50]);
}

#[tokio::test(start_paused = true)]
async fn admissions_are_staggered() {
    let pool = WorkerPool::new(4, Duration::from_secs(15));
    let started = Instant::now();
    let admitted = Arc::new(Mutex::new(Vec::new()));

    pool.run_all(vec![1, 2, 3], |id| {
        let admitted = admitted.clone();
        async move {
            admitted.lock().unwrap().push((id, started.elapsed()));
            Ok::<(), AutomationError>(())
        }
    })
    .await;

    let admitted = admitted.lock().unwrap().clone();
    assert_eq!(admitted.len(), 3);
    let mut times: Vec<Duration> = admitted.iter().map(|(_, t)| *t).collect();
    times.sort();
    assert!(times[1] - times[0] >= Duration::from_secs(15));
    assert!(times[2] - times[1] >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn failures_are_reported_per_instance() {
    let pool = WorkerPool::new(2, Duration::ZERO);

    let results = pool
        .run_all(vec![1, 2], |id| async move {
            if id == 2 {
                Err(AutomationError::TransportFailure("offline".to_string()))
            } else {
                Ok(id)
            }
        })
        .await;

    assert_eq!(results.len(), 2);
    for (id, result) in results {
        assert_eq!(result.is_ok(), id == 1);
    }
}
