// Two nodes sharing one SQLite file: the lease guarantees the scheduler
// depends on.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use lockstep_core::{Clock, ManualClock, NodeId, SystemClock};
use lockstep_lock::{LockManager, ReleaseOutcome, SqliteLockStore};

struct Cluster {
    _dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    a: LockManager,
    b: LockManager,
}

fn node(path: &std::path::Path, clock: Arc<dyn Clock>, id: &str) -> LockManager {
    let store = SqliteLockStore::open(path, std::time::Duration::from_secs(5), clock).unwrap();
    LockManager::new(Arc::new(store), NodeId::from(id))
}

fn cluster() -> Cluster {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locks.db");
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap(),
    ));
    Cluster {
        a: node(&path, clock.clone(), "node-a"),
        b: node(&path, clock.clone(), "node-b"),
        clock,
        _dir: dir,
    }
}

#[test]
fn crashed_holder_is_taken_over_after_at_most_for() {
    let c = cluster();

    let lease = c
        .a
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap();
    assert!(lease.is_some());

    c.clock.advance(Duration::seconds(1));
    assert!(c
        .b
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .is_none());

    // node A "crashes": its handle is dropped without release
    drop(lease);

    c.clock.advance(Duration::seconds(60));
    let taken = c
        .b
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .expect("expired lease must be taken over");
    assert_eq!(taken.owner().as_str(), "node-b");

    let row = c.b.records().unwrap().pop().unwrap();
    assert_eq!(row.name, "Job1");
    assert_eq!(row.locked_by, "node-b");
}

#[test]
fn early_release_holds_lock_until_at_least_for() {
    let c = cluster();
    let t0 = c.clock.now();

    let lease = c
        .a
        .acquire("Job1", Duration::seconds(30), Duration::seconds(60))
        .unwrap()
        .unwrap();

    // the job finishes after 2s
    c.clock.advance(Duration::seconds(2));
    assert_eq!(
        c.a.release(&lease).unwrap(),
        ReleaseOutcome::Released {
            lock_until: t0 + Duration::seconds(30)
        }
    );

    c.clock.set(t0 + Duration::milliseconds(29_999));
    assert!(c
        .b
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .is_none());

    c.clock.set(t0 + Duration::seconds(30));
    assert!(c
        .b
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .is_some());
}

#[test]
fn double_release_is_a_no_op() {
    let c = cluster();
    let lease = c
        .a
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .unwrap();
    c.clock.advance(Duration::seconds(1));

    assert!(matches!(
        c.a.release(&lease).unwrap(),
        ReleaseOutcome::Released { .. }
    ));
    let after_first = c.a.records().unwrap();

    assert_eq!(c.a.release(&lease).unwrap(), ReleaseOutcome::LeaseLost);
    assert_eq!(c.a.records().unwrap(), after_first);
}

#[test]
fn double_release_inside_floor_keeps_floor() {
    let c = cluster();
    let t0 = c.clock.now();
    let lease = c
        .a
        .acquire("Job1", Duration::seconds(30), Duration::seconds(60))
        .unwrap()
        .unwrap();

    c.a.release(&lease).unwrap();
    c.a.release(&lease).unwrap();

    let row = c.a.records().unwrap().pop().unwrap();
    assert_eq!(row.lock_until, t0 + Duration::seconds(30));
}

#[test]
fn distinct_names_do_not_contend() {
    let c = cluster();
    assert!(c
        .a
        .acquire("Job1", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .is_some());
    assert!(c
        .b
        .acquire("Job2", Duration::zero(), Duration::seconds(60))
        .unwrap()
        .is_some());
    assert_eq!(c.a.records().unwrap().len(), 2);
}

#[test]
fn concurrent_acquirers_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locks.db");
    // create the schema before the race
    drop(node(&path, Arc::new(SystemClock), "setup"));

    const NODES: usize = 8;
    let barrier = Arc::new(Barrier::new(NODES));
    let handles: Vec<_> = (0..NODES)
        .map(|i| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let manager = node(&path, Arc::new(SystemClock), &format!("node-{i}"));
                barrier.wait();
                manager
                    .acquire("Job1", Duration::zero(), Duration::seconds(60))
                    .unwrap()
                    .is_some()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}
