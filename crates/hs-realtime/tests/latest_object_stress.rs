//! Concurrent stress tests for the latest-object exchange.
//!
//! Verifies:
//! - Reads never go back to an older published version
//! - A reader always sees a fully constructed payload
//! - Every payload is dropped exactly once after both halves are gone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use hs_realtime::RealtimeLatestObject;

/// Payload that checks its own consistency and counts live instances
struct Versioned {
    version: u64,
    /// Every coefficient equals `version`
    coeffs: [u64; 64],
    live: Option<Arc<AtomicUsize>>,
}

impl Versioned {
    fn new(version: u64, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self {
            version,
            coeffs: [version; 64],
            live: Some(live.clone()),
        }
    }

    fn is_consistent(&self) -> bool {
        self.coeffs.iter().all(|&c| c == self.version)
    }
}

impl Default for Versioned {
    fn default() -> Self {
        Self {
            version: 0,
            coeffs: [0; 64],
            live: None,
        }
    }
}

impl Drop for Versioned {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[test]
fn test_versions_never_regress_under_contention() {
    const NUM_WRITES: u64 = 20_000;

    let live = Arc::new(AtomicUsize::new(0));
    let (mut writer, mut reader) = RealtimeLatestObject::new(Versioned::new(0, &live));

    let writer_done = Arc::new(AtomicBool::new(false));

    let audio_thread = {
        let writer_done = writer_done.clone();
        thread::spawn(move || {
            let mut last_version = 0;
            let mut reads = 0_u64;

            loop {
                let done = writer_done.load(Ordering::Acquire);

                let latest = reader.read();
                assert!(latest.is_consistent(), "torn payload observed");
                assert!(
                    latest.version >= last_version,
                    "version regressed: {} after {}",
                    latest.version,
                    last_version
                );
                last_version = latest.version;
                reads += 1;

                if done {
                    // One read after the writer finished must see the final value
                    assert_eq!(reader.read().version, NUM_WRITES);
                    break;
                }
            }

            (reader, reads)
        })
    };

    for version in 1..=NUM_WRITES {
        writer.write(Versioned::new(version, &live));
        if version % 1000 == 0 {
            thread::yield_now();
        }
    }
    writer_done.store(true, Ordering::Release);

    let (reader, reads) = audio_thread.join().unwrap();
    assert!(reads > 0);

    drop(reader);
    drop(writer);
    assert_eq!(live.load(Ordering::Relaxed), 0, "payloads leaked or double-dropped");
}

#[test]
fn test_timed_reader_and_writer() {
    let live = Arc::new(AtomicUsize::new(0));
    let (mut writer, mut reader) = RealtimeLatestObject::new(Versioned::new(1, &live));

    let audio_thread = thread::spawn(move || {
        let mut last_version = 0;
        for _ in 0..100 {
            let latest = reader.read();
            assert!(latest.is_consistent());
            assert!(latest.version >= last_version);
            last_version = latest.version;
            thread::sleep(Duration::from_millis(1));
        }
        reader
    });

    for version in 2..=11 {
        writer.write(Versioned::new(version, &live));
        thread::sleep(Duration::from_millis(10));
    }

    let mut reader = audio_thread.join().unwrap();
    assert_eq!(reader.read().version, 11);

    // Pool stays bounded: reader node, stub, nothing published
    writer.clear_zombie_list();
    assert_eq!(writer.live_nodes(), 2);

    drop(writer);
    drop(reader);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}
