//! Background collector for [`basedrop`]-backed shared state.
//!
//! Most of this crate's reference counting is immediate
//! ([`crate::refcount::URefCount`]) or pool-returning
//! ([`crate::buffer::PooledMem`]), both of which release synchronously
//! on whichever thread drops the last handle (spec.md invariant 2). The
//! exception is anything allocated through a `basedrop::Handle` — kept
//! available for pipes that need realtime-safe handoff of state to a
//! pump-manager thread without ever blocking on a free, the same need
//! the teacher crate's own collector thread exists to serve.
//!
//! Ported near-verbatim from the teacher's
//! `garbage_collector::run_garbage_collector_thread`.

use basedrop::Collector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a thread that calls `collector.collect()` at least once every
/// `interval`, until `run` is cleared.
pub fn run_collector_thread(mut collector: Collector, interval: Duration, run: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last_collect = Instant::now();

        while run.load(Ordering::Relaxed) {
            if last_collect.elapsed() >= interval {
                collector.collect();
                last_collect = Instant::now();
                log::trace!("basedrop collector ran");
            }

            std::thread::sleep(WAIT_INTERVAL);
        }

        // final sweep so nothing dropped just before shutdown leaks
        // until process exit.
        collector.collect();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn thread_stops_when_flag_cleared() {
        let collector = Collector::new();
        let run = Arc::new(AtomicBool::new(true));
        let handle = run_collector_thread(collector, StdDuration::from_millis(1), Arc::clone(&run));
        run.store(false, Ordering::Relaxed);
        handle.join().expect("collector thread panicked");
    }
}
