//! Per-host concurrency gates.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, PoisonError};
use tracing::trace;

/// Counting gate keyed by host. At most `capacity` permits are outstanding
/// for any one host; hosts never wait on each other.
#[derive(Debug)]
pub struct HostGate {
    capacity: usize,
    in_flight: Mutex<HashMap<String, usize>>,
    released: Condvar,
}

impl Default for HostGate {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HostGate {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a permit for `host` is available.
    ///
    /// The permit is returned when the guard drops, including during a panic
    /// unwind.
    pub fn acquire(&self, host: &str) -> HostPermit<'_> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while map.get(host).copied().unwrap_or(0) >= self.capacity {
            trace!("waiting for connection slot on {host}");
            map = self
                .released
                .wait(map)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *map.entry(host.to_owned()).or_insert(0) += 1;
        HostPermit {
            gate: self,
            host: host.to_owned(),
        }
    }

    /// Permits currently held for `host`.
    pub fn in_flight(&self, host: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    fn release(&self, host: &str) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = map.get_mut(host) {
            *n -= 1;
            if *n == 0 {
                map.remove(host);
            }
        }
        drop(map);
        self.released.notify_all();
    }
}

/// RAII permit for one host slot.
#[derive(Debug)]
pub struct HostPermit<'a> {
    gate: &'a HostGate,
    host: String,
}

impl HostPermit<'_> {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for HostPermit<'_> {
    fn drop(&mut self) {
        self.gate.release(&self.host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    fn hammer(gate: &Arc<HostGate>, host: &'static str, workers: usize) -> usize {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let gate = Arc::clone(gate);
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let _permit = gate.acquire(host);
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[test]
    fn capacity_bounds_concurrency_per_host() {
        let gate = Arc::new(HostGate::new(2));
        let peak = hammer(&gate, "node-a", 8);
        assert!(peak <= 2, "peak {peak} exceeded capacity");
        assert!(peak >= 1);
        assert_eq!(gate.in_flight("node-a"), 0);
    }

    #[test]
    fn single_slot_serializes() {
        let gate = Arc::new(HostGate::default());
        assert_eq!(hammer(&gate, "node-a", 5), 1);
    }

    #[test]
    fn other_hosts_are_not_blocked() {
        let gate = Arc::new(HostGate::new(1));
        let _held = gate.acquire("busy");

        let g = Arc::clone(&gate);
        let start = Instant::now();
        thread::spawn(move || {
            let _p = g.acquire("idle");
        })
        .join()
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(gate.in_flight("busy"), 1);
    }

    #[test]
    fn permit_released_on_panic() {
        let gate = Arc::new(HostGate::new(1));
        let g = Arc::clone(&gate);
        let result = thread::spawn(move || {
            let _p = g.acquire("h");
            panic!("remote call blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(gate.in_flight("h"), 0);
        let _again = gate.acquire("h");
    }

    #[test]
    fn zero_capacity_is_one() {
        assert_eq!(HostGate::new(0).capacity(), 1);
    }
}
