use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

static RT: OnceCell<Runtime> = OnceCell::new();

fn runtime() -> &'static Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("build gate runtime")
    })
}

/// Bounds concurrent compiler invocations.
///
/// Waiters are admitted strictly in arrival order, and a permit is returned
/// exactly once: it rides on [`AdmissionPermit`]'s drop, so early returns and
/// panics on the holding thread still release the slot.
pub struct AdmissionGate {
    sem: Arc<Semaphore>,
    max: usize,
}

impl AdmissionGate {
    pub fn new(max: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max.max(1))),
            max: max.max(1),
        }
    }

    /// Blocks the calling thread until a slot is free.
    pub fn acquire(&self) -> AdmissionPermit {
        let sem = Arc::clone(&self.sem);
        let permit = runtime()
            .block_on(sem.acquire_owned())
            .expect("gate semaphore never closed");
        AdmissionPermit { _permit: permit }
    }

    /// Slots not currently held. Diagnostic only; the value is stale the
    /// moment it is read.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One unit of concurrency capacity; dropping it frees the slot.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Best-effort free-space probe of the filesystem holding `path`.
///
/// Returns `false` only when the probe succeeds and reports less free space
/// than `floor_bytes`. Probe failures admit: this is a coarse backpressure
/// signal and a TOCTOU race against the actual writes is accepted.
pub fn check_capacity(path: &Path, floor_bytes: u64) -> bool {
    match free_disk_bytes(path) {
        Some(free) => free >= floor_bytes,
        None => true,
    }
}

#[cfg(unix)]
pub fn free_disk_bytes(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt as _;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn free_disk_bytes(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn gate_bounds_in_flight_holders() {
        let gate = Arc::new(AdmissionGate::new(3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(std::thread::spawn(move || {
                let _permit = gate.acquire();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }

    #[test]
    fn waiters_are_admitted_in_arrival_order() {
        let gate = Arc::new(AdmissionGate::new(1));
        let admitted = Arc::new(std::sync::Mutex::new(Vec::new()));

        // Hold the only slot while the waiters queue up.
        let blocker = gate.acquire();

        let mut handles = Vec::new();
        for i in 0..5usize {
            let gate = Arc::clone(&gate);
            let admitted = Arc::clone(&admitted);
            handles.push(std::thread::spawn(move || {
                let _permit = gate.acquire();
                admitted.lock().unwrap().push(i);
            }));
            // Stagger spawns so each waiter enqueues before the next arrives.
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(blocker);
        for h in handles {
            h.join().unwrap();
        }

        let order = admitted.lock().unwrap().clone();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn permit_released_on_early_drop() {
        let gate = AdmissionGate::new(1);
        {
            let _permit = gate.acquire();
            assert_eq!(gate.available(), 0);
        }
        assert_eq!(gate.available(), 1);
        // Must not block now that the permit is back.
        let _again = gate.acquire();
    }

    #[test]
    fn capacity_probe_admits_with_zero_floor() {
        assert!(check_capacity(&std::env::temp_dir(), 0));
    }

    #[test]
    fn capacity_probe_denies_with_absurd_floor() {
        if free_disk_bytes(&std::env::temp_dir()).is_some() {
            assert!(!check_capacity(&std::env::temp_dir(), u64::MAX));
        }
    }
}
