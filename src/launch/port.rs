//! Debug port allocation. Grounded on the Python original's
//! `BrowserOptionsBuilder._get_free_port`: bind a TCP socket to port 0 and
//! let the OS hand back an ephemeral port, biased toward a preferred range,
//! with a process-wide set tracking everything handed out so two concurrent
//! builds never race onto the same port even though the kernel alone would
//! not prevent that (a port released by a just-closed listener can be
//! re-bound by someone else before we get to it).

use crate::error::{FleetError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::TcpListener;

const MIN_DEBUG_PORT: u16 = 29000;
const MAX_DEBUG_PORT: u16 = 65000;
const MAX_ATTEMPTS: u32 = 100;

static USED_PORTS: Mutex<Option<HashSet<u16>>> = Mutex::new(None);

/// Process-wide mutex-guarded allocator for Chrome's `--remote-debugging-port`.
pub struct PortAllocator;

impl PortAllocator {
    /// Bind to an OS-assigned ephemeral port, retrying until one lands in
    /// the preferred range and is not already tracked as in-use, or fall
    /// back to whatever the OS gave us if the range is exhausted.
    pub fn allocate() -> Result<u16> {
        let mut guard = USED_PORTS.lock();
        let used = guard.get_or_insert_with(HashSet::new);

        let mut fallback: Option<u16> = None;
        for _ in 0..MAX_ATTEMPTS {
            let listener = TcpListener::bind(("127.0.0.1", 0))?;
            let port = listener.local_addr()?.port();
            drop(listener);

            if used.contains(&port) {
                continue;
            }
            if (MIN_DEBUG_PORT..=MAX_DEBUG_PORT).contains(&port) {
                used.insert(port);
                return Ok(port);
            }
            if fallback.is_none() {
                fallback = Some(port);
            }
        }

        match fallback {
            Some(port) => {
                used.insert(port);
                Ok(port)
            }
            None => Err(FleetError::LaunchFailed("failed to allocate a debug port after retries".into())),
        }
    }

    /// Release a previously-allocated port so it can be reused.
    pub fn release(port: u16) {
        if let Some(used) = USED_PORTS.lock().as_mut() {
            used.remove(&port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_returns_distinct_ports() {
        let a = PortAllocator::allocate().unwrap();
        let b = PortAllocator::allocate().unwrap();
        assert_ne!(a, b);
        PortAllocator::release(a);
        PortAllocator::release(b);
    }

    #[test]
    fn test_release_allows_reallocation_bookkeeping() {
        let a = PortAllocator::allocate().unwrap();
        PortAllocator::release(a);
        // After release the port is no longer tracked as in-use; re-binding
        // it is an OS-level concern, not something this allocator guarantees.
        let guard = USED_PORTS.lock();
        let used = guard.as_ref().unwrap();
        assert!(!used.contains(&a));
    }
}
