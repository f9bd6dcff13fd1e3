//! Opaque-handle facade over blocking TCP drives.
//!
//! Mirrors the C surface emulator ports bind against: integer handles, zero
//! meaning failure, numeric statuses. Handles index a process-wide registry
//! behind a mutex; they are never pointers in disguise.

use crate::drive::{Drive, DriveConfig, DRIVE_GEOMETRY};
use crate::error::DriveError;
use crate::transport::TcpTransport;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

pub type Handle = u64;

/// The failure handle returned by [`open`].
pub const NO_HANDLE: Handle = 0;

struct Registry {
    next: Handle,
    drives: HashMap<Handle, Drive<TcpTransport>>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let registry = REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            next: 1,
            drives: HashMap::new(),
        })
    });
    let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Open a drive at `url` (`tcp://host[:port]`, `host[:port]` or a bare
/// hostname). Returns [`NO_HANDLE`] on failure.
///
/// The TCP service has no authentication exchange; the credentials are
/// accepted for API parity with the WebSocket service and ignored here.
pub fn open(url: &str, owner: &str, name: &str, token: &str) -> Handle {
    let _ = (owner, name, token);
    match Drive::connect(url, DriveConfig::default()) {
        Ok(drive) => with_registry(|registry| {
            let handle = registry.next;
            registry.next += 1;
            registry.drives.insert(handle, drive);
            handle
        }),
        Err(err) => {
            tracing::warn!(url, %err, "drive open failed");
            NO_HANDLE
        }
    }
}

/// Read one sector. `out` must be exactly one sector long.
pub fn read(handle: Handle, sector: u32, out: &mut [u8]) -> i32 {
    with_registry(|registry| match registry.drives.get_mut(&handle) {
        Some(drive) => match drive.read(sector, out) {
            Ok(()) => 0,
            Err(err) => err.status(),
        },
        None => DriveError::InvalidHandle.status(),
    })
}

/// Write one sector. `src` must be exactly one sector long.
pub fn write(handle: Handle, sector: u32, src: &[u8]) -> i32 {
    with_registry(|registry| match registry.drives.get_mut(&handle) {
        Some(drive) => match drive.write(sector, src) {
            Ok(()) => 0,
            Err(err) => err.status(),
        },
        None => DriveError::InvalidHandle.status(),
    })
}

/// Close a drive and drop its connection. Unknown handles are ignored.
pub fn close(handle: Handle) {
    with_registry(|registry| {
        registry.drives.remove(&handle);
    });
}

// Geometry trivia. The service advertises the same fixed geometry for every
// volume, and the original ABI ignores the handle; so do we.

pub fn size(_handle: Handle) -> u32 {
    DRIVE_GEOMETRY.size
}

pub fn heads(_handle: Handle) -> u32 {
    DRIVE_GEOMETRY.heads
}

pub fn sectors(_handle: Handle) -> u32 {
    DRIVE_GEOMETRY.sectors
}

pub fn cylinders(_handle: Handle) -> u32 {
    DRIVE_GEOMETRY.cylinders
}

pub fn sector_size(_handle: Handle) -> u32 {
    DRIVE_GEOMETRY.sector_size
}
