//! CPU affinity for lane threads.
//!
//! Pinning is advisory: failures come back as
//! [`ThreadError::AffinityUnsupported`] and the lane keeps running unpinned.

use crate::error::{ThreadError, ThreadResult};
use core_affinity::{CoreId, get_core_ids, set_for_current};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Set of cores a lane may run on, one bit per core index (0..64).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreMask(u64);

impl CoreMask {
    pub const MAX_CORES: usize = 64;

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Mask with a single core. Indices past [`Self::MAX_CORES`] give an empty mask.
    #[inline]
    pub fn single(core: usize) -> Self {
        Self::from_cores([core])
    }

    pub fn from_cores(cores: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = 0u64;
        for core in cores {
            if core < Self::MAX_CORES {
                bits |= 1 << core;
            }
        }
        Self(bits)
    }

    #[inline]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn contains(&self, core: usize) -> bool {
        core < Self::MAX_CORES && self.0 & (1 << core) != 0
    }

    pub fn cores(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::MAX_CORES).filter(move |c| self.contains(*c))
    }
}

impl fmt::Display for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Parses either a hex bit mask (`0x3`) or a comma separated core list (`0,1`).
impl FromStr for CoreMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map(CoreMask)
                .map_err(|e| format!("invalid core mask <{s}>: {e}"));
        }
        let mut bits = 0u64;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let core: usize = part
                .parse()
                .map_err(|e| format!("invalid core index <{part}>: {e}"))?;
            if core >= Self::MAX_CORES {
                return Err(format!("core index {core} out of range"));
            }
            bits |= 1 << core;
        }
        Ok(CoreMask(bits))
    }
}

/// Pins the calling thread to the cores in `mask` that the OS reports as available.
///
/// Returns the cores actually used. An empty mask is a no-op.
pub fn pin_current(mask: CoreMask) -> ThreadResult<Vec<usize>> {
    if mask.is_empty() {
        return Ok(Vec::new());
    }

    let available = get_core_ids().ok_or_else(|| {
        ThreadError::AffinityUnsupported("core list is not available on this platform".into())
    })?;

    let cores: Vec<usize> = available
        .iter()
        .map(|c| c.id)
        .filter(|id| mask.contains(*id))
        .collect();

    match cores.as_slice() {
        [] => Err(ThreadError::AffinityUnsupported(format!(
            "no core of mask {} is available (available: {:?})",
            mask,
            available.iter().map(|c| c.id).collect::<Vec<_>>()
        ))),
        [single] => {
            if set_for_current(CoreId { id: *single }) {
                Ok(cores)
            } else {
                Err(ThreadError::AffinityUnsupported(format!(
                    "os rejected pinning to core {single}"
                )))
            }
        }
        _ => pin_many(cores),
    }
}

#[cfg(target_os = "linux")]
fn pin_many(cores: Vec<usize>) -> ThreadResult<Vec<usize>> {
    // SAFETY: cpu_set_t is plain data; zeroed is its empty state and the
    // pointer handed to sched_setaffinity outlives the call.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for core in &cores {
            libc::CPU_SET(*core, &mut set);
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc == 0 {
        Ok(cores)
    } else {
        Err(ThreadError::AffinityUnsupported(format!(
            "sched_setaffinity failed: {}",
            std::io::Error::last_os_error()
        )))
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_many(cores: Vec<usize>) -> ThreadResult<Vec<usize>> {
    // Multi-core sets need a platform call core_affinity does not expose;
    // narrow to the lowest core of the mask.
    let first = cores[0];
    tracing::debug!(
        "multi-core affinity unavailable, pinning to core {} of {:?}",
        first,
        cores
    );
    if set_for_current(CoreId { id: first }) {
        Ok(vec![first])
    } else {
        Err(ThreadError::AffinityUnsupported(format!(
            "os rejected pinning to core {first}"
        )))
    }
}
