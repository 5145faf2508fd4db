//! Process-wide identifiers: session id, object id, and per-session serial
//! allocation (spec §3, §4.4).

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Stable process-wide session identifier (spec §3: "a stable session id
/// (process-wide)").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Object id zero is the endpoint itself (the "primary", spec §3/§4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const PRIMARY: ObjectId = ObjectId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn is_primary(self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Monotonically increasing serial allocator, scoped to one session.
/// Wraparound is acceptable (spec §4.4): the pending-reply table is bounded
/// by in-flight requests, never by the full `i32` range.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    next: AtomicI32,
}

impl SerialAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    pub fn allocate(&self) -> i32 {
        let mut cur = self.next.load(Ordering::Relaxed);
        loop {
            let next = cur.wrapping_add(1).max(1);
            match self
                .next
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(sn) => return sn,
                Err(actual) => cur = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_are_unique_within_a_session() {
        let allocator = SerialAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(allocator.allocate()));
        }
    }

    #[test]
    fn session_ids_are_process_wide_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
    }

    proptest::proptest! {
        /// For any run length, every allocated serial is unique within the
        /// run and never zero (spec §8: "every assigned serial is unique
        /// within S").
        #[test]
        fn allocated_serials_are_always_unique_and_never_zero(count in 1usize..5_000) {
            let allocator = SerialAllocator::new();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..count {
                let sn = allocator.allocate();
                proptest::prop_assert_ne!(sn, 0);
                proptest::prop_assert!(seen.insert(sn));
            }
        }
    }
}
