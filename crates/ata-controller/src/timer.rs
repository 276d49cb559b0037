/// Single deadline for the command in flight.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutTimer {
    deadline_ns: Option<u64>,
}

impl TimeoutTimer {
    pub fn arm(&mut self, now_ns: u64, timeout_ms: u64) {
        self.deadline_ns = Some(now_ns.saturating_add(timeout_ms.saturating_mul(1_000_000)));
    }

    pub fn disarm(&mut self) {
        self.deadline_ns = None;
    }

    pub fn deadline_ns(&self) -> Option<u64> {
        self.deadline_ns
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_ns.is_some()
    }

    pub fn expired(&self, now_ns: u64) -> bool {
        self.deadline_ns.is_some_and(|deadline| now_ns >= deadline)
    }
}
