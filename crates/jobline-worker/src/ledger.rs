use jobline_core::JobId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Remembers the job ids accepted during a session so that a re-delivered
/// request is never executed or answered a second time.
///
/// Bounded: once `capacity` ids are held, the oldest one is forgotten, so
/// duplicates are only detected among the most recent `capacity` jobs. A
/// request repeating an older id is executed and answered again.
pub struct JobLedger {
    inner: Mutex<LedgerInner>,
    capacity: usize,
}

struct LedgerInner {
    seen: HashSet<JobId>,
    order: VecDeque<JobId>,
}

impl JobLedger {
    pub const DEFAULT_CAPACITY: usize = 65_536;

    pub fn new(capacity: usize) -> Self {
        JobLedger {
            inner: Mutex::new(LedgerInner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record `job_id`. Returns `false` if it was already accepted.
    pub fn admit(&self, job_id: JobId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(job_id) {
            return false;
        }

        inner.order.push_back(job_id);
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.inner.lock().seen.contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
