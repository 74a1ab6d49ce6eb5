//! Rolling latency sample.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamped observations within a trailing window, with a cached p90.
///
/// Workers call [`track`](Self::track); the scheduler calls
/// [`recompute`](Self::recompute) before reading [`p90`](Self::p90).
pub struct RollingSample {
    window: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    samples: VecDeque<(Instant, f64)>,
    p90: f64,
}

impl RollingSample {
    /// Create an empty sample keeping observations for `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                p90: 0.0,
            }),
        }
    }

    /// Record an observation taken now.
    pub fn track(&self, value: f64) {
        self.inner
            .lock()
            .expect("lock poisoned")
            .samples
            .push_back((Instant::now(), value));
    }

    /// Drop observations older than the window and refresh the cached p90.
    pub fn recompute(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let now = Instant::now();
        while let Some(&(at, _)) = inner.samples.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            inner.samples.pop_front();
        }

        let mut values: Vec<f64> = inner.samples.iter().map(|&(_, v)| v).collect();
        inner.p90 = percentile(&mut values, 90.0);
    }

    /// The p90 as of the last [`recompute`](Self::recompute). 0 when no
    /// observation was retained.
    pub fn p90(&self) -> f64 {
        self.inner.lock().expect("lock poisoned").p90
    }

    /// Number of observations currently held, including expired ones not
    /// yet dropped by a recompute.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").samples.len()
    }

    /// Whether no observation is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Nearest-rank percentile. 0 for an empty set.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = ((p / 100.0) * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}
