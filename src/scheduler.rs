//! Fixed-delay re-login timer.
//!
//! There is at most one pending timer per scheduler; starting a new one replaces the previous.
//! The monotonic clock stops while the host sleeps, so every armed timer also remembers its
//! wall-clock deadline and [`RepeatScheduler::on_wake`] re-arms from that.

/// Lower bound for a resumed or re-armed timer, to ride out wake-up jitter.
pub const MIN_RESUME_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub type Job = std::sync::Arc<
    dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static,
>;

struct Slot {
    period: std::time::Duration,
    job: Job,
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Set while waiting; `None` while the job runs or the slot is paused.
    deadline: Option<tokio::time::Instant>,
    wall_deadline: Option<chrono::DateTime<chrono::Utc>>,
    /// Remaining delay captured by `pause`.
    paused: Option<std::time::Duration>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    slot: Option<Slot>,
}

#[derive(Clone, Default)]
pub struct RepeatScheduler {
    inner: std::sync::Arc<parking_lot::Mutex<Inner>>,
}

impl std::fmt::Debug for RepeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatScheduler")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl RepeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` every `period`, measured from the end of the previous run. Replaces any
    /// previously started repeat.
    pub fn start(&self, period: std::time::Duration, job: Job) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.slot.take() {
            abort_waiting(&old);
        }
        inner.generation += 1;
        inner.slot = Some(Slot {
            period,
            job,
            handle: None,
            deadline: None,
            wall_deadline: None,
            paused: None,
        });
        self.arm(&mut inner, period);
        tracing::info!(period = ?period, "repeat started");
    }

    /// A job that is already running finishes; nothing runs afterwards.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.slot.take() {
            abort_waiting(&old);
            inner.generation += 1;
            tracing::info!("repeat cancelled");
        }
    }

    /// Stops the timer, keeping the remaining delay. Returns that delay.
    pub fn pause(&self) -> Option<std::time::Duration> {
        let mut inner = self.inner.lock();
        let slot = inner.slot.as_mut()?;
        if let Some(r) = slot.paused {
            return Some(r);
        }
        let remaining = match slot.deadline.take() {
            Some(deadline) => {
                if let Some(h) = slot.handle.take() {
                    h.abort();
                }
                deadline.saturating_duration_since(tokio::time::Instant::now())
            }
            // The job is running; the loop stops after it.
            None => slot.period,
        };
        slot.wall_deadline = None;
        slot.paused = Some(remaining);
        tracing::debug!(remaining = ?remaining, "repeat paused");
        Some(remaining)
    }

    /// Restarts a paused timer with its remaining delay, floored at [`MIN_RESUME_DELAY`].
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        let Some(remaining) = inner.slot.as_mut().and_then(|s| s.paused.take()) else {
            return;
        };
        inner.generation += 1;
        let delay = remaining.max(MIN_RESUME_DELAY);
        self.arm(&mut inner, delay);
        tracing::debug!(delay = ?delay, "repeat resumed");
    }

    /// Re-arms a waiting timer from its wall-clock deadline after the host woke up.
    pub fn on_wake(&self) {
        self.rearm_from_wall_clock(chrono::Utc::now());
    }

    fn rearm_from_wall_clock(&self, now: chrono::DateTime<chrono::Utc>) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slot.as_mut() else {
            return;
        };
        let Some(wall_deadline) = slot.wall_deadline else {
            return;
        };
        if slot.deadline.is_none() {
            return;
        }
        let delay = (wall_deadline - now)
            .to_std()
            .unwrap_or_default()
            .max(MIN_RESUME_DELAY);
        if let Some(h) = slot.handle.take() {
            h.abort();
        }
        inner.generation += 1;
        self.arm(&mut inner, delay);
        tracing::info!(delay = ?delay, "repeat re-armed after wake");
    }

    /// Time until the next run; `None` when nothing is scheduled or the job is running.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        let inner = self.inner.lock();
        let slot = inner.slot.as_ref()?;
        if let Some(r) = slot.paused {
            return Some(r);
        }
        slot.deadline
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().slot.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.inner
            .lock()
            .slot
            .as_ref()
            .is_some_and(|s| s.paused.is_some())
    }

    fn arm(&self, inner: &mut Inner, delay: std::time::Duration) {
        let generation = inner.generation;
        let Some(slot) = inner.slot.as_mut() else {
            return;
        };
        slot.deadline = Some(tokio::time::Instant::now() + delay);
        slot.wall_deadline = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| chrono::Utc::now() + d);
        let shared = self.inner.clone();
        slot.handle = Some(tokio::spawn(run_slot(shared, generation, delay)));
    }
}

fn abort_waiting(slot: &Slot) {
    if slot.deadline.is_some() {
        if let Some(h) = slot.handle.as_ref() {
            h.abort();
        }
    }
}

async fn run_slot(
    inner: std::sync::Arc<parking_lot::Mutex<Inner>>,
    generation: u64,
    first_delay: std::time::Duration,
) {
    let mut delay = first_delay;
    loop {
        let deadline = {
            let mut guard = inner.lock();
            if guard.generation != generation {
                return;
            }
            let Some(slot) = guard.slot.as_mut() else {
                return;
            };
            if slot.paused.is_some() {
                slot.handle = None;
                return;
            }
            let deadline = tokio::time::Instant::now() + delay;
            slot.deadline = Some(deadline);
            slot.wall_deadline = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| chrono::Utc::now() + d);
            deadline
        };
        tokio::time::sleep_until(deadline).await;

        let job = {
            let mut guard = inner.lock();
            if guard.generation != generation {
                return;
            }
            let Some(slot) = guard.slot.as_mut() else {
                return;
            };
            slot.deadline = None;
            slot.wall_deadline = None;
            delay = slot.period;
            slot.job.clone()
        };
        tracing::debug!("repeat firing");
        job().await;
    }
}

/// Notices host suspension by comparing how far the wall clock and the monotonic clock moved
/// between two ticks.
#[derive(Debug, Clone)]
pub struct WakeDetector {
    pub tick: std::time::Duration,
    pub tolerance: std::time::Duration,
}

impl Default for WakeDetector {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_secs(10),
            tolerance: std::time::Duration::from_secs(30),
        }
    }
}

impl WakeDetector {
    /// How long the host was suspended, if the gap exceeds the tolerance.
    pub fn suspended_for(
        &self,
        wall_elapsed: chrono::Duration,
        monotonic_elapsed: std::time::Duration,
    ) -> Option<std::time::Duration> {
        let wall = wall_elapsed.to_std().ok()?;
        let gap = wall.checked_sub(monotonic_elapsed)?;
        (gap > self.tolerance).then_some(gap)
    }

    pub fn spawn(self, scheduler: RepeatScheduler) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_wall = chrono::Utc::now();
            let mut last_mono = tokio::time::Instant::now();
            loop {
                interval.tick().await;
                let wall = chrono::Utc::now();
                let mono = tokio::time::Instant::now();
                if let Some(gap) = self.suspended_for(wall - last_wall, mono - last_mono) {
                    tracing::info!(suspended = ?gap, "host woke up");
                    scheduler.on_wake();
                }
                last_wall = wall;
                last_mono = mono;
            }
        })
    }
}
