//! Timer wheel (spec §4.5 / `SPEC_FULL.md` §8), transcribed from
//! `timer.py`'s `Timer`/`PeriodicTimer`/`TimerThread` trio: one dedicated
//! thread, a `Condvar`-guarded list of armed timers, and a cached
//! soonest-to-expire entry so the thread doesn't rescan on every wakeup.
//!
//! The Python version keys timers by object identity; we hand out a
//! `TimerId` instead since Rust has no stable identity for trait objects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const TIMER_EXP_WAIT: Duration = Duration::from_millis(10);
const TIMER_MIN_WAIT: Duration = Duration::from_micros(10);
const TIMER_EMPTY_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct ArmedTimer {
    id: TimerId,
    expiry: Instant,
    period: Option<Duration>,
    callback: Box<dyn FnMut() + Send>,
}

struct State {
    running: bool,
    timers: Vec<ArmedTimer>,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
    next_id: AtomicU64,
}

/// The server's single timer thread. Cloning shares the same underlying
/// wheel; dropping the last handle does not stop the thread — call
/// `shutdown()` explicitly, matching the source's explicit `stop()`.
#[derive(Clone)]
pub struct TimerWheel {
    shared: Arc<Shared>,
}

pub struct TimerWheelHandle {
    wheel: TimerWheel,
    thread: Option<JoinHandle<()>>,
}

impl TimerWheel {
    pub fn spawn() -> TimerWheelHandle {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                running: true,
                timers: Vec::new(),
            }),
            cv: Condvar::new(),
            next_id: AtomicU64::new(1),
        });
        let wheel = TimerWheel { shared: shared.clone() };
        let thread_wheel = wheel.clone();
        let thread = std::thread::Builder::new()
            .name("rtls-timer".into())
            .spawn(move || thread_wheel.run())
            .expect("spawn timer thread");
        TimerWheelHandle {
            wheel,
            thread: Some(thread),
        }
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Arm a one-shot timer to fire after `delay`.
    pub fn arm(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.arm_at(Instant::now() + delay, None, callback)
    }

    /// Arm a timer that rearms itself from its own prior expiry, each time
    /// adding `period` — matching `PeriodicTimer.arm(rearm=True)`, which
    /// chains off `self.expiry`, not off "now", to avoid drift.
    pub fn arm_periodic(&self, period: Duration, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.arm_at(Instant::now() + period, Some(period), callback)
    }

    fn arm_at(&self, expiry: Instant, period: Option<Duration>, callback: impl FnMut() + Send + 'static) -> TimerId {
        let id = self.next_id();
        let mut state = self.shared.state.lock().unwrap();
        state.timers.push(ArmedTimer {
            id,
            expiry,
            period,
            callback: Box::new(callback),
        });
        self.shared.cv.notify_all();
        id
    }

    pub fn unarm(&self, id: TimerId) {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.timers.len();
        state.timers.retain(|t| t.id != id);
        if state.timers.len() != before {
            self.shared.cv.notify_all();
        }
    }

    fn run(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.running {
            let next_expiry = state.timers.iter().map(|t| t.expiry).min();
            match next_expiry {
                Some(expiry) => {
                    let now = Instant::now();
                    let sleep = expiry.saturating_duration_since(now);
                    if sleep < TIMER_MIN_WAIT {
                        let idx = state.timers.iter().position(|t| t.expiry == expiry).unwrap();
                        let mut timer = state.timers.remove(idx);
                        drop(state);
                        (timer.callback)();
                        if let Some(period) = timer.period {
                            let mut st = self.shared.state.lock().unwrap();
                            timer.expiry += period;
                            st.timers.push(timer);
                            state = st;
                        } else {
                            state = self.shared.state.lock().unwrap();
                        }
                        self.shared.cv.notify_all();
                    } else {
                        let wait = if sleep > TIMER_EXP_WAIT { sleep } else { sleep / 2 };
                        let (guard, _) = self.shared.cv.wait_timeout(state, wait).unwrap();
                        state = guard;
                    }
                }
                None => {
                    let (guard, _) = self.shared.cv.wait_timeout(state, TIMER_EMPTY_WAIT).unwrap();
                    state = guard;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.running = false;
        self.shared.cv.notify_all();
    }
}

impl TimerWheelHandle {
    pub fn wheel(&self) -> &TimerWheel {
        &self.wheel
    }
}

impl Drop for TimerWheelHandle {
    fn drop(&mut self) {
        self.wheel.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn one_shot_timer_fires_once() {
        let handle = TimerWheel::spawn();
        let (tx, rx) = mpsc::channel();
        handle.wheel().arm(Duration::from_millis(5), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(1)).expect("timer fired");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn unarm_prevents_firing() {
        let handle = TimerWheel::spawn();
        let (tx, rx) = mpsc::channel::<()>();
        let id = handle.wheel().arm(Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        handle.wheel().unarm(id);
        assert!(rx.recv_timeout(Duration::from_millis(80)).is_err());
    }

    #[test]
    fn periodic_timer_fires_multiple_times() {
        let handle = TimerWheel::spawn();
        let (tx, rx) = mpsc::channel();
        handle.wheel().arm_periodic(Duration::from_millis(5), move || {
            let _ = tx.send(());
        });
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(1)).expect("periodic tick");
        }
    }
}
