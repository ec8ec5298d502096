use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Cancellation flag checked by the evaluator before every node and instruction.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Wall-clock timer for one outermost execution. Dropping it stops the timer.
pub struct RunGuard {
    stop: Option<Sender<()>>,
    timer: Option<JoinHandle<()>>,
}

impl RunGuard {
    pub fn start(flag: CancelFlag, limit: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let timer = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(limit) {
                flag.set();
            }
        });
        Self {
            stop: Some(stop),
            timer: Some(timer),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // closing the channel wakes the timer
        self.stop.take();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_sets_the_flag() {
        let flag = CancelFlag::new();
        let guard = RunGuard::start(flag.clone(), Duration::from_millis(5));
        thread::sleep(Duration::from_millis(100));
        assert!(flag.is_set());
        drop(guard);
        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn dropping_the_guard_stops_the_timer() {
        let flag = CancelFlag::new();
        drop(RunGuard::start(flag.clone(), Duration::from_secs(60)));
        assert!(!flag.is_set());
    }
}
