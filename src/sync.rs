use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Shutdown flag shared by the client and its loops.
///
/// Loops either poll [`Exit::is_set`] between socket waits, or sleep in
/// [`Exit::wait_timeout`] so that setting the flag wakes them at once.
#[derive(Debug, Default)]
pub struct Exit {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Exit {
    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn set(&self) -> bool {
        let mut flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !*flag;
        *flag = true;
        self.cond.notify_all();
        first
    }

    /// Sleep up to `dur`. Returns true if the flag is set.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (flag, _) = self
            .cond
            .wait_timeout_while(flag, dur, |exit| !*exit)
            .unwrap_or_else(PoisonError::into_inner);
        *flag
    }
}
