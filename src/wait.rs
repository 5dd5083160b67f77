use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Delay between repeated checks. `interval == max_interval` gives a fixed
/// delay; otherwise the delay doubles up to the cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
}

impl WaitPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
        }
    }

    pub fn backoff(interval: Duration, max_interval: Duration) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
        }
    }

    fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_interval)
    }
}

/// Call `check` until it returns `Ok(true)`, sleeping between attempts.
///
/// Errors from `check` end the wait immediately. There is no attempt limit;
/// the user interrupts the process to give up.
pub fn wait_until<F>(policy: WaitPolicy, mut check: F) -> Result<usize>
where
    F: FnMut() -> Result<bool>,
{
    let mut delay = policy.interval;
    let mut attempts = 0;
    loop {
        attempts += 1;
        if check()? {
            return Ok(attempts);
        }
        debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "still waiting");
        thread::sleep(delay);
        delay = policy.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;

    #[test]
    fn repeats_until_done() {
        let mut remaining = 3;
        let attempts = wait_until(WaitPolicy::fixed(Duration::ZERO), || {
            remaining -= 1;
            Ok(remaining == 0)
        })
        .unwrap();
        assert_eq!(attempts, 3);
    }

    #[test]
    fn stops_on_error() {
        let mut calls = 0;
        let err = wait_until(WaitPolicy::fixed(Duration::ZERO), || {
            calls += 1;
            Err(LaunchError::RemoteProtocol("boom".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn backoff_is_capped() {
        let policy = WaitPolicy::backoff(Duration::from_secs(1), Duration::from_secs(3));
        assert_eq!(policy.next(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(policy.next(Duration::from_secs(2)), Duration::from_secs(3));
    }
}
