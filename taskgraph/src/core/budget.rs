//! Shared time budget helpers for per-action deadlines.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
///
/// Dispatch and validation of one action share a single deadline, so the
/// validator only gets what the handler left over.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("action timed out"));
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_is_an_error() {
        let err = remaining_budget(Instant::now()).unwrap_err();
        assert_eq!(err.to_string(), "action timed out");
    }

    #[test]
    fn future_deadline_returns_positive_budget() {
        let budget = remaining_budget(Instant::now() + Duration::from_secs(60)).expect("budget");
        assert!(budget > Duration::from_secs(50));
    }
}
