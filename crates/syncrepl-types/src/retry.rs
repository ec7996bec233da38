//! Retry schedule grammar: `"<interval> <count> <interval> <count> ..."`
//! with an optional trailing `+` count meaning "retry forever at this
//! interval" (spec §6 `retry` directive, §4.6 "Retry").

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One step of a retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStep {
    Finite { interval: Duration, remaining: u32 },
    Forever { interval: Duration },
}

/// An ordered retry schedule with a cursor. `advance()` returns the wait
/// interval for the next attempt and decrements the live step; when every
/// step is exhausted the replica is removed (spec §4.6 / §8 "Retry schedule
/// exhaustion removes the replica exactly once").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySchedule {
    steps: Vec<RetryStep>,
    cursor: usize,
}

impl RetrySchedule {
    pub fn new(steps: Vec<RetryStep>) -> Self {
        Self { steps, cursor: 0 }
    }

    /// Consumes one retry attempt, returning the interval to wait, or
    /// `None` if the schedule is exhausted.
    pub fn advance(&mut self) -> Option<Duration> {
        loop {
            let step = self.steps.get_mut(self.cursor)?;
            match step {
                RetryStep::Forever { interval } => return Some(*interval),
                RetryStep::Finite { interval, remaining } => {
                    if *remaining == 0 {
                        self.cursor += 1;
                        continue;
                    }
                    *remaining -= 1;
                    return Some(*interval);
                }
            }
        }
    }

    /// Resets the cursor and per-step counters to their original values.
    /// Called after meaningful progress (a completed refresh) so a later
    /// failure can exhaust the full retry budget again (spec §4.6).
    pub fn reset(&mut self, original: &RetrySchedule) {
        self.steps.clone_from(&original.steps);
        self.cursor = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }
}

/// Parses the directive grammar `"<interval> <count> ..."`. `count` may be
/// a non-negative integer or `+` for an infinite final step.
pub fn parse_retry_directive(text: &str) -> Result<RetrySchedule, RetryParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return Err(RetryParseError::OddTokenCount);
    }
    let mut steps = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks_exact(2) {
        let interval_secs: u64 = pair[0]
            .parse()
            .map_err(|_| RetryParseError::BadInterval(pair[0].to_string()))?;
        let interval = Duration::from_secs(interval_secs);
        if pair[1] == "+" {
            steps.push(RetryStep::Forever { interval });
        } else {
            let remaining: u32 = pair[1]
                .parse()
                .map_err(|_| RetryParseError::BadCount(pair[1].to_string()))?;
            steps.push(RetryStep::Finite { interval, remaining });
        }
    }
    Ok(RetrySchedule::new(steps))
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RetryParseError {
    #[error("retry directive must have an even number of tokens")]
    OddTokenCount,
    #[error("bad retry interval: {0}")]
    BadInterval(String),
    #[error("bad retry count: {0}")]
    BadCount(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_finite_then_infinite_tail() {
        let schedule = parse_retry_directive("5 3 60 +").unwrap();
        assert_eq!(
            schedule.steps,
            vec![
                RetryStep::Finite {
                    interval: Duration::from_secs(5),
                    remaining: 3
                },
                RetryStep::Forever {
                    interval: Duration::from_secs(60)
                },
            ]
        );
    }

    #[test]
    fn advance_exhausts_finite_steps_then_removes() {
        let mut schedule = parse_retry_directive("1 2").unwrap();
        assert_eq!(schedule.advance(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.advance(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.advance(), None);
        assert!(schedule.is_exhausted());
    }

    #[test]
    fn forever_step_never_exhausts() {
        let mut schedule = parse_retry_directive("1 +").unwrap();
        for _ in 0..10_000 {
            assert_eq!(schedule.advance(), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn reset_restores_original_budget() {
        let original = parse_retry_directive("1 2").unwrap();
        let mut schedule = original.clone();
        schedule.advance();
        schedule.advance();
        assert!(schedule.advance().is_none());
        schedule.reset(&original);
        assert_eq!(schedule.advance(), Some(Duration::from_secs(1)));
    }
}
