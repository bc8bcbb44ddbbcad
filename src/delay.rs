use std::{
    hint,
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

/// Holds the bus for a fixed duration between line changes.
pub trait Delay {
    fn hold(&mut self, period: Duration);
}

/// Blocking sleep on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Delay for ThreadSleep {
    fn hold(&mut self, period: Duration) {
        thread::sleep(period);
    }
}

/// Spins until a monotonic deadline passes. Never parks the thread, so a hold
/// can't overrun by a scheduler quantum.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait;

impl Delay for SpinWait {
    fn hold(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        while Instant::now() < deadline {
            hint::spin_loop();
        }
    }
}

/// Runtime choice between the two ways of holding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Sleep,
    Spin,
}

impl Delay for Strategy {
    fn hold(&mut self, period: Duration) {
        match self {
            Strategy::Sleep => ThreadSleep.hold(period),
            Strategy::Spin => SpinWait.hold(period),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sleep" => Ok(Strategy::Sleep),
            "spin" => Ok(Strategy::Spin),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown delay strategy `{0}`, expected `sleep` or `spin`")]
    UnknownStrategy(String),
}
