//! Host wall clock.

use std::io;

use chrono::{DateTime, Local, Utc};

pub trait HostClock {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_local(&self) -> DateTime<Local>;
    fn set(&mut self, time: DateTime<Utc>) -> Result<(), Error>;
}

/// The kernel's realtime clock. Setting it needs `CAP_SYS_TIME`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl HostClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }

    fn set(&mut self, time: DateTime<Utc>) -> Result<(), Error> {
        let ts = libc::timespec {
            tv_sec: time.timestamp() as libc::time_t,
            tv_nsec: time.timestamp_subsec_nanos() as libc::c_long,
        };

        // SAFETY: `ts` is a valid, initialised timespec that outlives the call.
        let status = unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &ts) };
        if status != 0 {
            return Err(Error::Set(io::Error::last_os_error()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to set the system clock: {0}")]
    Set(#[source] io::Error),
}
