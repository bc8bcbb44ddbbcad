//! Command line modes.

use std::io::{self, Write};

use log::{debug, info};

use crate::{
    clock::{self, HostClock},
    ds1307::{self, Ds1307, CONTROL_DEFAULT},
    i2c::Transport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Copy the host clock into the DS1307.
    Init,
    /// Copy the DS1307 clock into the host.
    Set,
    /// Print both clocks and the stored message.
    Get,
    Message(String),
}

impl Mode {
    /// Parses the arguments following the executable name.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, Error> {
        let mut args = args.into_iter();
        let switch = args.next().ok_or(Error::MissingMode)?;

        match switch.as_str() {
            "-I" => Ok(Mode::Init),
            "-S" => Ok(Mode::Set),
            "-G" => Ok(Mode::Get),
            "-M" => args.next().map(Mode::Message).ok_or(Error::MissingMessage),
            _ => Err(Error::UnknownMode(switch)),
        }
    }
}

pub fn usage(exe: &str) -> String {
    format!(
        "{exe} [-I|-S|-G|-M] [DATA]\n\
         WHERE:\n\
         -I - Initialise DS1307 device clock from system clock.\n\
         -S - Set the system clock from the DS1307 device clock.\n\
         -G - Read system clock, DS1307 device clock and message.\n\
         -M - Set DS1307 device message."
    )
}

/// Printable ASCII as is, anything else as ` XX ` hex.
pub fn display(data: &[u8]) -> String {
    data.iter()
        .map(|&byte| match byte {
            32..=127 => char::from(byte).to_string(),
            _ => format!(" {byte:02X} "),
        })
        .collect()
}

pub fn run<T, C, W>(mode: &Mode, rtc: &mut Ds1307<T>, clock: &mut C, out: &mut W) -> Result<(), Error>
where
    T: Transport,
    C: HostClock,
    W: Write,
{
    match mode {
        Mode::Init => {
            let now = clock.now_utc();

            rtc.set_control(CONTROL_DEFAULT);
            debug!("control register now {:02X}", rtc.control());

            rtc.set_datetime(now.naive_utc())?;
            info!("DS1307 set to {now}");
        }
        Mode::Set => {
            let now = rtc.datetime()?.and_utc();
            clock.set(now)?;
            info!("system clock set to {now}");
        }
        Mode::Get => {
            writeln!(out, "DS1307 TIME: {}", rtc.time())?;
            writeln!(out, "DS1307 DATE: {}", rtc.date())?;
            writeln!(out, "DS1307 MESSAGE: {}", display(&rtc.message()))?;
            writeln!(out)?;

            let now = clock.now_local();
            writeln!(out, "SYSTEM TIME: {}", now.format("%H:%M:%S"))?;
            writeln!(out, "SYSTEM DATE: {}", now.format("%Y-%m-%d"))?;
        }
        Mode::Message(text) => {
            rtc.set_message(text);
            writeln!(out, "DS1307 MESSAGE SET: {}", display(&rtc.message()))?;
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no mode given")]
    MissingMode,
    #[error("unknown mode `{0}`")]
    UnknownMode(String),
    #[error("-M needs the message text")]
    MissingMessage,
    #[error(transparent)]
    Rtc(#[from] ds1307::Error),
    #[error(transparent)]
    Clock(#[from] clock::Error),
    #[error("unable to write output: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the arguments were at fault, so usage should be shown.
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::MissingMode | Error::UnknownMode(_) | Error::MissingMessage)
    }
}
