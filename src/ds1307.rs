//! DS1307 real-time clock on the bit-banged bus.
//!
//! Registers are reached by first writing the register pointer, then issuing
//! a separate read addressed transaction. The pointer auto-increments and wraps
//! at the end of the 64 byte register file.

use std::fmt::{self, Display};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::{debug, warn};

use crate::{
    bcd,
    i2c::{Transfer, Transport},
};

pub const ADDRESS: u8 = 0x68;
const WRITE_ADDRESS: u8 = ADDRESS << 1;
const READ_ADDRESS: u8 = (ADDRESS << 1) | 1;

const TIME_REGISTER: u8 = 0x00;
const DATE_REGISTER: u8 = 0x03;
const CONTROL_REGISTER: u8 = 0x07;
const MESSAGE_REGISTER: u8 = 0x08;

pub const REGISTER_COUNT: usize = 64;
pub const MESSAGE_LEN: usize = 56;

/// Clock halt flag in the seconds register.
const CLOCK_HALT_MASK: u8 = 0x80;
/// 12-hour mode flag in the hours register.
const HOUR_MODE_MASK: u8 = 0x40;

pub const CONTROL_OUT: u8 = 0x80;
pub const CONTROL_SQWE: u8 = 0x10;
pub const CONTROL_RATE_1HZ: u8 = 0x00;
pub const CONTROL_RATE_4KHZ: u8 = 0x01;
pub const CONTROL_RATE_8KHZ: u8 = 0x02;
pub const CONTROL_RATE_32KHZ: u8 = 0x03;

/// Square wave output enabled at 1Hz.
pub const CONTROL_DEFAULT: u8 = CONTROL_OUT | CONTROL_SQWE | CONTROL_RATE_1HZ;

const DAY_NAMES: [&str; 8] = [
    "",
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// A canned transaction: bytes to send, then how many to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub bytes: &'static [u8],
    pub read_count: usize,
}

impl Command {
    /// The command's bytes followed by `payload`.
    pub fn with_payload(&self, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.bytes.len() + payload.len());
        bytes.extend_from_slice(self.bytes);
        bytes.extend_from_slice(payload);

        bytes
    }
}

const fn select(bytes: &'static [u8]) -> Command {
    Command { bytes, read_count: 0 }
}

const fn read(read_count: usize) -> Command {
    Command { bytes: &[READ_ADDRESS], read_count }
}

pub const SELECT_ALL: Command = select(&[WRITE_ADDRESS, TIME_REGISTER]);
pub const READ_ALL: Command = read(REGISTER_COUNT);
pub const SELECT_TIME: Command = select(&[WRITE_ADDRESS, TIME_REGISTER]);
pub const READ_TIME: Command = read(3);
pub const SELECT_DATE: Command = select(&[WRITE_ADDRESS, DATE_REGISTER]);
pub const READ_DATE: Command = read(4);
pub const SELECT_CONTROL: Command = select(&[WRITE_ADDRESS, CONTROL_REGISTER]);
pub const READ_CONTROL: Command = read(1);
pub const SELECT_MESSAGE: Command = select(&[WRITE_ADDRESS, MESSAGE_REGISTER]);
pub const READ_MESSAGE: Command = read(MESSAGE_LEN);

/// Time registers as stored: packed BCD, flags masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl Time {
    fn from_registers(registers: &[u8]) -> Self {
        Self {
            seconds: registers[0] & !CLOCK_HALT_MASK,
            minutes: registers[1],
            hours: registers[2] & !(CLOCK_HALT_MASK | HOUR_MODE_MASK),
        }
    }

    fn to_registers(self) -> [u8; 3] {
        [self.seconds, self.minutes, self.hours]
    }
}

/// Prints the register nibbles, so a corrupt register still takes two columns.
impl Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}:{:02X}", self.hours, self.minutes, self.seconds)
    }
}

impl From<NaiveTime> for Time {
    fn from(value: NaiveTime) -> Self {
        Self {
            hours: bcd::encode(value.hour() as u8),
            minutes: bcd::encode(value.minute() as u8),
            seconds: bcd::encode(value.second() as u8),
        }
    }
}

/// Date registers as stored: a plain day-of-week code and packed BCD fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date {
    /// 1 is Sunday, 7 is Saturday.
    pub weekday: u8,
    pub day: u8,
    pub month: u8,
    /// Year within the century.
    pub year: u8,
}

impl Date {
    fn from_registers(registers: &[u8]) -> Self {
        Self {
            weekday: registers[0],
            day: registers[1],
            month: registers[2],
            year: registers[3],
        }
    }

    fn to_registers(self) -> [u8; 4] {
        [self.weekday, self.day, self.month, self.year]
    }

    pub fn day_name(&self) -> &'static str {
        DAY_NAMES.get(self.weekday as usize).copied().unwrap_or("")
    }
}

impl Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 20{:02X}-{:02X}-{:02X}",
            self.day_name(),
            self.year,
            self.month,
            self.day
        )
    }
}

impl TryFrom<NaiveDate> for Date {
    type Error = Error;

    fn try_from(value: NaiveDate) -> Result<Self, Self::Error> {
        if !(2000..2100).contains(&value.year()) {
            return Err(Error::YearOutOfRange(value.year()));
        }

        Ok(Self {
            weekday: value.weekday().number_from_sunday() as u8,
            day: bcd::encode(value.day() as u8),
            month: bcd::encode(value.month() as u8),
            year: bcd::encode((value.year() - 2000) as u8),
        })
    }
}

/// Combines the clock's date and time registers into a calendar value.
pub fn to_naive(date: Date, time: Time) -> Result<NaiveDateTime, Error> {
    decode_naive(date, time).ok_or(Error::InvalidDateTime(date, time))
}

fn decode_naive(date: Date, time: Time) -> Option<NaiveDateTime> {
    let field = |bcd| bcd::try_decode(bcd).map(u32::from);

    NaiveDate::from_ymd_opt(2000 + field(date.year)? as i32, field(date.month)?, field(date.day)?)?
        .and_hms_opt(field(time.hours)?, field(time.minutes)?, field(time.seconds)?)
}

/// Pads with spaces or truncates to exactly one message block.
pub fn message_block(text: &str) -> [u8; MESSAGE_LEN] {
    let mut block = [b' '; MESSAGE_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(MESSAGE_LEN);
    block[..len].copy_from_slice(&bytes[..len]);

    block
}

pub struct Ds1307<T> {
    bus: T,
}

impl<T: Transport> Ds1307<T> {
    pub fn new(bus: T) -> Self {
        Self { bus }
    }

    pub fn release(self) -> T {
        self.bus
    }

    fn run(&mut self, bytes: &[u8], read_count: usize) -> Transfer {
        let result = self.bus.transfer(bytes, read_count);
        if let Some(n) = result.first_nack() {
            warn!("DS1307 did not acknowledge byte {n} of {bytes:02X?}");
        }

        result
    }

    fn read(&mut self, select: Command, read: Command) -> Vec<u8> {
        self.run(select.bytes, select.read_count);
        let data = self.run(read.bytes, read.read_count).data;
        debug!("read {data:02X?}");

        data
    }

    fn write(&mut self, select: Command, payload: &[u8]) {
        debug!("write {payload:02X?}");
        self.run(&select.with_payload(payload), 0);
    }

    pub fn time(&mut self) -> Time {
        Time::from_registers(&self.read(SELECT_TIME, READ_TIME))
    }

    pub fn date(&mut self) -> Date {
        Date::from_registers(&self.read(SELECT_DATE, READ_DATE))
    }

    /// Date first, then time, matching the order they are set in.
    pub fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        let date = self.date();
        let time = self.time();

        to_naive(date, time)
    }

    pub fn control(&mut self) -> u8 {
        self.read(SELECT_CONTROL, READ_CONTROL)[0]
    }

    pub fn set_control(&mut self, control: u8) {
        self.write(SELECT_CONTROL, &[control]);
    }

    pub fn set_date(&mut self, date: Date) {
        self.write(SELECT_DATE, &date.to_registers());
    }

    /// Writing the seconds register also clears the clock halt flag.
    pub fn set_time(&mut self, time: Time) {
        self.write(SELECT_TIME, &time.to_registers());
    }

    pub fn set_datetime(&mut self, datetime: NaiveDateTime) -> Result<(), Error> {
        let date = Date::try_from(datetime.date())?;
        self.set_date(date);
        self.set_time(datetime.time().into());

        Ok(())
    }

    pub fn message(&mut self) -> Vec<u8> {
        self.read(SELECT_MESSAGE, READ_MESSAGE)
    }

    pub fn set_message(&mut self, text: &str) {
        self.write(SELECT_MESSAGE, &message_block(text));
    }

    /// Every register, from the seconds register onwards.
    pub fn dump(&mut self) -> Vec<u8> {
        self.read(SELECT_ALL, READ_ALL)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("year {0} can't be stored, the DS1307 only covers 2000 to 2099")]
    YearOutOfRange(i32),
    #[error("DS1307 holds an invalid date/time: {0} {1}")]
    InvalidDateTime(Date, Time),
}
