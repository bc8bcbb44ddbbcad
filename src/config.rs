use std::{env, str::FromStr, time::Duration};

use log::LevelFilter;

use crate::{delay::Strategy, i2c::HALF_PERIOD};

/// BCM pin numbers of the Pi's I2C header pins.
pub const SDA_PIN: u8 = 2;
pub const SCL_PIN: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sda_pin: u8,
    pub scl_pin: u8,
    pub half_period: Duration,
    pub delay: Strategy,
    pub log_level: LevelFilter,
    pub log_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sda_pin: SDA_PIN,
            scl_pin: SCL_PIN,
            half_period: HALF_PERIOD,
            delay: Strategy::Sleep,
            log_level: LevelFilter::Warn,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(pin) = parse(&lookup, "PIRTC_SDA_PIN")? {
            config.sda_pin = pin;
        }
        if let Some(pin) = parse(&lookup, "PIRTC_SCL_PIN")? {
            config.scl_pin = pin;
        }
        if config.sda_pin == config.scl_pin {
            return Err(Error::SamePin(config.sda_pin));
        }

        if let Some(micros) = parse::<u64>(&lookup, "PIRTC_HALF_PERIOD_US")? {
            let period = Duration::from_micros(micros);
            if period < HALF_PERIOD {
                return Err(Error::PeriodTooShort(micros));
            }
            config.half_period = period;
        }

        if let Some(delay) = parse(&lookup, "PIRTC_DELAY")? {
            config.delay = delay;
        }

        if let Some(level) = parse(&lookup, "PIRTC_LOG")? {
            config.log_level = level;
        }
        config.log_dir = lookup("PIRTC_LOG_DIR").filter(|dir| !dir.is_empty());

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, Error> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Invalid { key, value }),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("half period of {0}us is faster than the bus supports")]
    PeriodTooShort(u64),
    #[error("data and clock can't share GPIO {0}")]
    SamePin(u8),
}
