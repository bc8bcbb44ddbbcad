//! GPIO lines used by the bit-banged bus.

use rpi_embedded::gpio::{self, Gpio, IoPin, Mode, PullUpDown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pull {
    Off,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Output,
    Input(Pull),
}

/// One digital line. Switching to `Output` keeps the last written level latched.
pub trait Line {
    fn configure(&mut self, direction: Direction);
    fn write(&mut self, level: Level);
    fn read(&mut self) -> Level;
}

pub struct RpiLine {
    pin: IoPin,
}

impl RpiLine {
    pub fn new(gpio: &Gpio, bcm: u8) -> Result<Self, Error> {
        // Taken as input: switching to output here would drive a stale latch
        // onto the bus before the engine raises it.
        let pin = gpio.get(bcm)?.into_io(Mode::Input);

        Ok(Self { pin })
    }
}

impl Line for RpiLine {
    fn configure(&mut self, direction: Direction) {
        match direction {
            Direction::Output => {
                self.pin.set_pullupdown(PullUpDown::Off);
                self.pin.set_mode(Mode::Output);
            }
            Direction::Input(pull) => {
                self.pin.set_mode(Mode::Input);
                self.pin.set_pullupdown(match pull {
                    Pull::Off => PullUpDown::Off,
                    Pull::Up => PullUpDown::PullUp,
                });
            }
        }
    }

    fn write(&mut self, level: Level) {
        self.pin.write(match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        });
    }

    fn read(&mut self) -> Level {
        match self.pin.read() {
            gpio::Level::Low => Level::Low,
            gpio::Level::High => Level::High,
        }
    }
}

/// Acquires the data and clock lines, in that order.
pub fn open_bus(sda: u8, scl: u8) -> Result<(RpiLine, RpiLine), Error> {
    let gpio = Gpio::new()?;
    let sda = RpiLine::new(&gpio, sda)?;
    let scl = RpiLine::new(&gpio, scl)?;

    Ok((sda, scl))
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to access GPIO: {0}")]
    Gpio(#[from] gpio::Error),
}
