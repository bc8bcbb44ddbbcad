//! Software I2C on two Raspberry Pi GPIO lines, and a DS1307 real-time clock
//! driven over it.

pub mod bcd;
pub mod cli;
pub mod clock;
pub mod config;
pub mod delay;
pub mod ds1307;
pub mod gpio;
pub mod i2c;
