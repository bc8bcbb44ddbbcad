use std::{env, io, process};

use ftail::Ftail;
use log::{debug, error};

use pirtc::{
    cli::{self, Mode},
    clock::SystemClock,
    config::Config,
    ds1307::Ds1307,
    gpio,
    i2c::BitBangI2c,
};

fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            println!("bad configuration: {err}");
            process::exit(1);
        }
    };

    let mut logger = Ftail::new().console(config.log_level);
    if let Some(dir) = &config.log_dir {
        logger = logger.daily_file(dir, config.log_level);
    }
    if let Err(err) = logger.init() {
        eprintln!("failed to set up logging: {err:?}");
    }

    let mut args = env::args();
    let exe = args.next().unwrap_or_else(|| "pirtc".to_string());

    // Bad arguments never touch the bus.
    let mode = match Mode::parse(args) {
        Ok(mode) => mode,
        Err(err) if err.is_usage() => {
            debug!("{err}");
            println!("{}", cli::usage(&exe));
            return;
        }
        Err(err) => {
            println!("{err}");
            process::exit(1);
        }
    };

    let (sda, scl) = match gpio::open_bus(config.sda_pin, config.scl_pin) {
        Ok(lines) => lines,
        Err(err) => {
            println!("{err}");
            process::exit(1);
        }
    };
    let bus = BitBangI2c::new(sda, scl, config.delay, config.half_period);
    let mut rtc = Ds1307::new(bus);

    if let Err(err) = cli::run(&mode, &mut rtc, &mut SystemClock, &mut io::stdout().lock()) {
        error!("{mode:?} failed: {err}");
        println!("{err}");
        process::exit(1);
    }
}
