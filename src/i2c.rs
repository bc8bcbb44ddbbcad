//! Bit-banged I2C master over two GPIO lines.
//!
//! Every transaction is framed by exactly one start and one stop condition.
//! Bytes go out and come in most-significant bit first. There is no clock
//! stretching, arbitration or timeout: each clock level is simply held for one
//! half period, so a slave that stretches the clock will be misread.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::trace;

use crate::{
    delay::Delay,
    gpio::{Direction, Level, Line, Pull},
};

/// Fastest supported half period of the clock.
pub const HALF_PERIOD: Duration = Duration::from_micros(5);
pub const WORD_BITS: u32 = 8;

const INPUT: Direction = Direction::Input(Pull::Up);

/// Acknowledge bit as seen on the data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    /// Line pulled low by the receiver.
    Ack,
    /// Line left high.
    Nack,
}

impl From<Level> for Ack {
    fn from(value: Level) -> Self {
        match value {
            Level::Low => Ack::Ack,
            Level::High => Ack::Nack,
        }
    }
}

impl From<Ack> for Level {
    fn from(value: Ack) -> Self {
        match value {
            Ack::Ack => Level::Low,
            Ack::Nack => Level::High,
        }
    }
}

/// Outcome of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes read back, exactly as many as were requested.
    pub data: Vec<u8>,
    /// Acknowledge sampled after each written byte.
    pub acks: Vec<Ack>,
}

impl Transfer {
    pub fn is_acknowledged(&self) -> bool {
        self.acks.iter().all(|ack| *ack == Ack::Ack)
    }

    /// Index of the first written byte the slave did not acknowledge.
    pub fn first_nack(&self) -> Option<usize> {
        self.acks.iter().position(|ack| *ack == Ack::Nack)
    }
}

/// Anything that can run a write-then-read transaction.
pub trait Transport {
    fn transfer(&mut self, write: &[u8], read_count: usize) -> Transfer;
}

pub struct BitBangI2c<L, D> {
    sda: L,
    scl: L,
    delay: D,
    period: Duration,
}

impl<L: Line, D: Delay> BitBangI2c<L, D> {
    /// Takes ownership of both lines and parks them idle-high.
    ///
    /// Half periods shorter than [`HALF_PERIOD`] are raised to it.
    pub fn new(sda: L, scl: L, delay: D, period: Duration) -> Self {
        let mut this = Self {
            sda,
            scl,
            delay,
            period: period.max(HALF_PERIOD),
        };
        this.init();

        this
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drives both lines as outputs at logic high. Safe to repeat, and the way
    /// to recover a bus left mid-transaction.
    pub fn init(&mut self) {
        self.sda.write(Level::High);
        self.sda.configure(Direction::Output);
        self.scl.write(Level::High);
        self.scl.configure(Direction::Output);
    }

    pub fn transfer(&mut self, write: &[u8], read_count: usize) -> Transfer {
        let mut result = Transfer {
            data: Vec::with_capacity(read_count),
            acks: Vec::with_capacity(write.len()),
        };

        self.start();

        for &byte in write {
            self.write_byte(byte);
            let ack = self.read_ack();
            trace!("data out: {byte:02X} ack: {ack:?}");
            result.acks.push(ack);
        }

        for n in 0..read_count {
            let byte = self.read_byte();
            // The last byte is refused so the slave lets go of the data line.
            let ack = if n + 1 == read_count { Ack::Nack } else { Ack::Ack };
            self.write_ack(ack);
            trace!("data in: {byte:02X} ack: {ack:?}");
            result.data.push(byte);
        }

        self.stop();

        result
    }

    fn hold(&mut self) {
        self.delay.hold(self.period);
    }

    fn clock(&mut self, level: Level) {
        self.scl.write(level);
        self.hold();
    }

    fn start(&mut self) {
        self.sda.configure(Direction::Output);
        self.sda.write(Level::Low);
        self.hold();
        self.clock(Level::Low);
    }

    fn stop(&mut self) {
        self.sda.configure(Direction::Output);
        self.sda.write(Level::Low);
        self.hold();
        self.clock(Level::High);
        self.sda.write(Level::High);
        // bus free time before the next start
        self.hold();
    }

    fn write_byte(&mut self, byte: u8) {
        for bit in (0..WORD_BITS).rev() {
            self.sda.write(Level::from(byte & (1 << bit) != 0));
            self.clock(Level::High);
            self.clock(Level::Low);
        }
    }

    fn read_ack(&mut self) -> Ack {
        self.sda.configure(INPUT);
        self.clock(Level::High);
        let ack = Ack::from(self.sda.read());
        self.clock(Level::Low);
        self.sda.configure(Direction::Output);

        ack
    }

    fn read_byte(&mut self) -> u8 {
        self.sda.configure(INPUT);

        let mut byte = 0;
        for _ in 0..WORD_BITS {
            self.clock(Level::High);
            byte = (byte << 1) | self.sda.read().bit();
            self.clock(Level::Low);
        }

        byte
    }

    fn write_ack(&mut self, ack: Ack) {
        self.sda.write(ack.into());
        self.sda.configure(Direction::Output);
        self.clock(Level::High);
        self.clock(Level::Low);
        self.sda.configure(INPUT);
    }
}

impl<L: Line, D: Delay> Transport for BitBangI2c<L, D> {
    fn transfer(&mut self, write: &[u8], read_count: usize) -> Transfer {
        BitBangI2c::transfer(self, write, read_count)
    }
}

/// A bus shared between threads. The lock is held for the whole transaction.
pub struct SharedBus<L, D> {
    inner: Arc<Mutex<BitBangI2c<L, D>>>,
}

impl<L, D> Clone for SharedBus<L, D> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L: Line, D: Delay> SharedBus<L, D> {
    pub fn new(bus: BitBangI2c<L, D>) -> Self {
        Self { inner: Arc::new(Mutex::new(bus)) }
    }
}

impl<L: Line, D: Delay> Transport for SharedBus<L, D> {
    fn transfer(&mut self, write: &[u8], read_count: usize) -> Transfer {
        let mut bus = self.inner.lock().unwrap_or_else(|poisoned| {
            // A holder panicked mid-transaction, so the lines are in an unknown state.
            let mut bus = PoisonError::into_inner(poisoned);
            bus.init();
            bus
        });

        bus.transfer(write, read_count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Scl(Level),
        /// Effective level of the data line changed.
        Sda(Level),
        SdaDirection(Direction),
        Sample(Level),
        Hold(Duration),
    }

    #[derive(Debug)]
    pub struct Wire {
        pub events: Vec<Event>,
        scl: Level,
        sda_latch: Level,
        sda_direction: Direction,
        /// Levels the slave puts on the data line, one per sample.
        slave: VecDeque<Level>,
    }

    impl Wire {
        fn new() -> Self {
            Self {
                events: Vec::new(),
                scl: Level::High,
                sda_latch: Level::Low,
                sda_direction: Direction::Input(Pull::Off),
                slave: VecDeque::new(),
            }
        }

        fn sda(&self) -> Level {
            match self.sda_direction {
                Direction::Output => self.sda_latch,
                // released; the pull-up wins whenever the slave isn't driving
                Direction::Input(_) => Level::High,
            }
        }

        fn update_sda(&mut self, f: impl FnOnce(&mut Self)) {
            let before = self.sda();
            f(self);
            let after = self.sda();
            if before != after {
                self.events.push(Event::Sda(after));
            }
        }
    }

    #[derive(Clone, Copy)]
    enum Role {
        Sda,
        Scl,
    }

    pub struct MockLine {
        wire: Arc<Mutex<Wire>>,
        role: Role,
    }

    impl Line for MockLine {
        fn configure(&mut self, direction: Direction) {
            let mut wire = self.wire.lock().unwrap();
            if let Role::Sda = self.role {
                if wire.sda_direction != direction {
                    wire.events.push(Event::SdaDirection(direction));
                }
                wire.update_sda(|wire| wire.sda_direction = direction);
            }
        }

        fn write(&mut self, level: Level) {
            let mut wire = self.wire.lock().unwrap();
            match self.role {
                Role::Sda => wire.update_sda(|wire| wire.sda_latch = level),
                Role::Scl => {
                    if wire.scl != level {
                        wire.scl = level;
                        wire.events.push(Event::Scl(level));
                    }
                }
            }
        }

        fn read(&mut self) -> Level {
            let mut wire = self.wire.lock().unwrap();
            let level = match wire.sda_direction {
                Direction::Output => wire.sda_latch,
                Direction::Input(_) => wire.slave.pop_front().unwrap_or(Level::High),
            };
            wire.events.push(Event::Sample(level));

            level
        }
    }

    pub struct MockDelay {
        wire: Arc<Mutex<Wire>>,
    }

    impl Delay for MockDelay {
        fn hold(&mut self, period: Duration) {
            self.wire.lock().unwrap().events.push(Event::Hold(period));
        }
    }

    pub type MockBus = BitBangI2c<MockLine, MockDelay>;

    pub fn mock_bus() -> (MockBus, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::new()));
        let line = |role| MockLine { wire: Arc::clone(&wire), role };
        let bus = BitBangI2c::new(
            line(Role::Sda),
            line(Role::Scl),
            MockDelay { wire: Arc::clone(&wire) },
            HALF_PERIOD,
        );

        (bus, wire)
    }

    /// Queues what the slave answers: `acks` before the `bytes`, MSB first.
    fn respond(wire: &Arc<Mutex<Wire>>, acks: &[Ack], bytes: &[u8]) {
        let mut wire = wire.lock().unwrap();
        wire.slave.extend(acks.iter().map(|&ack| Level::from(ack)));
        for &byte in bytes {
            wire.slave.extend((0..8).rev().map(|bit| Level::from(byte & (1 << bit) != 0)));
        }
    }

    fn take_events(wire: &Arc<Mutex<Wire>>) -> Vec<Event> {
        std::mem::take(&mut wire.lock().unwrap().events)
    }

    /// Replays the trace and returns, for every rising clock edge, the data line
    /// level and whether the master was driving it.
    fn clocked_bits(events: &[Event]) -> Vec<(Level, bool)> {
        let mut sda = Level::High;
        let mut driven = true;
        let mut bits = Vec::new();
        for event in events {
            match *event {
                Event::Sda(level) => sda = level,
                Event::SdaDirection(direction) => driven = direction == Direction::Output,
                Event::Scl(Level::High) => bits.push((sda, driven)),
                _ => {}
            }
        }

        bits
    }

    /// Number of full high-then-low clock pulses.
    fn pulses(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|e| **e == Event::Scl(Level::Low))
            .count()
            // the falling edge of the start condition has no matching rise
            .saturating_sub(1)
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Framing {
        Start,
        Stop,
        Edge,
    }

    fn framing(events: &[Event]) -> Vec<Framing> {
        let mut scl = Level::High;
        let mut out = Vec::new();
        for event in events {
            match *event {
                Event::Scl(level) => {
                    scl = level;
                    if out.last() != Some(&Framing::Edge) {
                        out.push(Framing::Edge);
                    }
                }
                Event::Sda(Level::Low) if scl == Level::High => out.push(Framing::Start),
                Event::Sda(Level::High) if scl == Level::High => out.push(Framing::Stop),
                _ => {}
            }
        }

        out
    }

    #[test]
    fn init_parks_both_lines_high_and_repeats_silently() {
        let (mut bus, wire) = mock_bus();
        {
            let wire = wire.lock().unwrap();
            assert_eq!(wire.scl, Level::High);
            assert_eq!(wire.sda_direction, Direction::Output);
            assert_eq!(wire.sda(), Level::High);
        }
        take_events(&wire);

        bus.init();
        bus.init();

        assert!(take_events(&wire).is_empty());
        let wire = wire.lock().unwrap();
        assert_eq!(wire.sda_direction, Direction::Output);
        assert_eq!(wire.sda(), Level::High);
        assert_eq!(wire.scl, Level::High);
    }

    #[test]
    fn taking_over_stale_lines_never_pulls_them_low() {
        // lines start released with a low output latch left over
        let (_bus, wire) = mock_bus();
        let events = take_events(&wire);

        assert!(!events.contains(&Event::Sda(Level::Low)));
        assert!(!events.contains(&Event::Scl(Level::Low)));
        assert_eq!(events, [Event::SdaDirection(Direction::Output)]);
    }

    #[test]
    fn write_emits_msb_first() {
        let (mut bus, wire) = mock_bus();
        take_events(&wire);

        bus.transfer(&[0xA5], 0);

        let bits: Vec<u8> = clocked_bits(&take_events(&wire))
            .into_iter()
            .filter(|(_, driven)| *driven)
            .map(|(level, _)| level.bit())
            .take(8)
            .collect();
        assert_eq!(bits, [1, 0, 1, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn control_register_write_scenario() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack; 3], &[]);
        take_events(&wire);

        let result = bus.transfer(&[0xD0, 0x07, 0x91], 0);
        let events = take_events(&wire);

        assert!(result.data.is_empty());
        assert_eq!(result.acks, [Ack::Ack; 3]);
        assert!(result.is_acknowledged());
        assert_eq!(pulses(&events), 3 * 8 + 3);

        let bits = clocked_bits(&events);
        let data: Vec<u8> = bits.iter().filter(|(_, d)| *d).map(|(l, _)| l.bit()).collect();
        // trailing entry is the stop condition's clock rise
        assert_eq!(
            &data[..24],
            &[
                1, 1, 0, 1, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 1, 1, 1, //
                1, 0, 0, 1, 0, 0, 0, 1,
            ]
        );
        // one released clock pulse after every byte for the acknowledge
        let released: Vec<usize> = bits
            .iter()
            .enumerate()
            .filter(|(_, (_, driven))| !driven)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(released, [8, 17, 26]);
    }

    #[test]
    fn time_read_scenario() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack], &[0x45, 0x30, 0x12]);
        take_events(&wire);

        let result = bus.transfer(&[0xD1], 3);
        let events = take_events(&wire);

        assert_eq!(result.data, [0x45, 0x30, 0x12]);
        assert_eq!(result.acks, [Ack::Ack]);
        assert_eq!(pulses(&events), 8 + 1 + 3 * 8 + 3);

        // master-driven bits after the address byte are the read acknowledges
        let driven: Vec<u8> = clocked_bits(&events)
            .into_iter()
            .skip(9)
            .filter(|(_, driven)| *driven)
            .map(|(level, _)| level.bit())
            .collect();
        // three acknowledges, then the stop condition's clock rise with data low
        assert_eq!(driven, [0, 0, 1, 0]);
    }

    #[test]
    fn single_byte_read_is_refused() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack], &[0x90]);
        take_events(&wire);

        let result = bus.transfer(&[0xD1], 1);
        let events = take_events(&wire);

        assert_eq!(result.data, [0x90]);
        assert_eq!(pulses(&events), 8 + 1 + 8 + 1);

        let driven: Vec<u8> = clocked_bits(&events)
            .into_iter()
            .skip(9)
            .filter(|(_, driven)| *driven)
            .map(|(level, _)| level.bit())
            .collect();
        // the only acknowledge is high, then the stop condition's clock rise
        assert_eq!(driven, [1, 0]);
    }

    #[test]
    fn read_length_matches_request() {
        for count in [0, 1, 2, 7, 56, 64] {
            let (mut bus, _wire) = mock_bus();
            let result = bus.transfer(&[0xD1], count);
            assert_eq!(result.data.len(), count);
        }
    }

    #[test]
    fn read_without_write_phase() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[], &[0xC3]);

        let result = bus.transfer(&[], 1);

        assert_eq!(result.data, [0xC3]);
        assert!(result.acks.is_empty());
    }

    #[test]
    fn missing_acknowledge_is_reported_not_raised() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack, Ack::Nack], &[]);

        let result = bus.transfer(&[0xD0, 0x08, 0x41], 0);

        assert_eq!(result.acks, [Ack::Ack, Ack::Nack, Ack::Nack]);
        assert!(!result.is_acknowledged());
        assert_eq!(result.first_nack(), Some(1));
    }

    #[test]
    fn every_transfer_is_framed_by_one_start_and_one_stop() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack], &[0xFF, 0x00]);
        take_events(&wire);

        bus.transfer(&[0xD1], 2);
        bus.transfer(&[0xFF, 0x00], 0);
        let frames = framing(&take_events(&wire));

        assert_eq!(
            frames,
            [
                Framing::Start,
                Framing::Edge,
                Framing::Stop,
                Framing::Start,
                Framing::Edge,
                Framing::Stop,
            ]
        );
    }

    #[test]
    fn data_line_only_changes_while_clock_low_between_frames() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack], &[0xAA, 0x55]);
        take_events(&wire);

        bus.transfer(&[0xD1], 2);
        let events = take_events(&wire);

        let frames = framing(&events);
        assert_eq!(frames.iter().filter(|f| **f == Framing::Start).count(), 1);
        assert_eq!(frames.iter().filter(|f| **f == Framing::Stop).count(), 1);
        assert_eq!(frames.first(), Some(&Framing::Start));
        assert_eq!(frames.last(), Some(&Framing::Stop));
    }

    #[test]
    fn every_clock_edge_is_held_for_one_period() {
        let (mut bus, wire) = mock_bus();
        respond(&wire, &[Ack::Ack], &[0x12, 0x34]);
        take_events(&wire);

        bus.transfer(&[0xD1], 2);
        let events = take_events(&wire);

        for (i, event) in events.iter().enumerate() {
            if let Event::Scl(_) = event {
                let next = events[i + 1..]
                    .iter()
                    .find(|e| !matches!(e, Event::Sample(_)));
                assert_eq!(next, Some(&Event::Hold(HALF_PERIOD)), "edge at {i}");
            }
        }
    }

    #[test]
    fn samples_happen_while_clock_high() {
        let (mut bus, wire) = mock_bus();
        take_events(&wire);

        bus.transfer(&[0xD1], 1);

        let mut scl = Level::High;
        for event in take_events(&wire) {
            match event {
                Event::Scl(level) => scl = level,
                Event::Sample(_) => assert_eq!(scl, Level::High),
                _ => {}
            }
        }
    }

    #[test]
    fn period_never_drops_below_minimum() {
        let wire = Arc::new(Mutex::new(Wire::new()));
        let line = |role| MockLine { wire: Arc::clone(&wire), role };
        let bus = BitBangI2c::new(
            line(Role::Sda),
            line(Role::Scl),
            MockDelay { wire: Arc::clone(&wire) },
            Duration::from_micros(1),
        );

        assert_eq!(bus.period(), HALF_PERIOD);
    }

    #[test]
    fn shared_bus_serialises_transactions() {
        let (bus, wire) = mock_bus();
        take_events(&wire);
        let shared = SharedBus::new(bus);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        shared.transfer(&[0xD0, 0x00], 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let frames = framing(&take_events(&wire));
        let expected: Vec<Framing> = (0..20)
            .flat_map(|_| [Framing::Start, Framing::Edge, Framing::Stop])
            .collect();
        assert_eq!(frames, expected);
    }
}
