#![allow(unused_imports)]
#![allow(dead_code)]

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};
use pl455_balance_rs::{
    crc::crc16,
    registers::CELL_VOLTS_PER_LSB,
    signal::{ResponseFrame, ResponseProducer},
    CurrentSense, FlybackPwm, SerialLink,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Raw flyback sense counts for ~1.0 A (0.999 A), inside the 1 A band.
pub const RAW_1A: u16 = 124;
/// ~0.81 A, below the 1 A band.
pub const RAW_LOW: u16 = 100;
/// ~1.61 A, above the 1 A band.
pub const RAW_HIGH: u16 = 200;

/// Appends the little-endian CRC16 of `bytes`.
pub fn with_crc(bytes: &[u8]) -> Vec<u8> {
    let mut frame = bytes.to_vec();
    frame.extend_from_slice(&crc16(bytes).to_le_bytes());
    frame
}

/// Builds the monitor's cell voltage response for `volts` given cell 1 first.
pub fn cell_response(volts: &[f32]) -> Vec<u8> {
    let mut frame = vec![(2 * volts.len() - 1) as u8];
    for v in volts.iter().rev() {
        let raw = (v / CELL_VOLTS_PER_LSB).round() as u16;
        frame.extend_from_slice(&raw.to_be_bytes());
    }
    with_crc(&frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkError;

#[derive(Debug, Default)]
pub struct LinkState {
    /// Every frame passed to `send`.
    pub sent: Vec<Vec<u8>>,
    /// Lengths passed to `arm_receive`.
    pub armed: Vec<usize>,
    /// Replayed one per `arm_receive`.
    pub responses: VecDeque<Vec<u8>>,
    pub fail_send: bool,
}

/// Serial link double. Arming a receive plays the next scripted response into
/// the response queue, the way the receive-complete interrupt would.
pub struct MockLink<'q, const Q: usize> {
    producer: ResponseProducer<'q, Q>,
    pub state: Rc<RefCell<LinkState>>,
}

impl<'q, const Q: usize> MockLink<'q, Q> {
    pub fn new(producer: ResponseProducer<'q, Q>) -> Self {
        Self {
            producer,
            state: Rc::new(RefCell::new(LinkState::default())),
        }
    }

    pub fn with_responses(producer: ResponseProducer<'q, Q>, responses: &[Vec<u8>]) -> Self {
        let link = Self::new(producer);
        link.state
            .borrow_mut()
            .responses
            .extend(responses.iter().cloned());
        link
    }

    fn do_send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        if state.fail_send {
            return Err(LinkError);
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }

    fn do_arm(&mut self, len: usize) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        state.armed.push(len);
        if let Some(response) = state.responses.pop_front() {
            let frame = ResponseFrame::from_slice(&response).unwrap();
            self.producer.enqueue(frame).unwrap();
        }
        Ok(())
    }
}

#[cfg(not(feature = "async"))]
impl<'q, const Q: usize> SerialLink for MockLink<'q, Q> {
    type Error = LinkError;

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.do_send(frame)
    }

    fn arm_receive(&mut self, len: usize) -> Result<(), Self::Error> {
        self.do_arm(len)
    }
}

#[cfg(feature = "async")]
impl<'q, const Q: usize> SerialLink for MockLink<'q, Q> {
    type Error = LinkError;

    async fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.do_send(frame)
    }

    async fn arm_receive(&mut self, len: usize) -> Result<(), Self::Error> {
        self.do_arm(len)
    }
}

/// Hardware events shared by the switch lines and the PWM double, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Line(u8, bool),
    Duty(u8),
    Start,
    Stop,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Output pin that records its transitions.
pub struct RecordingPin {
    pub line: u8,
    log: EventLog,
    pub fail: bool,
}

impl RecordingPin {
    pub fn new(line: u8, log: EventLog) -> Self {
        Self {
            line,
            log,
            fail: false,
        }
    }

    fn record(&mut self, high: bool) -> Result<(), digital::ErrorKind> {
        if self.fail {
            return Err(digital::ErrorKind::Other);
        }
        self.log.borrow_mut().push(Event::Line(self.line, high));
        Ok(())
    }
}

impl digital::ErrorType for RecordingPin {
    type Error = digital::ErrorKind;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(true)
    }
}

/// The 11 switch lines of the reference board, line 1 first.
pub fn matrix_lines(log: &EventLog) -> [RecordingPin; 11] {
    core::array::from_fn(|i| RecordingPin::new(i as u8 + 1, log.clone()))
}

/// Lines driven high, in order.
pub fn lines_set(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Line(line, true) => Some(*line),
            _ => None,
        })
        .collect()
}

pub fn count(events: &[Event], event: Event) -> usize {
    events.iter().filter(|e| **e == event).count()
}

/// PWM double with a 0..=100 duty range.
pub struct MockPwm {
    log: EventLog,
}

impl MockPwm {
    pub fn new(log: &EventLog) -> Self {
        Self { log: log.clone() }
    }
}

impl pwm::ErrorType for MockPwm {
    type Error = pwm::ErrorKind;
}

impl SetDutyCycle for MockPwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Duty(duty as u8));
        Ok(())
    }
}

impl FlybackPwm for MockPwm {
    fn start(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Stop);
        Ok(())
    }
}

/// ADC double: replays scripted samples, then repeats `fallback`.
pub struct MockSense {
    pub readings: VecDeque<Result<u16, ()>>,
    pub fallback: Result<u16, ()>,
}

impl MockSense {
    pub fn constant(raw: u16) -> Self {
        Self {
            readings: VecDeque::new(),
            fallback: Ok(raw),
        }
    }

    pub fn scripted(readings: &[u16], fallback: u16) -> Self {
        Self {
            readings: readings.iter().map(|r| Ok(*r)).collect(),
            fallback: Ok(fallback),
        }
    }

    pub fn failing() -> Self {
        Self {
            readings: VecDeque::new(),
            fallback: Err(()),
        }
    }

    fn next(&mut self) -> Result<u16, ()> {
        self.readings.pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(not(feature = "async"))]
impl CurrentSense for MockSense {
    type Error = ();

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        self.next()
    }
}

#[cfg(feature = "async")]
impl CurrentSense for MockSense {
    type Error = ();

    async fn read_raw(&mut self) -> Result<u16, Self::Error> {
        self.next()
    }
}

/// Delay that only adds up the requested time.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub total_ns: u64,
}

impl RecordingDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }

    pub fn total_us(&self) -> u64 {
        self.total_ns / 1_000
    }
}

#[cfg(not(feature = "async"))]
impl embedded_hal::delay::DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }

    fn delay_us(&mut self, us: u32) {
        self.total_ns += us as u64 * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ns += ms as u64 * 1_000_000;
    }
}

#[cfg(feature = "async")]
impl embedded_hal_async::delay::DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }

    async fn delay_us(&mut self, us: u32) {
        self.total_ns += us as u64 * 1_000;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.total_ns += ms as u64 * 1_000_000;
    }
}
