//! Scripted serial device for protocol tests
#![allow(dead_code)]

use std::collections::VecDeque;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use stm32_uart_loader::{Bootloader, Options, SerialPort, UART_ACK};

pub const ACK: u8 = UART_ACK;

/// Opcodes reported by a v3.x bootloader, in GET order
pub const OPCODES: [u8; 11] = [
    0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x43, 0x63, 0x73, 0x82, 0x92,
];

pub const BL_VERSION: u8 = 0x31;
pub const VERSION: u8 = 0x22;
pub const OPTION1: u8 = 0x00;
pub const OPTION2: u8 = 0x00;
pub const PID: u16 = 0xABCD;

/// Bytes the host sends during a handshake with the default opcodes
pub const HANDSHAKE_TX: [u8; 7] = [0x7F, 0x00, 0xFF, 0x01, 0xFE, 0x02, 0xFD];

#[derive(Clone, Debug, PartialEq)]
pub enum MockError {
    /// Read with no scripted reply left
    Exhausted,
}

/// Replays scripted device bytes and records everything the host sends
#[derive(Debug, Default)]
pub struct ScriptedPort {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub rts: Vec<bool>,
    pub dtr: Vec<bool>,
}

impl ScriptedPort {
    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.rx.extend(bytes.iter().copied());
        self
    }

    /// Scripted bytes not yet read by the host
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Read<u8> for ScriptedPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        self.rx.pop_front().ok_or(nb::Error::Other(MockError::Exhausted))
    }
}

impl Write<u8> for ScriptedPort {
    type Error = MockError;

    fn write(&mut self, b: u8) -> nb::Result<(), MockError> {
        self.tx.push(b);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

impl SerialPort<MockError> for ScriptedPort {
    fn set_rts(&mut self, level: bool) -> Result<(), MockError> {
        self.rts.push(level);
        Ok(())
    }
    fn set_dtr(&mut self, level: bool) -> Result<(), MockError> {
        self.dtr.push(level);
        Ok(())
    }
}

/// Delay that only adds up the requested time
#[derive(Debug, Default)]
pub struct NoDelay {
    pub total_ms: u32,
}

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

pub type TestLoader = Bootloader<ScriptedPort, NoDelay, MockError>;

/// Device side of a successful handshake
pub fn handshake_replies(opcodes: &[u8], pid: u16) -> Vec<u8> {
    let mut r = vec![ACK];

    // GET
    r.push(ACK);
    r.push(opcodes.len() as u8);
    r.push(BL_VERSION);
    r.extend_from_slice(opcodes);
    r.push(ACK);

    // GET VERSION
    r.push(ACK);
    r.extend_from_slice(&[VERSION, OPTION1, OPTION2]);
    r.push(ACK);

    // GET ID
    r.push(ACK);
    r.push(1);
    r.extend_from_slice(&pid.to_be_bytes());
    r.push(ACK);

    r
}

pub fn bootloader(options: Options, replies: &[u8]) -> TestLoader {
    let mut port = ScriptedPort::default();
    port.reply(replies);
    Bootloader::new(port, NoDelay::default(), options)
}

/// Bootloader past the handshake, with `replies` queued for what follows
pub fn ready(options: Options, opcodes: &[u8], replies: &[u8]) -> TestLoader {
    let mut r = handshake_replies(opcodes, PID);
    r.extend_from_slice(replies);

    let mut b = bootloader(options, &r);
    b.init().expect("handshake failed");
    b
}

/// Release the port, returning what was sent after the handshake and the
/// number of scripted bytes left unread
pub fn sent_after_handshake(b: TestLoader) -> (Vec<u8>, usize) {
    let port = b.release();
    (port.tx[HANDSHAKE_TX.len()..].to_vec(), port.pending())
}
