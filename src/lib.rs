//! STM32 Serial Bootloader.
//!
//! Based on AN3155. A [`Bootloader`] owns a serial port, runs the init
//! handshake to negotiate a [`Session`] with the device, and then exposes
//! memory read / write and the remaining bootloader commands.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod commands;
pub mod framing;
pub mod memory;
pub mod protocol;

use framing::Framing;
pub use protocol::{Capabilities, Capability, Command, Padding};
pub use protocol::{MAX_CHUNK, UART_ACK, UART_DISC, UART_NACK};

pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

/// Handshake progress
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Unstarted,
    AwaitingInitAck,
    AwaitingGetResponse,
    AwaitingVersionResponse,
    AwaitingIdResponse,
    Ready,
    Failed,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("command 0x{opcode:02x} refused (NACK)")]
    Nack { opcode: u8 },

    #[error("command 0x{opcode:02x} returned 0x{reply:02x}, expected ACK")]
    InvalidResponse { opcode: u8, reply: u8 },

    #[error("unsupported device, product ID is {0} bytes wide")]
    UnsupportedDevice(usize),

    #[error("{0:?} not supported by this bootloader")]
    Unsupported(Capability),

    #[error("address 0x{0:08x} is not word aligned")]
    Unaligned(u32),

    #[error("invalid transfer length {0}")]
    InvalidLength(usize),

    #[error("page {0} out of range for standard erase")]
    InvalidPage(u16),

    #[error("{len} bytes at 0x{address:08x} exceed the 32-bit address space")]
    OutOfRange { address: u32, len: usize },

    #[error("bootloader not initialised")]
    NotReady,
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Reset the device using DTR / RTS before connecting
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub reset: bool,

    /// Period to hold the device in reset
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub reset_ms: u32,

    /// Period to wait for bootloader init after reset, before sending init character
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10"))]
    pub init_delay_ms: u32,

    /// Write memory padding (reference | aligned)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "reference"))]
    pub padding: Padding,

    /// Await an ACK after each write memory payload
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub write_ack: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reset: false,
            reset_ms: 100,
            init_delay_ms: 10,
            padding: Padding::default(),
            write_ack: false,
        }
    }
}

impl Options {
    /// Word padded and acknowledged writes, as accepted by real devices
    pub fn for_write(self) -> Self {
        Self {
            padding: Padding::Aligned,
            write_ack: true,
            ..self
        }
    }
}

/// Device information negotiated by the init handshake
#[derive(Clone, PartialEq, Debug)]
pub struct Session {
    bootloader_version: u8,
    version: u8,
    option1: u8,
    option2: u8,
    product_id: u16,
    capabilities: Capabilities,
}

impl Session {
    /// Bootloader version from the GET response
    pub fn bootloader_version(&self) -> u8 {
        self.bootloader_version
    }

    /// Protocol version from the GET VERSION response
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Read protection option bytes
    pub fn option_bytes(&self) -> (u8, u8) {
        (self.option1, self.option2)
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

pub struct Bootloader<P, D, E> {
    state: State,
    session: Option<Session>,
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Bootloader<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new bootloader instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            state: State::Unstarted,
            session: None,
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    /// Fetch the handshake state
    pub fn state(&self) -> State {
        self.state
    }

    /// Negotiated session, available once the handshake completes
    pub fn session(&self) -> Option<&Session> {
        match self.state {
            State::Ready => self.session.as_ref(),
            _ => None,
        }
    }

    pub fn chip_id(&self) -> Option<u16> {
        self.session().map(|s| s.product_id)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Drop the session and hand the serial port back
    pub fn release(self) -> P {
        self.port
    }

    /// Run the init handshake, replacing any existing session
    pub fn init(&mut self) -> Result<&Session, Error<E>> {
        self.end_session();

        match self.handshake() {
            Ok(s) => {
                info!(
                    "Bootloader v{}.{} (protocol v{}.{}), PID: 0x{:04x}",
                    s.bootloader_version >> 4,
                    s.bootloader_version & 0x0F,
                    s.version >> 4,
                    s.version & 0x0F,
                    s.product_id
                );
                self.state = State::Ready;
                Ok(self.session.get_or_insert(s))
            }
            Err(e) => {
                debug!("Handshake failed in state {:?}: {}", self.state, e);
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<Session, Error<E>> {
        // First, reset device
        if self.options.reset {
            debug!("Resetting device");

            self.port.set_dtr(true)?;
            self.port.set_rts(true)?;

            self.delay.delay_ms(self.options.reset_ms);

            self.port.set_dtr(false)?;
            self.port.set_rts(false)?;

            self.delay.delay_ms(self.options.init_delay_ms);
        }

        // Then, send discovery character
        self.transition(State::AwaitingInitAck);
        self.port.send_byte(UART_DISC)?;
        self.port.await_ack(UART_DISC)?;

        self.transition(State::AwaitingGetResponse);
        let (bootloader_version, capabilities) = self.get()?;

        self.transition(State::AwaitingVersionResponse);
        let op = capabilities
            .get(Capability::GetVersion)
            .ok_or(Error::<E>::Unsupported(Capability::GetVersion))?;
        let (version, option1, option2) = self.get_version(op)?;

        self.transition(State::AwaitingIdResponse);
        let op = capabilities
            .get(Capability::GetId)
            .ok_or(Error::<E>::Unsupported(Capability::GetId))?;
        let product_id = self.get_id(op)?;

        Ok(Session {
            bootloader_version,
            version,
            option1,
            option2,
            product_id,
            capabilities,
        })
    }

    fn transition(&mut self, next: State) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// GET: bootloader version and supported command opcodes
    fn get(&mut self) -> Result<(u8, Capabilities), Error<E>> {
        let op = Command::Get as u8;
        self.port.send_command(op)?;

        let n = self.port.read_byte()? as usize + 1;
        let mut buff = vec![0u8; n];
        self.port.read_exact(&mut buff)?;
        self.port.await_ack(op)?;

        let (capabilities, extra) = Capabilities::parse(&buff[1..]);
        if !extra.is_empty() {
            warn!(
                "Bootloader reports {} more GET bytes than understood, skipping: {:02x?}",
                extra.len(),
                extra
            );
        }

        debug!("Capabilities: {:02x?}", capabilities);

        Ok((buff[0], capabilities))
    }

    /// GET VERSION: protocol version and read protection option bytes
    fn get_version(&mut self, op: u8) -> Result<(u8, u8, u8), Error<E>> {
        self.port.send_command(op)?;

        let mut buff = [0u8; 3];
        self.port.read_exact(&mut buff)?;
        self.port.await_ack(op)?;

        Ok((buff[0], buff[1], buff[2]))
    }

    /// GET ID: product ID
    fn get_id(&mut self, op: u8) -> Result<u16, Error<E>> {
        self.port.send_command(op)?;

        let n = self.port.read_byte()? as usize + 1;
        if n != protocol::PID_LEN {
            error!("Product ID is {} bytes wide, unknown / unsupported device", n);

            // Consume the ID and its ACK so the link stays in step for a later init
            let mut skip = vec![0u8; n];
            self.port.read_exact(&mut skip)?;
            if let Err(e) = self.port.await_ack(op) {
                debug!("Trailing GET ID byte: {}", e);
            }

            return Err(Error::UnsupportedDevice(n));
        }

        let mut buff = [0u8; protocol::PID_LEN];
        self.port.read_exact(&mut buff)?;
        self.port.await_ack(op)?;

        Ok(u16::from_be_bytes(buff))
    }

    /// Opcode for a capability of the current session
    pub(crate) fn opcode(&self, capability: Capability) -> Result<u8, Error<E>> {
        let s = self.session().ok_or(Error::<E>::NotReady)?;
        s.capabilities
            .get(capability)
            .ok_or(Error::Unsupported(capability))
    }

    /// Forget the session, the device needs a fresh handshake
    pub(crate) fn end_session(&mut self) {
        self.session = None;
        self.state = State::Unstarted;
    }
}
