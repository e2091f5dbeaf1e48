use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Bootloader, Options, SerialPort};

/// Default bootloader baud rate
pub const DEFAULT_BAUD: usize = 115200;

fn io_kind(e: SerialError) -> IoErrorKind {
    std::io::Error::from(e).kind()
}

impl SerialPort<IoErrorKind> for Serial {
    fn set_rts(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_rts(level).map_err(io_kind)
    }
    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(io_kind)
    }
}

/// Parse a parity name (none, even, odd)
pub fn parse_parity(s: &str) -> Result<Parity, String> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(Parity::ParityNone),
        "even" => Ok(Parity::ParityEven),
        "odd" => Ok(Parity::ParityOdd),
        _ => Err(format!("unknown parity '{}' (expected none, even or odd)", s)),
    }
}

impl Bootloader<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port bootloader instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        parity: Parity,
        options: Options,
    ) -> Result<Self, SerialError> {
        debug!("Opening {} at {} baud ({:?})", port.as_ref().display(), baud, parity);

        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(parity);

        port.0.write_settings(&settings)?;

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}
