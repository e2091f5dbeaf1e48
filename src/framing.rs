//! Byte level framing over a blocking serial port

use embedded_hal::serial::{Read, Write};

use crate::protocol::{complement, UART_ACK, UART_NACK};
use crate::Error;

/// Exact-length send / receive primitives and command dispatch.
///
/// Implemented for every `embedded-hal` serial port, each primitive blocks
/// until its byte has been transferred.
pub trait Framing<E>: Read<u8, Error = E> + Write<u8, Error = E> {
    fn send_byte(&mut self, b: u8) -> Result<(), Error<E>> {
        block!(self.write(b))?;
        Ok(())
    }

    fn send_bytes(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            self.send_byte(*b)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Error<E>> {
        let b = block!(self.read())?;
        Ok(b)
    }

    fn read_exact(&mut self, buff: &mut [u8]) -> Result<(), Error<E>> {
        for b in buff.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    /// Read a length byte followed by that many bytes
    fn read_length_prefixed(&mut self) -> Result<Vec<u8>, Error<E>> {
        let n = self.read_byte()?;
        let mut buff = vec![0u8; n as usize];
        self.read_exact(&mut buff)?;
        Ok(buff)
    }

    /// Read one reply byte, expecting an ACK for `opcode`
    fn await_ack(&mut self, opcode: u8) -> Result<(), Error<E>> {
        match self.read_byte()? {
            UART_ACK => Ok(()),
            UART_NACK => {
                error!("Command 0x{:02x} refused by device (NACK)", opcode);
                Err(Error::Nack { opcode })
            }
            reply => {
                error!(
                    "Error sending command 0x{:02x} to device, returned 0x{:02x}",
                    opcode, reply
                );
                Err(Error::InvalidResponse { opcode, reply })
            }
        }
    }

    /// Write a command byte and its checksum, then await the ACK
    fn send_command(&mut self, opcode: u8) -> Result<(), Error<E>> {
        trace!("Sending command 0x{:02x}", opcode);

        self.send_byte(opcode)?;
        self.send_byte(complement(opcode))?;
        self.await_ack(opcode)
    }
}

impl<T, E> Framing<E> for T where T: Read<u8, Error = E> + Write<u8, Error = E> {}
