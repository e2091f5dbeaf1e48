//! Go, erase and protection commands

use embedded_hal::blocking::delay::DelayMs;

use crate::framing::Framing;
use crate::protocol::{self, Capability, Command};
use crate::{Bootloader, Error, SerialPort};

/// Largest page count accepted by extended erase, `0xFFFx` codes are reserved
pub const MAX_EXTENDED_PAGES: usize = 0xFFF0;

/// Append the XOR checksum of a payload
fn with_xor(mut data: Vec<u8>) -> Vec<u8> {
    let cs = protocol::xor(&data);
    data.push(cs);
    data
}

impl<P, D, E> Bootloader<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Jump to the application whose vector table is at `address`.
    ///
    /// The bootloader is no longer running afterwards, so the session ends.
    pub fn go(&mut self, address: u32) -> Result<(), Error<E>> {
        if address % 4 != 0 {
            return Err(Error::Unaligned(address));
        }
        let op = self.opcode(Capability::Go)?;

        debug!("Jumping to 0x{:08x}", address);

        self.port.send_command(op)?;
        self.port.send_bytes(&protocol::address_frame(address))?;
        self.port.await_ack(op)?;

        self.end_session();
        Ok(())
    }

    fn extended_erase(&self) -> Result<(u8, bool), Error<E>> {
        let op = self.opcode(Capability::Erase)?;
        Ok((op, op == Command::ExtendedErase as u8))
    }

    /// Erase all flash pages
    pub fn erase_global(&mut self) -> Result<(), Error<E>> {
        let (op, extended) = self.extended_erase()?;

        debug!("Global erase (extended: {})", extended);

        self.port.send_command(op)?;
        if extended {
            self.port.send_bytes(&[0xFF, 0xFF, 0x00])?;
        } else {
            self.port.send_bytes(&[0xFF, 0x00])?;
        }
        self.port.await_ack(op)
    }

    /// Erase a set of flash pages.
    ///
    /// Page numbers must fit in a byte unless the device reports extended erase.
    pub fn erase_pages(&mut self, pages: &[u16]) -> Result<(), Error<E>> {
        let (op, extended) = self.extended_erase()?;

        let max = if extended { MAX_EXTENDED_PAGES } else { 255 };
        if pages.is_empty() || pages.len() > max {
            return Err(Error::InvalidLength(pages.len()));
        }

        let payload = if extended {
            let mut buff = Vec::with_capacity(pages.len() * 2 + 3);
            buff.extend_from_slice(&((pages.len() - 1) as u16).to_be_bytes());
            for p in pages {
                buff.extend_from_slice(&p.to_be_bytes());
            }
            with_xor(buff)
        } else {
            let mut buff = Vec::with_capacity(pages.len() + 2);
            buff.push((pages.len() - 1) as u8);
            for p in pages {
                if *p > 0xFF {
                    return Err(Error::InvalidPage(*p));
                }
                buff.push(*p as u8);
            }
            with_xor(buff)
        };

        debug!("Erasing {} pages (extended: {})", pages.len(), extended);

        self.port.send_command(op)?;
        self.port.send_bytes(&payload)?;
        self.port.await_ack(op)
    }

    /// Enable write protection for a set of sectors, the device then resets
    pub fn write_protect(&mut self, sectors: &[u8]) -> Result<(), Error<E>> {
        if sectors.is_empty() || sectors.len() > 255 {
            return Err(Error::InvalidLength(sectors.len()));
        }
        let op = self.opcode(Capability::WriteProtect)?;

        let mut buff = Vec::with_capacity(sectors.len() + 2);
        buff.push((sectors.len() - 1) as u8);
        buff.extend_from_slice(sectors);
        let payload = with_xor(buff);

        debug!("Write protecting sectors {:?}", sectors);

        self.port.send_command(op)?;
        self.port.send_bytes(&payload)?;
        self.port.await_ack(op)?;

        self.end_session();
        Ok(())
    }

    /// Disable write protection for all sectors, the device then resets
    pub fn write_unprotect(&mut self) -> Result<(), Error<E>> {
        self.confirm_and_reset(Capability::WriteUnprotect)
    }

    /// Enable readout protection, the device then resets
    pub fn readout_protect(&mut self) -> Result<(), Error<E>> {
        self.confirm_and_reset(Capability::ReadoutProtect)
    }

    /// Disable readout protection, mass erasing flash. The device then resets
    pub fn readout_unprotect(&mut self) -> Result<(), Error<E>> {
        self.confirm_and_reset(Capability::ReadoutUnprotect)
    }

    /// Commands answered with a second ACK once done, followed by a system reset
    fn confirm_and_reset(&mut self, capability: Capability) -> Result<(), Error<E>> {
        let op = self.opcode(capability)?;

        debug!("{:?}", capability);

        self.port.send_command(op)?;
        self.port.await_ack(op)?;

        info!("{:?} complete, device resetting", capability);
        self.end_session();
        Ok(())
    }
}
