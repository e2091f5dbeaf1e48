//! Memory read and write

use embedded_hal::blocking::delay::DelayMs;

use crate::framing::Framing;
use crate::protocol::{self, complement, Capability, MAX_CHUNK};
use crate::{Bootloader, Error, SerialPort};

/// Check a transfer against the address and length limits of the bootloader
pub(crate) fn check_transfer<E>(address: u32, len: usize) -> Result<(), Error<E>> {
    if address % 4 != 0 {
        return Err(Error::Unaligned(address));
    }
    if len == 0 || len > MAX_CHUNK {
        return Err(Error::InvalidLength(len));
    }
    Ok(())
}

impl<P, D, E> Bootloader<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Read `data.len()` bytes (1 to 256) from a word aligned address
    pub fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error<E>> {
        check_transfer::<E>(address, data.len())?;
        let op = self.opcode(Capability::ReadMemory)?;

        debug!("Reading {} bytes from 0x{:08x}", data.len(), address);

        self.port.send_command(op)?;

        self.port.send_bytes(&protocol::address_frame(address))?;
        self.port.await_ack(op)?;

        let n = (data.len() - 1) as u8;
        self.port.send_byte(n)?;
        self.port.send_byte(complement(n))?;
        self.port.await_ack(op)?;

        self.port.read_exact(data)
    }

    /// Read `len` bytes (1 to 256) into a new buffer
    pub fn read_memory_vec(&mut self, address: u32, len: usize) -> Result<Vec<u8>, Error<E>> {
        let mut data = vec![0u8; len];
        self.read_memory(address, &mut data)?;
        Ok(data)
    }

    /// Write 1 to 256 bytes to a word aligned address.
    ///
    /// The payload is padded with `0xFF` per [`Options::padding`](crate::Options),
    /// the trailing ACK is only awaited when [`Options::write_ack`](crate::Options) is set.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        check_transfer::<E>(address, data.len())?;
        let op = self.opcode(Capability::WriteMemory)?;

        debug!("Writing {} bytes to 0x{:08x}", data.len(), address);

        self.port.send_command(op)?;

        self.port.send_bytes(&protocol::address_frame(address))?;
        self.port.await_ack(op)?;

        let payload = protocol::write_payload(data, self.options.padding);
        self.port.send_bytes(&payload)?;

        if self.options.write_ack {
            self.port.await_ack(op)?;
        }

        Ok(())
    }

    /// Write a contiguous region in `MAX_CHUNK` pieces, calling `progress`
    /// with the size of each chunk once it is sent.
    ///
    /// Use [`Options::for_write`](crate::Options::for_write) so every chunk
    /// is word padded and acknowledged.
    pub fn write_region<F>(
        &mut self,
        address: u32,
        data: &[u8],
        mut progress: F,
    ) -> Result<(), Error<E>>
    where
        F: FnMut(usize),
    {
        if address as u64 + data.len() as u64 > 1 << 32 {
            return Err(Error::OutOfRange {
                address,
                len: data.len(),
            });
        }

        for (i, chunk) in data.chunks(MAX_CHUNK).enumerate() {
            let a = address + (i * MAX_CHUNK) as u32;
            self.write_memory(a, chunk)?;
            progress(chunk.len());
        }

        Ok(())
    }
}
