//! Protocol constants, opcodes and checksum helpers (AN3155)

use core::fmt;
use core::str::FromStr;

/// Init character, sent once to let the bootloader detect the baud rate
pub const UART_DISC: u8 = 0x7F;

pub const UART_ACK: u8 = 0x79;
pub const UART_NACK: u8 = 0x1F;

/// Largest single read or write transfer
pub const MAX_CHUNK: usize = 256;

/// Width of the product ID returned by GET ID
pub const PID_LEN: usize = 2;

/// Default command opcodes.
///
/// Only `Get` is sent as-is, every other command uses the opcode the device
/// reports in the GET response (see [`Capabilities`]).
#[derive(Copy, Debug, PartialEq, Clone)]
pub enum Command {
    /// Fetch bootloader version and allowed commands
    Get = 0x00,

    /// Gets the bootloader version and the Read Protection status of the Flash memory.
    GetVersionReadStatus = 0x01,

    /// Gets the chip ID
    GetId = 0x02,

    /// Reads up to 256 bytes of memory starting from an address specified by the application.
    ReadMemory = 0x11,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to the RAM or Flash memory starting from an address specified by the application.
    WriteMemory = 0x31,

    /// Erases from one to all the Flash memory pages.
    Erase = 0x43,

    /// Erases from one to all the Flash memory pages using two byte addressing mode (available only for v3.0 USART bootloader versions and above).
    ExtendedErase = 0x44,

    /// Enables the write protection for some sectors.
    WriteProtect = 0x63,

    /// Disables the write protection for all Flash memory sectors
    WriteUnprotect = 0x73,

    /// Enables the read protection
    ReadoutProtect = 0x82,

    /// Disables the read protection.
    ReadoutUnprotect = 0x92,
}

/// Logical operations, in the order the GET response lists their opcodes
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Capability {
    Get,
    GetVersion,
    GetId,
    ReadMemory,
    Go,
    WriteMemory,
    /// Reported as either `Erase` or `ExtendedErase`
    Erase,
    WriteProtect,
    WriteUnprotect,
    ReadoutProtect,
    ReadoutUnprotect,
}

impl Capability {
    pub const COUNT: usize = 11;

    pub const ALL: [Capability; Capability::COUNT] = [
        Capability::Get,
        Capability::GetVersion,
        Capability::GetId,
        Capability::ReadMemory,
        Capability::Go,
        Capability::WriteMemory,
        Capability::Erase,
        Capability::WriteProtect,
        Capability::WriteUnprotect,
        Capability::ReadoutProtect,
        Capability::ReadoutUnprotect,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// AN3155 opcode for this capability, devices may report another
    pub fn default_command(self) -> Command {
        match self {
            Capability::Get => Command::Get,
            Capability::GetVersion => Command::GetVersionReadStatus,
            Capability::GetId => Command::GetId,
            Capability::ReadMemory => Command::ReadMemory,
            Capability::Go => Command::Go,
            Capability::WriteMemory => Command::WriteMemory,
            Capability::Erase => Command::Erase,
            Capability::WriteProtect => Command::WriteProtect,
            Capability::WriteUnprotect => Command::WriteUnprotect,
            Capability::ReadoutProtect => Command::ReadoutProtect,
            Capability::ReadoutUnprotect => Command::ReadoutUnprotect,
        }
    }
}

/// Opcodes reported by the device for each [`Capability`]
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Capabilities {
    opcodes: [Option<u8>; Capability::COUNT],
}

impl Capabilities {
    /// Map the opcode list of a GET response (version byte already removed)
    /// onto the capability schema.
    ///
    /// Returns the capabilities and whatever trailing bytes the schema does
    /// not cover. Fewer opcodes than capabilities leaves the tail absent.
    pub fn parse(opcodes: &[u8]) -> (Self, &[u8]) {
        let mut c = Self::default();

        let known = opcodes.len().min(Capability::COUNT);
        for (slot, op) in c.opcodes.iter_mut().zip(&opcodes[..known]) {
            *slot = Some(*op);
        }

        (c, &opcodes[known..])
    }

    /// Opcode for a capability, if the device reported one
    pub fn get(&self, capability: Capability) -> Option<u8> {
        self.opcodes[capability.index()]
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.get(capability).is_some()
    }

    /// Reported capabilities in schema order
    pub fn iter(&self) -> impl Iterator<Item = (Capability, u8)> + '_ {
        Capability::ALL
            .iter()
            .filter_map(move |c| self.get(*c).map(|op| (*c, op)))
    }
}

/// Checksum byte following a single command byte
pub const fn complement(b: u8) -> u8 {
    0xFF - b
}

/// XOR checksum of a multi-byte payload
pub fn xor(data: &[u8]) -> u8 {
    data.iter().fold(0, |cs, b| cs ^ b)
}

/// Convert between host and wire (big-endian) order.
///
/// A no-op on big-endian targets, a byte reversal on little-endian ones.
pub fn swap_u32(v: u32) -> u32 {
    v.to_be()
}

/// Wire representation of an address
pub fn to_wire(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Address block shared by read, write and go: four address bytes and
/// their XOR checksum
pub fn address_frame(address: u32) -> [u8; 5] {
    let a = to_wire(address);
    [a[0], a[1], a[2], a[3], xor(&a)]
}

/// Padding applied to write-memory payloads
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Padding {
    /// Length byte `len - 1 + len % 4`, followed by `len % 4 + 1` pad bytes
    Reference,
    /// Pad to the next word boundary, length byte `padded_len - 1`
    Aligned,
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Reference
    }
}

impl Padding {
    /// Length byte sent ahead of `len` data bytes, also the checksum seed
    pub fn length_byte(self, len: usize) -> u8 {
        match self {
            Padding::Reference => (len + len % 4).wrapping_sub(1) as u8,
            Padding::Aligned => ((len + 3) & !3).wrapping_sub(1) as u8,
        }
    }

    /// Number of `0xFF` bytes appended after `len` data bytes
    pub fn pad_len(self, len: usize) -> usize {
        match self {
            Padding::Reference => len % 4 + 1,
            Padding::Aligned => (4 - len % 4) % 4,
        }
    }
}

impl FromStr for Padding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Ok(Padding::Reference),
            "aligned" => Ok(Padding::Aligned),
            _ => Err(format!("unknown padding '{}' (expected reference or aligned)", s)),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::Reference => write!(f, "reference"),
            Padding::Aligned => write!(f, "aligned"),
        }
    }
}

/// Write-memory body: length byte, data, padding and the running checksum
pub fn write_payload(data: &[u8], padding: Padding) -> Vec<u8> {
    let pad = padding.pad_len(data.len());
    let mut buff = Vec::with_capacity(data.len() + pad + 2);

    buff.push(padding.length_byte(data.len()));
    buff.extend_from_slice(data);
    buff.resize(buff.len() + pad, 0xFF);

    let cs = xor(&buff);
    buff.push(cs);

    buff
}
