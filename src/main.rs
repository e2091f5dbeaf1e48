#[macro_use]
extern crate log;

use std::io::ErrorKind as IoErrorKind;
use std::num::ParseIntError;
use std::path::PathBuf;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::{bail, Context};
use indicatif::ProgressBar;
use linux_embedded_hal::{Delay, Serial};
use serial_core::Parity;

use stm32_uart_loader::linux::{parse_parity, DEFAULT_BAUD};
use stm32_uart_loader::{Bootloader, Options, Padding, Session, MAX_CHUNK};

type Loader = Bootloader<Serial, Delay, IoErrorKind>;

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Serial port parity (none, even, odd)
    #[structopt(long, default_value = "none", parse(try_from_str = parse_parity))]
    parity: Parity,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Cmd {
    /// Show bootloader information and dump the first 256 bytes of memory (default)
    Info,
    /// Read a memory region
    Read {
        /// Start address (word aligned)
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        /// Number of bytes to read
        #[structopt(parse(try_from_str = parse_u32))]
        length: u32,
        /// Write the data to a file instead of printing a hex dump
        #[structopt(long)]
        output: Option<PathBuf>,
    },
    /// Write a raw binary file to a memory region
    Write {
        /// Start address (word aligned)
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        /// File to write
        file: PathBuf,
    },
    /// Jump to the application with the vector table at the given address
    Go {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
    },
    /// Erase the listed flash pages, or all flash if none are given
    Erase {
        #[structopt(parse(try_from_str = parse_u16))]
        pages: Vec<u16>,
    },
    /// Disable write protection
    UnprotectWrite,
    /// Disable readout protection (mass erases flash)
    UnprotectRead,
    /// Enable readout protection
    ProtectRead,
}

fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn parse_u16(s: &str) -> Result<u16, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u16::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(o: Args) -> anyhow::Result<()> {
    if o.baud != DEFAULT_BAUD {
        warn!("Using non-default baud rate {}", o.baud);
    }

    info!("Connecting to serial port");

    // Reference padding is not accepted by real devices, flash writes always pad and check
    let options = match o.cmd {
        Some(Cmd::Write { .. }) => {
            if o.options.padding != Padding::Aligned || !o.options.write_ack {
                info!("Using aligned padding and write acknowledgement for flashing");
            }
            o.options.clone().for_write()
        }
        _ => o.options.clone(),
    };

    let mut p = Bootloader::linux(&o.port, o.baud, o.parity, options)
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    info!("Connecting to bootloader");

    let session = p
        .init()
        .context("Error connecting to bootloader")?
        .clone();

    info!("Bootloader connected!");

    match o.cmd.unwrap_or(Cmd::Info) {
        Cmd::Info => {
            print_session(&session);

            info!("Reading chip memory");
            match p.read_memory_vec(0, MAX_CHUNK) {
                Ok(data) => dump(0, &data),
                Err(e) => error!("Failed to read memory: {}", e),
            }
        }
        Cmd::Read {
            address,
            length,
            output,
        } => {
            let data = read_region(&mut p, address, length)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .with_context(|| format!("Writing {}", path.display()))?;
                    info!("Wrote {} to {}", bytefmt::format(data.len() as u64), path.display());
                }
                None => dump(address, &data),
            }
        }
        Cmd::Write { address, file } => {
            let data =
                std::fs::read(&file).with_context(|| format!("Reading {}", file.display()))?;
            if data.is_empty() {
                bail!("{} is empty", file.display());
            }

            let bar = ProgressBar::new(data.len() as u64);
            p.write_region(address, &data, |n| bar.inc(n as u64))
                .with_context(|| {
                    format!("Writing {} bytes at 0x{:08x}", data.len(), address)
                })?;
            bar.finish();

            info!("Wrote {} to 0x{:08x}", bytefmt::format(data.len() as u64), address);
        }
        Cmd::Go { address } => {
            p.go(address)
                .with_context(|| format!("Jumping to 0x{:08x}", address))?;
            info!("Application started");
        }
        Cmd::Erase { pages } => {
            if pages.is_empty() {
                p.erase_global().context("Global erase")?;
            } else {
                p.erase_pages(&pages).context("Page erase")?;
            }
            info!("Erase complete");
        }
        Cmd::UnprotectWrite => p.write_unprotect().context("Write unprotect")?,
        Cmd::UnprotectRead => p.readout_unprotect().context("Readout unprotect")?,
        Cmd::ProtectRead => p.readout_protect().context("Readout protect")?,
    }

    Ok(())
}

fn read_region(p: &mut Loader, address: u32, length: u32) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length as usize);
    let bar = ProgressBar::new(u64::from(length));

    let end = address
        .checked_add(length)
        .context("Region exceeds the 32-bit address space")?;

    let mut a = address;
    while a < end {
        let n = (end - a).min(MAX_CHUNK as u32) as usize;
        let chunk = p
            .read_memory_vec(a, n)
            .with_context(|| format!("Reading {} bytes at 0x{:08x}", n, a))?;
        data.extend_from_slice(&chunk);
        bar.inc(n as u64);
        a += n as u32;
    }
    bar.finish();

    Ok(data)
}

fn print_session(s: &Session) {
    let (option1, option2) = s.option_bytes();

    println!("Bootloader version: 0x{:02x}", s.bootloader_version());
    println!("Protocol version:   0x{:02x}", s.version());
    println!("Option bytes:       0x{:02x} 0x{:02x}", option1, option2);
    println!("Product ID:         0x{:04x}", s.product_id());
    println!("Commands:");
    for (c, op) in s.capabilities().iter() {
        let default = c.default_command() as u8;
        if op == default {
            println!("  {:18} 0x{:02x}", format!("{:?}", c), op);
        } else {
            println!("  {:18} 0x{:02x} (default 0x{:02x})", format!("{:?}", c), op, default);
        }
    }
}

fn dump(address: u32, data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        println!("{:08x}  {}", address + (i * 16) as u32, hex::encode(row));
    }
}
