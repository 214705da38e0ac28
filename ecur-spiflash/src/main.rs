//! Dumps a byte range of a target's SPI flash, paging through a 64 KiB
//! window register and bursting up to 256 32-bit words per request.

use std::io::{self, Write};
use std::net::IpAddr;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ecur::Session;

const BURST_COUNT: u32 = 256;
const BURST_SIZE: u32 = BURST_COUNT * 4;

const LD_PAGE_SZ: u32 = 16;
const PAGE_SIZE: u32 = 1 << LD_PAGE_SZ;
const PAGE_MASK: u32 = PAGE_SIZE - 1;
const PAGE_REG: u32 = 0x1_0000;

fn page_no(addr: u32) -> u32 {
    addr >> LD_PAGE_SZ
}

fn in_page(base: u32, addr: u32) -> u32 {
    base + (addr & PAGE_MASK)
}

fn set_page(session: &mut Session, base: u32, addr: u32) -> Result<()> {
    session
        .write32(base + PAGE_REG, &[page_no(addr)])
        .context("failed to select SPI flash page")?;
    Ok(())
}

/// Command-line dumper for a target's SPI flash contents over ecur.
#[derive(Parser, Debug)]
#[command(name = "ecur-spiflash", version, about)]
struct Cli {
    /// Target IP address (dot notation).
    #[arg(short = 'a')]
    ip: String,

    /// Increase verbosity; repeatable.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// SPI memory start address.
    #[arg(short = 'm', default_value_t = 0)]
    addr: u32,

    /// Number of bytes to dump.
    #[arg(short = 'l', default_value_t = 4)]
    len: u32,

    /// SPI flash controller base address.
    #[arg(short = 'b', default_value_t = 0x08_0000)]
    base: u32,
}

fn run(cli: Cli) -> Result<()> {
    let ip: IpAddr = cli
        .ip
        .parse()
        .with_context(|| format!("invalid target IP address: {:?}", cli.ip))?;
    let mut session = Session::open(ip, None, cli.verbose)
        .with_context(|| format!("unable to connect to target at {ip}"))?;

    let mut addr = cli.addr;
    let mut len = cli.len;
    let base = cli.base;

    let mut the_page = page_no(addr);

    let misaligned = {
        let mut n = 0u32;
        while addr & 3 != 0 && len > n {
            n += 1;
            addr += 1;
        }
        n
    };
    addr -= misaligned;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if misaligned > 0 {
        let mut head = vec![0u8; misaligned as usize];
        set_page(&mut session, base, addr)?;
        session
            .read8(in_page(base, addr), &mut head)
            .context("misaligned-head read failed")?;
        addr += misaligned;
        len += misaligned;
        let new_page = page_no(addr);
        if new_page != the_page {
            the_page = new_page;
            set_page(&mut session, base, addr)?;
        }
        out.write_all(&head).context("failed to write output data")?;
    } else {
        set_page(&mut session, base, addr)?;
    }

    let tail = len & 3;
    len -= tail;

    while len > 0 {
        let mut burst = len.min(BURST_SIZE);
        let next_page_addr = (addr & !PAGE_MASK) + PAGE_SIZE;
        if burst > next_page_addr - addr {
            burst = next_page_addr - addr;
        }

        let mut words = vec![0u32; (burst / 4) as usize];
        session
            .read32(in_page(base, addr), &mut words)
            .context("burst read32 failed")?;

        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        out.write_all(&bytes).context("failed to write output data")?;

        addr += burst;
        len -= burst;

        let new_page = page_no(addr);
        if new_page != the_page {
            the_page = new_page;
            set_page(&mut session, base, addr)?;
        }
    }

    if tail > 0 {
        let mut tail_buf = vec![0u8; tail as usize];
        session
            .read8(in_page(base, addr), &mut tail_buf)
            .context("misaligned-tail read failed")?;
        out.write_all(&tail_buf).context("failed to write output data")?;
    }

    session.close();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).init();

    if cli.len == 0 {
        eprintln!("Error: -l length must be nonzero");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Errors were encountered -- '-v' may provide more details: {err:#}");
            ExitCode::FAILURE
        }
    }
}
