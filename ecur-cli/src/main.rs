//! Command-line client for an `ecur` target: self-test, network statistics,
//! firmware version, power-cycle, and ad-hoc register access.

use std::env;
use std::net::IpAddr;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ecur::Session;

const DEFAULT_IP: &str = "10.10.10.20";

const HBIBAS: u32 = 7 << 19;
const ESCBAS: u32 = 6 << 19;
const LOCBAS: u32 = 3 << 19;
const EVRBAS: u32 = 0;
const CFGBAS: u32 = 1 << 17;

const IREG_A: u32 = (0xf << 1) | 0;
const IREG_D: u32 = (0xf << 1) | 1;

const NET_STAT_LABELS: [&str; 22] = [
    "mbxPkts", "rxpPDOs", "eoeFrgs", "eoeFrms", "eoeDrps", "nMacDrp", "nShtDrp", "nArpHdr",
    "nIP4Hdr", "nUnkHdr", "nArpDrp", "nArpReq", "nIP4Drp", "nPinReq", "nUdpReq", "nUnkIP4",
    "nIP4Mis", "nPinDrp", "nPinHdr", "nUdpMis", "nUdpHdr", "nPktFwd",
];

/// Command-line client for the ecur remote register access protocol.
#[derive(Parser, Debug)]
#[command(name = "ecur", version, about)]
struct Cli {
    /// Target IP address (dot notation). Falls back to ECUR_TARGET_IP, then 10.10.10.20.
    #[arg(short = 'a')]
    ip: Option<String>,

    /// Run the built-in self-test (requires a live connection).
    #[arg(short = 't')]
    test: bool,

    /// Print the target's network statistics.
    #[arg(short = 's')]
    stats: bool,

    /// Increase verbosity; repeatable.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the target's firmware version word.
    #[arg(short = 'V')]
    version: bool,

    /// Power-cycle the target (behind a y/N confirmation).
    #[arg(short = 'P')]
    power_cycle: bool,

    /// Explicit base address, added to -m/-r offsets.
    #[arg(short = 'b')]
    base: Option<String>,

    /// Access width in bits for -m/-r: 1, 2 or 4.
    #[arg(short = 'w', default_value_t = 4)]
    width: u32,

    /// EVR register access: reg[=val]. May be repeated.
    #[arg(short = 'e', action = clap::ArgAction::Append)]
    evr: Vec<String>,

    /// EVR indirect register access: reg[=val]. May be repeated.
    #[arg(short = 'i', action = clap::ArgAction::Append)]
    evr_indirect: Vec<String>,

    /// Generic register access: [range@]offset[=val]. May be repeated.
    #[arg(short = 'r', action = clap::ArgAction::Append)]
    reg: Vec<String>,

    /// Byte-addressed register access: [range@]addr[=val]. May be repeated.
    #[arg(short = 'm', action = clap::ArgAction::Append)]
    mem: Vec<String>,
}

/// Parses an integer the way the protocol's original C tooling did: a `0x`/`0X`
/// prefix selects hex, a bare leading `0` selects octal, anything else is
/// decimal.
fn parse_int(s: &str) -> Result<u32> {
    let s = s.trim();
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse::<u32>()
    };
    value.with_context(|| format!("invalid integer: {s:?}"))
}

fn do_reg(session: &mut Session, addr: u32, value: u32, write: bool, width: u32) -> Result<()> {
    if addr & (width - 1) != 0 {
        bail!("address {addr:#010x} not aligned to width {width}");
    }

    if write {
        println!("Writing {value:#010x} to {addr:#010x}");
        match width {
            1 => session.write8(addr, &[value as u8]),
            2 => session.write16(addr, &[value as u16]),
            _ => session.write32(addr, &[value]),
        }
        .with_context(|| format!("write{width} failed at {addr:#010x}"))?;
    } else {
        let readback = match width {
            1 => {
                let mut d = [0u8; 1];
                let n = session
                    .read8(addr, &mut d)
                    .with_context(|| format!("read8 failed at {addr:#010x}"))?;
                if n < 1 {
                    bail!("read8 returned no data at {addr:#010x}");
                }
                d[0] as u32
            }
            2 => {
                let mut d = [0u16; 1];
                let n = session
                    .read16(addr, &mut d)
                    .with_context(|| format!("read16 failed at {addr:#010x}"))?;
                if n < 1 {
                    bail!("read16 returned no data at {addr:#010x}");
                }
                d[0] as u32
            }
            _ => {
                let mut d = [0u32; 1];
                let n = session
                    .read32(addr, &mut d)
                    .with_context(|| format!("read32 failed at {addr:#010x}"))?;
                if n < 1 {
                    bail!("read32 returned no data at {addr:#010x}");
                }
                d[0]
            }
        };
        println!("{addr:#010x}: {readback:#010x} ({readback})");
    }
    Ok(())
}

/// Parses and executes one `[<range>@]<reg>[=<val>]` access spec.
///
/// `range`, if present, selects one of 8 sub-devices and overrides `base`.
/// `shift` turns a register index into a byte offset for the requested
/// width; `indirect` accesses go through the address/data register pair at
/// offsets `0x1e`/`0x1f` (shift 2) instead of `base | (reg << shift)`.
fn parse_reg_arg(
    session: &mut Session,
    spec: &str,
    base: u32,
    indirect: bool,
    shift: u32,
    width: u32,
) -> Result<()> {
    let (range_base, rest) = match spec.split_once('@') {
        Some((range, rest)) => {
            let range = parse_int(range).context("invalid range")?;
            if range >= 8 {
                bail!("invalid range (must be 0..7)");
            }
            (range << 19, rest)
        }
        None => (base, spec),
    };

    let (reg_str, val_str) = match rest.split_once('=') {
        Some((r, v)) => (r.trim(), Some(v.trim())),
        None => (rest.trim(), None),
    };
    let reg = parse_int(reg_str).context("invalid register")?;

    if indirect {
        let addr_reg = range_base | (IREG_A << shift);
        let data_reg = range_base | (IREG_D << shift);
        do_reg(session, addr_reg, reg, true, 4)?;
        match val_str {
            Some(v) => do_reg(session, data_reg, parse_int(v)?, true, 4),
            None => do_reg(session, data_reg, 0, false, 4),
        }
    } else {
        let addr = range_base | (reg << shift);
        match val_str {
            Some(v) => do_reg(session, addr, parse_int(v)?, true, width),
            None => do_reg(session, addr, 0, false, width),
        }
    }
}

/// The width-dependent shift the original CLI applies to `-r`/`-e`/`-i`
/// register indices (not to `-m`, which is already byte-addressed).
fn index_shift(width: u32) -> u32 {
    match width {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

fn run_self_test(session: &mut Session, hbibas: u32) -> Result<u32> {
    let mut failed = 0u32;
    let a = 0x3064 | hbibas;

    let mut d32 = [0u32; 1];
    match session.read32(a, &mut d32) {
        Ok(n) if n >= 1 => println!("Read result: {:#010x}", d32[0]),
        _ => {
            eprintln!("ecur read32 failed");
            failed += 1;
        }
    }
    if d32[0] != 0x8765_4321 {
        eprintln!("32-bit read FAILED");
        failed += 1;
    }

    let mut d16 = [0u16; 1];
    session.read16(a, &mut d16).context("read16 failed")?;
    println!("Read result: {:#06x}", d16[0]);
    if d16[0] != 0x4321 {
        eprintln!("16-bit read (low) FAILED");
        failed += 1;
    }

    session.read16(a + 2, &mut d16).context("read16 failed")?;
    println!("Read result: {:#06x}", d16[0]);
    if d16[0] != 0x8765 {
        eprintln!("16-bit read (hi) FAILED");
        failed += 1;
    }

    let expected8 = [0x21u8, 0x43, 0x65, 0x87];
    for (i, &exp) in expected8.iter().enumerate() {
        let mut d8 = [0u8; 1];
        session.read8(a + i as u32, &mut d8).context("read8 failed")?;
        println!("Read result: {:#04x}", d8[0]);
        if d8[0] != exp {
            eprintln!("8-bit read [{i}] FAILED");
            failed += 1;
        }
    }

    let base = 0xf80 | hbibas;
    let mut d32a = [0u32; 3];
    {
        let mut batch = session.batch();
        let mut d08 = 0x01u8;
        for i in 0..4u32 {
            d08 += 1;
            batch.queue_write8(base + i, &[d08])?;
        }
        batch.queue_write16(base + 4, &[0xaabb])?;
        batch.queue_write16(base + 6, &[0xccdd])?;
        batch.queue_write32(base + 8, &[0xdeadbeef])?;
        batch.queue_read32(base, &mut d32a, None)?;
        batch.execute().context("batch execute failed")?;
    }
    if d32a[0] != 0x0504_0302 {
        eprintln!("8-bit write / 32-bit array readback failed");
        failed += 1;
    }
    if d32a[1] != 0xccdd_aabb {
        eprintln!("16-bit write / 32-bit array readback failed");
        failed += 1;
    }
    if d32a[2] != 0xdead_beef {
        eprintln!("32-bit write / 32-bit array readback failed");
        failed += 1;
    }

    if failed == 0 {
        println!("Test PASSED");
    } else {
        eprintln!("Test FAILED ({failed} failures)");
    }
    Ok(failed)
}

fn print_net_stats(session: &mut Session, escbas: u32) {
    let mut stats = [0u32; NET_STAT_LABELS.len()];
    match session.read32(escbas, &mut stats) {
        Ok(got) => {
            for (label, value) in NET_STAT_LABELS.iter().zip(stats.iter()).take(got) {
                println!("{label}: {value:5}");
            }
        }
        Err(err) => eprintln!("Error: read32() for statistics failed: {err}"),
    }
}

fn print_version(session: &mut Session, cfgbas: u32) {
    let mut val = [0u32; 1];
    match session.read32(cfgbas + 0x10, &mut val) {
        Ok(n) if n >= 1 => println!("Target Firmware Git Hash: {:#010x}", val[0]),
        Ok(_) => eprintln!("read32() returned no data"),
        Err(err) => eprintln!("read32() failed: {err}"),
    }
}

fn confirm(prompt: &str) -> bool {
    use std::io::Write;
    print!("{prompt} y/[n]? ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().chars().next(), Some('y' | 'Y'))
}

fn resolve_ip(cli_ip: Option<String>) -> Result<IpAddr> {
    let raw = cli_ip
        .or_else(|| env::var("ECUR_TARGET_IP").ok())
        .unwrap_or_else(|| DEFAULT_IP.to_string());
    raw.parse()
        .with_context(|| format!("invalid target IP address: {raw:?}"))
}

fn run(cli: Cli) -> Result<u32> {
    match cli.width {
        1 | 2 | 4 => {}
        other => bail!("-w argument must be 1, 2 or 4 (got {other})"),
    }

    let ip = resolve_ip(cli.ip)?;
    let base = match cli.base {
        Some(raw) => parse_int(&raw)?,
        None => 0,
    };

    let mut session =
        Session::open(ip, None, cli.verbose).with_context(|| format!("unable to connect to target at {ip}"))?;

    let mut test_failed = 0u32;
    if cli.test {
        test_failed = run_self_test(&mut session, HBIBAS)?;
    }

    if cli.power_cycle {
        if confirm("About to power-cycle the target; proceed") {
            println!("<connection might be lost; ignore errors>");
            let _ = session.write16(LOCBAS + 0x8, &[0xdead]);
        }
        return Ok(0);
    }

    if cli.stats {
        print_net_stats(&mut session, ESCBAS);
    }

    if cli.version {
        print_version(&mut session, CFGBAS);
    }

    for spec in &cli.evr {
        let spec = match spec.split_once('@') {
            Some((_, rest)) => {
                eprintln!("Warning: range ('@') ignored for EVR access!");
                rest
            }
            None => spec.as_str(),
        };
        parse_reg_arg(&mut session, spec, EVRBAS, false, index_shift(cli.width), cli.width)?;
    }
    for spec in &cli.evr_indirect {
        let spec = match spec.split_once('@') {
            Some((_, rest)) => {
                eprintln!("Warning: range ('@') ignored for EVR access!");
                rest
            }
            None => spec.as_str(),
        };
        parse_reg_arg(&mut session, spec, EVRBAS, true, index_shift(cli.width), cli.width)?;
    }
    for spec in &cli.reg {
        parse_reg_arg(&mut session, spec, base, false, index_shift(cli.width), cli.width)?;
    }
    for spec in &cli.mem {
        parse_reg_arg(&mut session, spec, base, false, 0, cli.width)?;
    }

    session.close();
    Ok(test_failed)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
