use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pfc_raw::perfmon::core::PerfEvtSel;
use pfc_raw::RegisterLayout;

use pfc::events::parser::strtoull;
use pfc::{parse_config, EventCatalog, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "pfc")]
#[command(about = "Direct access to the Intel core performance counters")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows all MSR read/write operations)"
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every event and unit mask the compiler knows
    Events {
        #[arg(help = "Show only this event (any case)")]
        name: Option<String>,
    },

    /// Compile event strings and show the resulting PERFEVTSEL fields
    Parse {
        #[arg(required = true)]
        configs: Vec<String>,
    },

    /// Read an allow-listed diagnostic MSR, or every one this CPU supports
    Msr {
        #[arg(help = "MSR address (decimal, 0x hex or 0 octal)")]
        address: Option<String>,

        #[arg(long, default_value_t = 0)]
        core: usize,
    },

    /// Count events around a small workload, four at a time
    Demo {
        #[arg(long, default_value_t = 0)]
        core: usize,

        #[arg(long, default_value_t = 1_000_000, help = "Workload iterations per batch")]
        iterations: u64,

        #[arg(help = "Event strings (defaults to a handful of front-end and retirement events)")]
        configs: Vec<String>,
    },
}

const DEFAULT_EVENTS: &[&str] = &[
    "uops_issued.any",
    "uops_retired.all",
    "cpu_clk_unhalted.core_clk",
    "br_inst_retired.all_branches",
    "br_misp_retired.all_branches",
    "mem_uops_retired.all_loads",
    "idq.dsb_uops",
    "idq.mite_uops",
];

fn parse_command(configs: &[String]) {
    for s in configs {
        let value = parse_config(s);
        let sel = PerfEvtSel::from_msr_value(value);
        println!("{s}: 0x{value:08x}");
        if value == 0 {
            println!("\t(not recognised, counter stays disabled)");
            continue;
        }
        println!(
            "\tevent 0x{:02x} umask 0x{:02x} cmask {} inv {} edge {} any {} usr {} os {}",
            sel.event_select,
            sel.umask,
            sel.cmask,
            sel.invert as u8,
            sel.edge as u8,
            sel.any_thread as u8,
            sel.usr as u8,
            sel.os as u8
        );
    }
}

fn events_command(name: Option<&str>) -> anyhow::Result<()> {
    let catalog = EventCatalog::haswell();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match name {
        Some(name) => catalog
            .by_name(name)
            .with_context(|| format!("unknown event: {name}"))?
            .dump(&mut out)?,
        None => catalog.dump(&mut out)?,
    }
    Ok(())
}

/// Refuse cores the kernel does not list as online
fn check_online(core: usize) -> anyhow::Result<()> {
    let online = SessionConfig::detect_online_cpus();
    if !online.contains(&core) {
        bail!("CPU {core} is not online (online: {online:?})");
    }
    Ok(())
}

fn parse_address(s: &str) -> anyhow::Result<u32> {
    let (value, used) = strtoull(s.as_bytes());
    if used == 0 || used != s.len() {
        bail!("invalid MSR address: {s}");
    }
    u32::try_from(value).with_context(|| format!("MSR address out of range: {s}"))
}

#[cfg(target_arch = "x86_64")]
mod hw {
    use std::hint::black_box;

    use anyhow::Context;
    use pfc::backend::{HardwarePmu, Sample};
    use pfc::common::capability::HOST_LEAVES;
    use pfc::common::pin_thread;
    use pfc::counters::diag;
    use pfc::sampling::{self, FIXED_SLOTS, GENERAL_SLOTS};
    use pfc::{parse_config, Pfc, SessionConfig};

    pub fn read_msr(config: &SessionConfig, address: Option<u32>) -> anyhow::Result<()> {
        pin_thread(config.core)?;
        let pmu = HardwarePmu::open(config)?;
        let features = HOST_LEAVES.features();

        let addresses: Vec<u32> = match address {
            Some(address) => vec![address],
            None => diag::available(&features).map(|m| m.address).collect(),
        };
        for address in addresses {
            let value = diag::read(&pmu, &features, address)
                .with_context(|| format!("reading MSR 0x{address:x}"))?;
            println!("0x{address:03x} = 0x{value:016x}");
        }
        Ok(())
    }

    fn workload(iterations: u64) -> u64 {
        let mut acc = 0u64;
        for i in 0..iterations {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
        acc
    }

    pub fn demo(config: &SessionConfig, iterations: u64, configs: &[String]) -> anyhow::Result<()> {
        pin_thread(config.core)?;
        let pfc = Pfc::init(config)?;
        let general_start = pfc.capability().general_range().start;

        // Fixed counters in user mode only.
        pfc.write_configs(0, &[2; FIXED_SLOTS])?;

        for batch in configs.chunks(GENERAL_SLOTS) {
            let mut cfgs = [0u64; GENERAL_SLOTS];
            for (cfg, s) in cfgs.iter_mut().zip(batch) {
                *cfg = parse_config(s);
            }
            pfc.write_configs(general_start, &cfgs)?;

            let mut buf = sampling::new_buffer();
            pfc.backend().start(&mut buf);
            let acc = workload(iterations);
            pfc.backend().end(&mut buf);
            pfc.remove_bias(&mut buf, 1);
            tracing::debug!("Workload result {}", acc);

            println!("instructions retired:     {:>16}", buf[0]);
            println!("core cycles:              {:>16}", buf[1]);
            println!("reference cycles:         {:>16}", buf[2]);
            for (s, count) in batch.iter().zip(&buf[FIXED_SLOTS..]) {
                println!("{:<26}{:>16}", format!("{s}:"), count);
            }
            println!();
        }

        Ok(())
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod hw {
    use pfc::SessionConfig;

    pub fn read_msr(_config: &SessionConfig, _address: Option<u32>) -> anyhow::Result<()> {
        anyhow::bail!("MSR access requires an x86_64 processor")
    }

    pub fn demo(_config: &SessionConfig, _iterations: u64, _configs: &[String]) -> anyhow::Result<()> {
        anyhow::bail!("counter sampling requires an x86_64 processor")
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    match args.command {
        Command::Events { name } => events_command(name.as_deref())?,
        Command::Parse { configs } => parse_command(&configs),
        Command::Msr { address, core } => {
            let address = address.as_deref().map(parse_address).transpose()?;
            check_online(core)?;
            hw::read_msr(&SessionConfig::for_core(core), address)?;
        }
        Command::Demo {
            core,
            iterations,
            configs,
        } => {
            let configs = if configs.is_empty() {
                DEFAULT_EVENTS.iter().map(|s| s.to_string()).collect()
            } else {
                configs
            };
            check_online(core)?;
            hw::demo(&SessionConfig::for_core(core), iterations, &configs)?;
        }
    }

    Ok(())
}
