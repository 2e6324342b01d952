//! tile-push-emu: tile-to-tile DMA push experiment on an emulated manycore grid

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use tile_push_emu::config::Config;
use tile_push_emu::device::TileGrid;
use tile_push_emu::emu::Harness;
use tile_push_emu::testing::verify_payload;

fn usage() {
    println!("Usage: tile-push-emu [--dump-state] [--sample-config] [--timeout-ms N] [--latency N]");
    println!();
    println!("Configuration is read from ./tile-push.toml, ~/.config/tile-push/config.toml");
    println!("and TILE_PUSH_* environment variables. Flags override configuration.");
}

fn flag_value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> anyhow::Result<u64> {
    let raw = args
        .next()
        .with_context(|| format!("{} requires a value", flag))?;
    raw.parse()
        .with_context(|| format!("invalid value for {}: {:?}", flag, raw))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut dump_state = false;
    let mut timeout_ms = None;
    let mut latency = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dump-state" => dump_state = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--timeout-ms" => timeout_ms = Some(flag_value(&mut iter, "--timeout-ms")?),
            "--latency" => {
                let cycles = flag_value(&mut iter, "--latency")?;
                latency = Some(u32::try_from(cycles).context("--latency is too large")?);
            }
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            other => {
                usage();
                bail!("unknown argument: {}", other);
            }
        }
    }

    let config = Config::get();
    let mut options = config.harness_options();
    if let Some(ms) = timeout_ms {
        options.completion_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(cycles) = latency {
        options.dma_latency_cycles = cycles;
    }

    let harness = Harness::new(TileGrid::new(config.grid_arch()), options);
    let report = harness.run().context("harness run failed")?;
    report.print_summary();

    if dump_state {
        println!();
        harness.grid().print_summary();
    }

    if let Some(e) = report.failure() {
        bail!("transfer failed: {}", e);
    }

    let payload = verify_payload(harness.grid(), &options.transfer).context("payload check failed")?;
    println!();
    println!(
        "Payload: {} words checked, {} mismatched, write-back = {}",
        payload.words_checked,
        payload.mismatches.len(),
        payload.write_back
    );
    if let Some(m) = payload.first_mismatch() {
        println!(
            "  first mismatch at word {}: expected 0x{:08X}, got 0x{:08X}",
            m.index, m.expected, m.actual
        );
    }

    if !report.is_success() || !payload.passed() {
        bail!("push experiment FAILED");
    }
    println!("PASSED");
    Ok(())
}
