//! `tb16` — command-line interface for the TB16 accelerator simulator.
//!
//! ```text
//! USAGE:
//!   tb16 run [--seed N] [--tokens 0,1,2,...]   Run one block, print the result
//!   tb16 genlut --out <dir>                    Dump LUT/ROM hex files
//!   tb16 link-demo [--seed N]                  Drive a block over the byte link
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tb16_chip::fixed::Q5_10;
use tb16_chip::link::status;
use tb16_chip::rom::{dump_exp_q8_8_hex, ExpLut, GeluRom, InvSqrtSeedLut};
use tb16_model::WeightSet;
use tb16_sim::{CommandPort, TbDevice};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tb16", about = "TB16 transformer-block accelerator CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one transformer block on seeded weights and print the output.
    Run {
        /// Weight seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Comma-separated token ids (default 0..15).
        #[arg(long, value_delimiter = ',')]
        tokens: Option<Vec<u8>>,
    },
    /// Write the exp / GELU / inverse-sqrt-seed tables as hex files.
    Genlut {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,
    },
    /// Drive a full computation through the byte-link protocol.
    LinkDemo {
        /// Weight seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run { seed, tokens } => cmd_run(seed, tokens)?,
        Cmd::Genlut { out } => cmd_genlut(&out)?,
        Cmd::LinkDemo { seed } => cmd_link_demo(seed)?,
    }

    Ok(())
}

fn cmd_run(seed: u64, tokens: Option<Vec<u8>>) -> Result<()> {
    let weights = WeightSet::seeded(16, seed);
    let tokens = tokens.unwrap_or_else(|| (0..16).collect());

    let mut dev = TbDevice::new(weights);
    dev.load_tokens(&tokens).context("loading tokens")?;
    dev.start().context("starting block")?;
    let cycles = dev.run_until_done(1_000_000)?;

    println!("TB16 block: seed={seed} tokens={tokens:?}");
    println!("completed in {cycles} cycles");
    println!();

    for r in 0..dev.dim() {
        let row = dev.read_row(r)?;
        let sum: f32 = row.iter().map(|e| e.to_f32()).sum();
        let (argmax, peak) = row
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.raw())
            .map(|(i, e)| (i, e.to_f32()))
            .unwrap_or((0, 0.0));
        println!("row {r:2}: argmax={argmax:2} peak={peak:.4} sum={sum:.4}");
    }
    Ok(())
}

fn cmd_genlut(out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("creating output directory {}", out.display()))?;

    let files = [
        ("exp_q5_10.hex", ExpLut::shared().dump_hex()),
        ("gelu_q5_10.hex", GeluRom::shared().dump_hex()),
        ("inv_sqrt_seed_q5_10.hex", InvSqrtSeedLut::shared().dump_hex()),
        ("exp_q8_8.hex", dump_exp_q8_8_hex()),
    ];

    for (name, contents) in files {
        let path = out.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_link_demo(seed: u64) -> Result<()> {
    let mut port = CommandPort::new(TbDevice::new(WeightSet::seeded(16, seed)));

    let initial = port.get_status()?;
    println!("status before load: {initial:#04x}");
    if initial & status::READY == 0 {
        bail!("device not ready at power-on");
    }

    let tokens: Vec<Q5_10> = (0i16..16).map(Q5_10::from_raw).collect();
    port.write_row(0, &tokens)?;
    port.start_compute()?;

    let mut polls = 0u32;
    loop {
        let s = port.get_status()?;
        if s & status::DONE != 0 {
            println!("DONE after {polls} status polls");
            break;
        }
        polls += 1;
        if polls > 100_000 {
            bail!("device never reported DONE");
        }
    }

    for r in 0..16u8 {
        let row = port.read_row(r)?;
        let sum: f32 = row.iter().map(|e| e.to_f32()).sum();
        println!("row {r:2}: sum={sum:.4}");
    }
    Ok(())
}
