// movedec - Move VM binary disassembler and decompiler
//
// Loads a Move v1.0 module or script (LIBRAVM or DIEMVM branding) and
// prints its pools, disassembly, lifted IR, or pseudo source.
//
// Usage:
//   movedec input.mv --disasm
//   movedec input.mv --ir --source -v

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use simplelog::{Config, SimpleLogger};
use std::path::PathBuf;

use movedec::{rebuild, render};
use movedis::fmt::{format_instruction, method_header_comment};

#[derive(Parser, Debug)]
#[command(name = "movedec")]
#[command(about = "Move VM binary disassembler and decompiler")]
#[command(version)]
struct Args {
    /// Input Move binary (module or script)
    input: PathBuf,

    /// Dump the decoded pool tables
    #[arg(long)]
    tables: bool,

    /// Print the disassembly listing
    #[arg(long)]
    disasm: bool,

    /// Print the lifted IR
    #[arg(long)]
    ir: bool,

    /// Print a Move-flavored pseudo source
    #[arg(long)]
    source: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    SimpleLogger::init(level, Config::default()).ok();

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    if !movedis::identify(&bytes) {
        anyhow::bail!("{}: not a Move v1.0 binary", args.input.display());
    }

    let unit = movedis::load(bytes).context("failed to load Move binary")?;

    if args.verbose {
        eprintln!("movedec");
        eprintln!("  kind: {:?}", unit.kind());
        eprintln!("  sections: {}", unit.sections().len());
        eprintln!("  segments: {}", unit.segments().len());
        eprintln!("  symbols: {}", unit.symbols().len());
        eprintln!("  functions: {}", unit.internal_functions().count());
    }

    if args.tables {
        print!("{}", unit.describe());
    }

    if args.disasm {
        for func in unit.internal_functions() {
            let base = func.meta.mapped_address;
            println!("{}:", unit.function_name(func.function_handle_index));
            if let Some(header) = method_header_comment(&unit, base) {
                println!("; {header}");
            }
            for insn in &func.code.instructions {
                let address = base + u64::from(insn.offset_in_function);
                println!("  {address:08x}  {}", format_instruction(&unit, address, insn));
            }
            println!();
        }
    }

    if args.ir || args.source {
        let dec = rebuild(&unit);
        if args.verbose {
            eprintln!("  lifted routines: {}", dec.routines.len());
            eprintln!("  lift failures: {}", dec.failures.len());
        }
        for (name, e) in &dec.failures {
            eprintln!("warning: {name}: {e}");
        }
        if args.ir {
            for r in &dec.routines {
                print!("{}", render::render_routine(r, &dec.types, ""));
                println!();
            }
        }
        if args.source {
            print!("{}", render::render_source(&dec));
        }
    }

    Ok(())
}
