//! Mesh simulator CLI.
//!
//! This binary provides a single entry point for running programs on the
//! mesh model. It performs:
//! 1. **Run:** Load a JSON program image (and optional JSON config), boot
//!    through the command-packet flow, run to halt, and print statistics
//!    plus the final register state of lane (0, 0).

use clap::{Parser, Subcommand};
use std::{fs, process};

use bamlet_core::net::packet::WireFormat;
use bamlet_core::net::switch::PORT_W;
use bamlet_core::sim::program::{ProgramImage, imem_write_packet, start_packet};
use bamlet_core::{Bamlet, Config};

#[derive(Parser, Debug)]
#[command(
    name = "bamsim",
    author,
    version,
    about = "VLIW-SIMT mesh cycle-accurate simulator",
    long_about = "Run a program image on the mesh model.\n\nConfiguration is JSON; defaults apply when omitted.\n\nExample:\n  bamsim run -f program.json --config mesh.json --max-cycles 100000"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a program image to halt.
    Run {
        /// Program image (JSON: encoded bundles + start pc).
        #[arg(short, long)]
        file: String,

        /// Mesh configuration (JSON); defaults when omitted.
        #[arg(long)]
        config: Option<String>,

        /// Cycle limit before the run is declared stalled.
        #[arg(long, default_value_t = 1_000_000)]
        max_cycles: u64,

        /// Boot through command packets injected at lane (0, 0) instead
        /// of preloading instruction memory directly.
        #[arg(long)]
        boot_packets: bool,
    },
}

fn fail(msg: &str) -> ! {
    eprintln!("error: {msg}");
    process::exit(1)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            config,
            max_cycles,
            boot_packets,
        } => run(&file, config.as_deref(), max_cycles, boot_packets),
    }
}

fn run(file: &str, config_path: Option<&str>, max_cycles: u64, boot_packets: bool) {
    let config: Config = match config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("reading {path}: {e}")));
            serde_json::from_str(&text).unwrap_or_else(|e| fail(&format!("parsing {path}: {e}")))
        }
        None => Config::default(),
    };
    let text = fs::read_to_string(file).unwrap_or_else(|e| fail(&format!("reading {file}: {e}")));
    let image: ProgramImage =
        serde_json::from_str(&text).unwrap_or_else(|e| fail(&format!("parsing {file}: {e}")));

    let fmt = WireFormat::new(&config.network);
    let instr_addr_width = config.mesh.instr_addr_width as u32;
    let mut mesh = Bamlet::new(config).unwrap_or_else(|e| fail(&e.to_string()));

    if boot_packets {
        let imem = imem_write_packet(&fmt, instr_addr_width, 0, 0, 0, &image.bundles);
        let start = start_packet(&fmt, instr_addr_width, 0, 0, image.start_pc);
        mesh.inject(0, 0, PORT_W, 0, imem);
        mesh.inject(0, 0, PORT_W, 0, start);
    } else {
        for (addr, words) in image.bundles.iter().enumerate() {
            mesh.imem.write(addr, *words);
        }
        mesh.start(image.start_pc);
    }

    let summary = mesh
        .run_until_halt(max_cycles)
        .unwrap_or_else(|e| fail(&e.to_string()));

    if !summary.halted {
        eprintln!("stalled after {} cycles (program bug?)", summary.cycles);
    }
    for event in &summary.flags {
        eprintln!(
            "flag {} at cycle {} lane ({}, {})",
            event.flag, event.cycle, event.x, event.y
        );
    }

    println!("{}", mesh.stats.report());
    println!();
    let lane = mesh.amlet(0, 0);
    for i in 0..8 {
        println!(
            "A{i:<2} = {:<12} D{i:<2} = {:<12} P{i:<2} = {}",
            lane.regs.a_value(i),
            lane.regs.d_value(i),
            lane.regs.p_value(i),
        );
    }

    if !summary.halted {
        process::exit(2);
    }
}
