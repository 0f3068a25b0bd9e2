// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Command line access to L2N and LVS databases.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netex::l2n::LayoutToNetlist;
use netex::log::Severity;
use netex::lvs::{create_from_file, Database, Status};
use netex::netlist::expanded_name;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "netex", about = "netex: inspect, convert and probe extracted netlist databases")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print layers, circuits and log summary of an L2N or LVS database.
    Info(InfoArgs),

    /// Read a database and write it again.
    ///
    /// The format (L2N or LVS) is kept. Use --short for the compact key set.
    Convert(ConvertArgs),

    /// Find the net touching a point on a layer.
    Probe(ProbeArgs),
}

#[derive(Parser)]
struct InfoArgs {
    /// L2N or LVS database. The format is detected from the first line.
    input: PathBuf,

    /// Print the summary as JSON.
    #[clap(long)]
    json: bool,
}

#[derive(Parser)]
struct ConvertArgs {
    input: PathBuf,

    output: PathBuf,

    /// Write one-letter keys without indentation or comments.
    #[clap(long)]
    short: bool,
}

#[derive(Parser)]
struct ProbeArgs {
    input: PathBuf,

    /// Layer name as listed by `netex info`.
    layer: String,

    /// X coordinate in micrometers, top cell coordinates.
    #[clap(allow_hyphen_values = true)]
    x: f64,

    /// Y coordinate in micrometers, top cell coordinates.
    #[clap(allow_hyphen_values = true)]
    y: f64,
}

#[derive(Serialize)]
struct CircuitSummary {
    name: String,
    nets: usize,
    pins: usize,
    devices: usize,
    subcircuits: usize,
}

#[derive(Serialize)]
struct LvsSummary {
    circuit_pairs: usize,
    matched: usize,
    mismatched: usize,
    skipped: usize,
}

#[derive(Serialize)]
struct Summary {
    format: &'static str,
    description: String,
    generator: String,
    dbu: f64,
    top: Option<String>,
    layers: Vec<String>,
    global_nets: Vec<String>,
    circuits: Vec<CircuitSummary>,
    errors: usize,
    warnings: usize,
    lvs: Option<LvsSummary>,
}

fn summarize(db: &Database) -> Summary {
    let l2n = db.l2n();
    let top = l2n
        .internal_top_cell()
        .ok()
        .and_then(|ci| l2n.internal_layout().ok().map(|ly| ly.cell_name(ci).to_string()));
    let circuits = l2n
        .netlist()
        .map(|nl| {
            nl.top_down_order()
                .into_iter()
                .map(|c| {
                    let c = nl.circuit(c);
                    CircuitSummary {
                        name: c.name.clone(),
                        nets: c.num_nets(),
                        pins: c.pins().len(),
                        devices: c.devices().len(),
                        subcircuits: c.subcircuits().len(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let count = |s: Severity| l2n.log_entries().iter().filter(|e| e.severity == s).count();
    let lvs = match db {
        Database::Lvs(lvs) => lvs.cross_reference().map(|x| LvsSummary {
            circuit_pairs: x.circuits.len(),
            matched: x.count(Status::Match) + x.count(Status::MatchWithWarning),
            mismatched: x.count(Status::NoMatch) + x.count(Status::Mismatch),
            skipped: x.count(Status::Skipped),
        }),
        Database::L2n(_) => None,
    };
    Summary {
        format: if db.is_lvs() { "lvs" } else { "l2n" },
        description: l2n.description.clone(),
        generator: l2n.generator.clone(),
        dbu: l2n.dbu(),
        top,
        layers: l2n.layer_names(),
        global_nets: l2n.connectivity().global_net_names().to_vec(),
        circuits,
        errors: count(Severity::Error),
        warnings: count(Severity::Warning),
        lvs,
    }
}

fn cmd_info(args: InfoArgs) -> Result<(), String> {
    let db = create_from_file(&args.input).map_err(|e| e.to_string())?;
    let s = summarize(&db);
    if args.json {
        let text = serde_json::to_string_pretty(&s).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }
    println!("{} database {}", s.format.to_uppercase(), args.input.display());
    if !s.description.is_empty() {
        println!("  description: {}", s.description);
    }
    if let Some(top) = &s.top {
        println!("  top cell: {} (dbu {})", top, s.dbu);
    }
    println!("  layers: {}", s.layers.join(" "));
    if !s.global_nets.is_empty() {
        println!("  global nets: {}", s.global_nets.join(" "));
    }
    println!("  circuits:");
    for c in &s.circuits {
        println!(
            "    {:<24} {:>6} nets {:>5} pins {:>6} devices {:>5} subcircuits",
            c.name, c.nets, c.pins, c.devices, c.subcircuits
        );
    }
    println!("  log: {} errors, {} warnings", s.errors, s.warnings);
    if let Some(lvs) = &s.lvs {
        println!(
            "  lvs: {} circuit pairs, {} matched, {} mismatched, {} skipped",
            lvs.circuit_pairs, lvs.matched, lvs.mismatched, lvs.skipped
        );
    }
    Ok(())
}

fn cmd_convert(args: ConvertArgs) -> Result<(), String> {
    let db = create_from_file(&args.input).map_err(|e| e.to_string())?;
    db.save(&args.output, args.short).map_err(|e| e.to_string())?;
    clilog::info!(
        "converted {} to {} ({} keys)",
        args.input.display(),
        args.output.display(),
        if args.short { "short" } else { "long" }
    );
    Ok(())
}

fn probe(l2n: &LayoutToNetlist, args: &ProbeArgs) -> Result<(), String> {
    let layer = l2n.layer_by_name(&args.layer).ok_or_else(|| format!("no layer named '{}'", args.layer))?;
    let hit = l2n.probe_net_um(&layer, args.x, args.y).map_err(|e| e.to_string())?;
    let Some(hit) = hit else {
        println!("no net at ({}, {}) on {}", args.x, args.y, args.layer);
        return Ok(());
    };
    let nl = l2n.netlist().ok_or("database holds no netlist")?;
    let circuit = nl.circuit(hit.circuit);
    let mut path: Vec<String> = Vec::new();
    for &(c, sc) in &hit.path {
        let sub = circuit_subcircuit_name(l2n, c, sc);
        path.push(sub);
    }
    let net = circuit.net_expanded_name(hit.net);
    if path.is_empty() {
        println!("{}:{}", circuit.name, net);
    } else {
        println!("{}:{} (via {})", circuit.name, net, path.join("/"));
    }
    Ok(())
}

fn circuit_subcircuit_name(l2n: &LayoutToNetlist, c: usize, sc: usize) -> String {
    let Some(nl) = l2n.netlist() else {
        return String::new();
    };
    match nl.circuit(c).subcircuit(sc) {
        Some(s) => format!("{}:{}", nl.circuit(s.circuit).name, expanded_name(&s.name, sc)),
        None => expanded_name("", sc),
    }
}

fn cmd_probe(args: ProbeArgs) -> Result<(), String> {
    let db = create_from_file(&args.input).map_err(|e| e.to_string())?;
    probe(db.l2n(), &args)
}

fn main() {
    clilog::init_stderr_color_debug();
    let cli = Cli::parse();

    let r = match cli.command {
        Commands::Info(args) => cmd_info(args),
        Commands::Convert(args) => cmd_convert(args),
        Commands::Probe(args) => cmd_probe(args),
    };
    if let Err(e) = r {
        clilog::error!("{}", e);
        std::process::exit(1);
    }
}
