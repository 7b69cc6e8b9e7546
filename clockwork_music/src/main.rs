// Clockwork CLI entry point.
//
// Loads a composition config (or the built-in default), pops its clock tree,
// renders its grammar sequence, and writes the result as JSON and/or MIDI.
//
// Usage:
//   cargo run -p clockwork_music -- [--config piece.json] [--seed N]
//     [--cycles N] [--json out.json] [--midi out.mid]
//
// Set RUST_LOG=clockwork_music=debug to trace generation.

use anyhow::Context;
use clap::Parser;
use clockwork_music::composition::compose;
use clockwork_music::config::CompositionConfig;
use clockwork_music::midi::write_midi;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Composition config (JSON). Uses the built-in piece when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the config's seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of root pops
    #[arg(long)]
    cycles: Option<usize>,

    /// Write the composition (content, control, grammar output) as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write the playable piece as a MIDI file
    #[arg(long)]
    midi: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CompositionConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CompositionConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(cycles) = args.cycles {
        config.cycles = cycles;
    }

    println!("=== Clockwork ===");
    match &args.config {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: built-in"),
    }
    println!("Seed: {}", config.seed);
    println!("Layers: {}", config.layers.len());
    println!("Cycles: {}", config.cycles);
    println!("Tempo: {} BPM", config.tempo_bpm);
    println!();

    let composition = compose(&config)?;

    println!("Clock content: {} events, {} beats", composition.clock.content.len(), composition.clock.duration());
    for timeline in &composition.clock.control.events {
        let active: usize = match timeline {
            clockwork_music::event::Event::Sequential(seq) => {
                seq.simple_events().filter(|s| s.is_active() == Some(true)).count()
            }
            _ => 0,
        };
        println!("  {:<12} {} active spans", timeline.tag().unwrap_or("?"), active);
    }
    if !composition.grammar.is_empty() {
        println!(
            "Grammar: {} rendered symbols, {} beats",
            composition.grammar.len(),
            composition.grammar_duration()
        );
    }

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&composition)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote JSON to {}", path.display());
    }

    if let Some(path) = &args.midi {
        let piece = composition.to_simultaneous();
        write_midi(&piece, config.tempo_bpm, path).with_context(|| format!("writing {}", path.display()))?;
        let seconds = composition.duration().to_f64() * 60.0 / config.tempo_bpm.max(1) as f64;
        println!("Wrote MIDI to {} ({:.0}s)", path.display(), seconds);
    }

    Ok(())
}
