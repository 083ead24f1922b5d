//! Randomized workload driver for the marker tree
//!
//! Runs a seeded mix of add/remove/edit/query operations against a
//! `RangeMarkerTree`, checking structural invariants along the way, and logs
//! a summary. Useful for reproducing a failing seed outside the test suite.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --features dev-bins --bin marker_stress -- --ops 100000 --seed 7

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use markers::{
    BoundaryPolicy, DocumentEvent, MarkerOptions, RangeMarker, RangeMarkerTree, TreeConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "marker_stress")]
#[command(about = "Run a seeded random workload against the marker tree", long_about = None)]
struct Args {
    /// Number of operations to run
    #[arg(long, default_value_t = 10_000)]
    ops: usize,

    /// RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Markers created before the workload starts
    #[arg(long, default_value_t = 100)]
    markers: usize,

    /// Initial buffer length
    #[arg(long, default_value_t = 1_000)]
    doc_len: usize,

    /// Path to a TreeConfig JSON file (default: strong retention)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Check invariants every N operations (0 disables)
    #[arg(long, default_value_t = 100)]
    check_every: usize,
}

#[derive(Debug, Default)]
struct Stats {
    added: usize,
    removed: usize,
    edits: usize,
    queries: usize,
    hits: usize,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn random_options(rng: &mut StdRng) -> MarkerOptions {
    MarkerOptions {
        policy: BoundaryPolicy {
            greedy_to_left: rng.gen_bool(0.3),
            greedy_to_right: rng.gen_bool(0.3),
            sticking_to_right: rng.gen_bool(0.2),
        },
        layer: rng.gen_range(0..3),
        ..MarkerOptions::default()
    }
}

fn add_random(
    tree: &mut RangeMarkerTree,
    rng: &mut StdRng,
    doc_len: usize,
) -> anyhow::Result<RangeMarker> {
    let start = rng.gen_range(0..=doc_len);
    let end = (start + rng.gen_range(0..20)).min(doc_len);
    let options = random_options(rng);
    Ok(tree.add_interval(start, end, options)?)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TreeConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TreeConfig::strong(),
    };
    tracing::info!("running {} ops with seed {} ({:?})", args.ops, args.seed, config);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut tree = RangeMarkerTree::with_config(config);
    let mut doc_len = args.doc_len;
    let mut handles: Vec<RangeMarker> = Vec::new();
    let mut stats = Stats::default();

    for _ in 0..args.markers {
        handles.push(add_random(&mut tree, &mut rng, doc_len)?);
        stats.added += 1;
    }

    for step in 0..args.ops {
        match rng.gen_range(0..10) {
            0..=2 => {
                handles.push(add_random(&mut tree, &mut rng, doc_len)?);
                stats.added += 1;
            }
            3 if !handles.is_empty() => {
                let handle = handles.swap_remove(rng.gen_range(0..handles.len()));
                if tree.remove_interval(handle.id())? {
                    stats.removed += 1;
                }
            }
            4..=6 => {
                let offset = rng.gen_range(0..=doc_len);
                let old_length = rng.gen_range(0..=(doc_len - offset).min(30));
                let new_length = rng.gen_range(0..30);
                tree.retarget(&DocumentEvent::replace(offset, old_length, new_length))?;
                doc_len = doc_len - old_length + new_length;
                handles.retain(RangeMarker::is_valid);
                stats.edits += 1;
            }
            _ => {
                let start = rng.gen_range(0..=doc_len);
                let end = (start + rng.gen_range(0..50)).min(doc_len);
                let mut visited = 0;
                tree.process_overlapping_with(start, end, |_, _| {
                    visited += 1;
                    true
                });
                let iterated = tree.overlapping_iter(start, end).count();
                if visited != iterated {
                    bail!("step {step}: process saw {visited} markers, iterator {iterated}");
                }
                stats.queries += 1;
                stats.hits += visited;
            }
        }

        if args.check_every > 0 && step % args.check_every == 0 {
            tree.check_invariants()
                .with_context(|| format!("invariant check after step {step}"))?;
        }
    }
    tree.check_invariants().context("final invariant check")?;

    tracing::info!(
        "done: {:?}, {} markers in {} nodes, height {}, buffer length {}",
        stats,
        tree.len(),
        tree.node_count(),
        tree.max_height(),
        doc_len
    );
    Ok(())
}
