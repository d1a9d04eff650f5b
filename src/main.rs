//! Benchflow - main entry point
//!
//! Thin dispatch over the library: load configuration, wire the run
//! context together, and map failures to a non-zero exit.

use anyhow::Context as _;
use serde_json::{json, Map};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

use benchflow::cli::{CalCommands, Cli, Commands};
use benchflow::engine::{self, Context};
use benchflow::instrument::build_instruments;
use benchflow::sequence::Sequence;
use benchflow::session::{BenchConfig, Session};
use benchflow::transforms::TransformRegistry;
use benchflow::CalibrationStore;

/// Initialize the tracing subscriber (RUST_LOG overrides the default).
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse_args();
    if let Err(err) = dispatch(cli) {
        error!("{err:#}");
        eprintln!("✗ {err:#}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { sequence, bench, out, cal_dir } => cmd_run(&sequence, &bench, &out, &cal_dir),
        Commands::Validate { sequence } => cmd_validate(&sequence),
        Commands::ListSequences { dir } => cmd_list_sequences(&dir),
        Commands::ListInstruments { bench } => cmd_list_instruments(&bench),
        Commands::Cal { command } => cmd_cal(command),
    }
}

fn cmd_run(sequence: &Path, bench: &Path, out: &Path, cal_dir: &Path) -> anyhow::Result<()> {
    let bench_cfg = BenchConfig::from_toml(bench)?;
    let sequence = Sequence::load(sequence)?;
    let mut session = Session::new(bench_cfg, out, cal_dir)?;
    let instruments = build_instruments(&session.bench)?;

    // Domain transform sets are registered by deployment-specific builds;
    // an empty registry passes payloads through.
    let transforms = TransformRegistry::new();

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupt.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("failed to install interrupt handler")?;
    }

    println!(
        "Running '{}' on bench '{}' (fail_policy={}, interrupt_policy={})",
        sequence.name, session.bench.name, sequence.fail_policy, sequence.interrupt_policy
    );

    let cal_cache = session.cal_store.as_dict();
    let run_result = {
        let mut ctx = Context {
            instruments,
            writer: &mut session.writer,
            cal_store: &mut session.cal_store,
            cal_cache,
            transforms: &transforms,
            fail_policy: sequence.fail_policy,
            interrupt_policy: sequence.interrupt_policy,
            shutdown_order: sequence.shutdown_order.clone(),
            interrupt,
        };
        engine::run(&sequence, &mut ctx)
    };

    // Streams are finalized and the manifest recorded even for failed runs;
    // a partial result file is still evidence.
    session.close()?;
    let mut extra = Map::new();
    extra.insert("test".to_string(), json!(sequence.name));
    extra.insert("out".to_string(), json!(out.display().to_string()));
    session.record_manifest(extra)?;

    run_result?;
    info!(out = %out.display(), "run complete");
    println!("✓ Run complete. Results at {}", out.display());
    Ok(())
}

fn cmd_validate(sequence: &Path) -> anyhow::Result<()> {
    let sequence = Sequence::load(sequence)?;
    println!("✓ Sequence '{}' is valid ({} top-level steps)", sequence.name, sequence.steps.len());
    Ok(())
}

fn cmd_list_sequences(dir: &Path) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("no sequence directory at {}", dir.display()))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml" | "yml")
            )
        })
        .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    for name in names {
        println!("- {name}");
    }
    Ok(())
}

fn cmd_list_instruments(bench: &Path) -> anyhow::Result<()> {
    let bench_cfg = BenchConfig::from_toml(bench)?;
    let instruments = build_instruments(&bench_cfg)?;
    for (name, handle) in &instruments {
        println!("- {name} ({}): {}", handle.kind(), handle.methods().join(", "));
    }
    Ok(())
}

fn open_store(bench: &Path, cal_dir: &Path) -> anyhow::Result<(String, CalibrationStore)> {
    let bench_cfg = BenchConfig::from_toml(bench)?;
    let store = CalibrationStore::open(
        cal_dir.join(format!("{}.json", bench_cfg.name)),
        Some(&bench_cfg.name),
    )?;
    Ok((bench_cfg.name, store))
}

fn cmd_cal(command: CalCommands) -> anyhow::Result<()> {
    match command {
        CalCommands::Show { bench, cal_dir, name } => {
            let (bench_name, store) = open_store(&bench, &cal_dir)?;
            match name {
                Some(name) => match store.get(&name) {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    None => anyhow::bail!("no calibration '{name}' for bench '{bench_name}'"),
                },
                None => {
                    for name in store.names() {
                        let value = store.get(&name).unwrap_or_default();
                        println!("- {name} = {value}");
                    }
                }
            }
        }
        CalCommands::History { bench, cal_dir, name } => {
            let (_, store) = open_store(&bench, &cal_dir)?;
            for entry in store.history(&name) {
                println!("{}  {}", entry.ts, entry.value);
            }
        }
        CalCommands::Delete { bench, cal_dir, name } => {
            let (bench_name, mut store) = open_store(&bench, &cal_dir)?;
            store.delete(&name)?;
            store.save()?;
            println!("✓ Deleted calibration '{name}' from bench '{bench_name}'");
        }
    }
    Ok(())
}
