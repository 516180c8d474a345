use std::collections::BTreeMap;

use anyhow::{bail, Context};
use colored::Colorize;
use nstore::{format_bytes, inspect, Collector, StoreConfig, TypeRegistry};
use nstore_backing::{BackingStore, FileBackingStore};
use nstore_types::{is_root_key, Pid};
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let backing = FileBackingStore::new(&cli.store);
    backing
        .open()
        .await
        .with_context(|| format!("failed to open {}", cli.store.display()))?;
    debug!(store = %cli.store.display(), records = backing.size()?, "opened store file");
    // Application types are unknown here; the collector scans every field.
    let registry = TypeRegistry::new();

    match cli.command {
        Command::Stats => cmd_stats(&backing),
        Command::Keys(args) => cmd_keys(&backing, args),
        Command::Show(args) => cmd_show(&backing, &registry, args),
        Command::Gc(args) => cmd_gc(&backing, &registry, &config, args).await,
        Command::Verify => cmd_verify(&backing, &registry),
        Command::Clear(args) => cmd_clear(&backing, &config, args).await,
    }
}

/// Display group of a key: `roots` for root pids, else the type prefix.
fn type_group(key: &str) -> String {
    if is_root_key(key) {
        return "roots".to_string();
    }
    Pid::parse(key)
        .ok()
        .and_then(|pid| pid.type_prefix().map(str::to_string))
        .unwrap_or_else(|| "other".to_string())
}

fn group_counts(keys: &[String]) -> BTreeMap<String, usize> {
    let mut groups = BTreeMap::new();
    for key in keys {
        *groups.entry(type_group(key)).or_insert(0) += 1;
    }
    groups
}

fn cmd_stats(backing: &dyn BackingStore) -> anyhow::Result<()> {
    let keys = backing.keys()?;
    for (group, count) in group_counts(&keys) {
        println!("  {:<24} {}", group.cyan(), count);
    }
    println!(
        "{} objects, {}",
        keys.len().to_string().bold(),
        format_bytes(backing.total_bytes()?)
    );
    Ok(())
}

fn cmd_keys(backing: &dyn BackingStore, args: KeysArgs) -> anyhow::Result<()> {
    for key in backing.keys()? {
        if let Some(wanted) = &args.type_name {
            if type_group(&key) != *wanted {
                continue;
            }
        }
        if is_root_key(&key) {
            println!("{}", key.yellow());
        } else {
            println!("{key}");
        }
    }
    Ok(())
}

fn cmd_show(
    backing: &dyn BackingStore,
    registry: &TypeRegistry,
    args: ShowArgs,
) -> anyhow::Result<()> {
    let starts = match args.pid {
        Some(pid) => vec![pid],
        None => backing
            .keys()?
            .into_iter()
            .filter(|key| is_root_key(key))
            .collect(),
    };
    for pid in starts {
        print!("{}", inspect::render_tree(backing, registry, &pid, args.depth)?);
    }
    Ok(())
}

async fn cmd_gc(
    backing: &dyn BackingStore,
    registry: &TypeRegistry,
    config: &StoreConfig,
    args: GcArgs,
) -> anyhow::Result<()> {
    let collector = Collector::new(backing, registry);
    if args.dry_run {
        let report = collector.dry_run()?;
        for key in &report.deleted {
            println!("  {} {}", "would delete".yellow(), key);
        }
        println!(
            "{} reachable, {} unreachable",
            report.marked,
            report.deleted.len().to_string().bold()
        );
        return Ok(());
    }

    if config.read_only {
        bail!("store is configured read-only");
    }
    let report = collector.collect().await?;
    println!(
        "{} GC: {} objects removed, {} kept.",
        "✓".green(),
        report.deleted.len().to_string().bold(),
        report.marked
    );
    Ok(())
}

fn cmd_verify(backing: &dyn BackingStore, registry: &TypeRegistry) -> anyhow::Result<()> {
    let report = inspect::verify(backing, registry)?;
    for key in &report.unreadable {
        println!("  {} {}", "unreadable".red(), key);
    }
    for dangling in &report.dangling {
        println!(
            "  {} {} -> {}",
            "dangling".red(),
            dangling.from,
            dangling.missing.yellow()
        );
    }
    if !report.is_clean() {
        bail!(
            "{} unreadable records, {} dangling references",
            report.unreadable.len(),
            report.dangling.len()
        );
    }
    println!("{} {} records, no issues.", "✓".green().bold(), report.records);
    Ok(())
}

async fn cmd_clear(
    backing: &dyn BackingStore,
    config: &StoreConfig,
    args: ClearArgs,
) -> anyhow::Result<()> {
    if !args.yes {
        bail!("refusing to delete every record without --yes");
    }
    if config.read_only {
        bail!("store is configured read-only");
    }
    let count = backing.size()?;
    backing.clear().await?;
    println!("{} Cleared {} records.", "✓".green(), count);
    Ok(())
}
