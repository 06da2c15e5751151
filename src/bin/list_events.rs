//! list_events - print the most recent alert snapshots, newest first.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use scene_sentry::SnapshotStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Snapshot directory written by sentryd.
    #[arg(long, env = "SENTRY_SNAPSHOT_DIR", default_value = "events")]
    dir: PathBuf,
    /// Maximum number of events to print.
    #[arg(long, default_value_t = 12)]
    limit: usize,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if !args.dir.is_dir() {
        return Err(anyhow!("{} is not a directory", args.dir.display()));
    }

    let events = SnapshotStore::new(&args.dir, 80).recent_events(args.limit);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("no events in {}", args.dir.display());
        return Ok(());
    }
    for event in &events {
        println!(
            "{}  {:<16} {}",
            event.display_time(),
            event.label,
            event.snapshot.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
