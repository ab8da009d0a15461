//! Diff two stored snapshots and print the compare report as JSON.
//!
//! `--strict` checks both documents against the bundled snapshot schema
//! before diffing and fails on any violation. Without it, snapshots are read
//! leniently and only shape errors are fatal.

use anyhow::{Result, bail};
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use uiprobe::{SnapshotSchema, compare_snapshots, init_tracing, read_snapshot_file};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse()?;
    let before = read_snapshot_file(&cli.before)?;
    let after = read_snapshot_file(&cli.after)?;

    if cli.strict {
        let schema = SnapshotSchema::load()?;
        for (label, path, value) in [("before", &cli.before, &before), ("after", &cli.after, &after)] {
            let violations = schema.violations(value);
            if !violations.is_empty() {
                bail!(
                    "{label} snapshot {} failed schema validation:\n{}",
                    path.display(),
                    violations.join("\n")
                );
            }
        }
    }

    let report = compare_snapshots(Some(&before), Some(&after))?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");
    Ok(())
}

struct Cli {
    before: PathBuf,
    after: PathBuf,
    strict: bool,
    pretty: bool,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = env::args_os().skip(1);
        let mut before: Option<PathBuf> = None;
        let mut after: Option<PathBuf> = None;
        let mut strict = false;
        let mut pretty = false;

        while let Some(arg_os) = args.next() {
            let arg = arg_os
                .into_string()
                .map_err(|_| anyhow::anyhow!("argument is not valid UTF-8"))?;
            match arg.as_str() {
                "--before" => before = Some(next_path(&mut args, "--before")?),
                "--after" => after = Some(next_path(&mut args, "--after")?),
                "--strict" => strict = true,
                "--pretty" => pretty = true,
                "--help" | "-h" => usage(0),
                other => bail!("unknown argument: {other}"),
            }
        }

        match (before, after) {
            (Some(before), Some(after)) => Ok(Cli {
                before,
                after,
                strict,
                pretty,
            }),
            _ => usage(1),
        }
    }
}

fn next_path(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<PathBuf> {
    args.next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn usage(code: i32) -> ! {
    eprintln!(
        "Usage: probe-compare --before PATH --after PATH [--strict] [--pretty]\n\
Compares two snapshots written by probe-snapshot and prints the diff report JSON."
    );
    std::process::exit(code);
}
