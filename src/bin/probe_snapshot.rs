//! Validate one MCP endpoint and print the report as JSON.
//!
//! Exits 0 when the run produced no findings, 2 when it produced findings, and
//! 1 when the arguments were unusable. With `--snapshot-out` the snapshot part
//! of the report is also written to disk for a later `probe-compare`.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use uiprobe::{HttpConnector, init_tracing, run_validation};

fn main() {
    init_tracing();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse()?;
    let endpoint = Value::String(cli.endpoint);
    let timeout = cli.timeout.map(|raw| timeout_value(&raw));

    let report = run_validation(&HttpConnector, Some(&endpoint), timeout.as_ref())?;

    if let Some(path) = &cli.snapshot_out {
        let snapshot = serde_json::to_string_pretty(&report.snapshot())?;
        fs::write(path, snapshot + "\n")
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
    }

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");
    Ok(report.status)
}

/// Numeric text becomes a JSON number; anything else is passed through as a
/// string so parameter validation reports it.
fn timeout_value(raw: &str) -> Value {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

struct Cli {
    endpoint: String,
    timeout: Option<String>,
    snapshot_out: Option<PathBuf>,
    pretty: bool,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = env::args_os().skip(1);
        let mut endpoint: Option<String> = None;
        let mut timeout: Option<String> = None;
        let mut snapshot_out: Option<PathBuf> = None;
        let mut pretty = false;

        while let Some(arg_os) = args.next() {
            let arg = arg_os
                .into_string()
                .map_err(|_| anyhow::anyhow!("argument is not valid UTF-8"))?;
            match arg.as_str() {
                "--timeout" => timeout = Some(next_value(&mut args, "--timeout")?),
                "--snapshot-out" => {
                    snapshot_out = Some(PathBuf::from(next_value(&mut args, "--snapshot-out")?))
                }
                "--pretty" => pretty = true,
                "--help" | "-h" => usage(0),
                other if other.starts_with("--") => bail!("unknown flag: {other}"),
                other => {
                    if endpoint.is_some() {
                        bail!("only one endpoint may be given");
                    }
                    endpoint = Some(other.to_string());
                }
            }
        }

        let Some(endpoint) = endpoint else {
            usage(1);
        };

        Ok(Cli {
            endpoint,
            timeout,
            snapshot_out,
            pretty,
        })
    }
}

fn next_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<String> {
    args.next()
        .map(|os| {
            os.into_string()
                .map_err(|_| anyhow::anyhow!("value for {flag} is not valid UTF-8"))
        })
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn usage(code: i32) -> ! {
    eprintln!(
        "Usage: probe-snapshot <endpoint> [--timeout MS] [--snapshot-out PATH] [--pretty]\n\
Connects to an MCP server, validates its UI resources and tool linkage, and prints the report JSON."
    );
    std::process::exit(code);
}
