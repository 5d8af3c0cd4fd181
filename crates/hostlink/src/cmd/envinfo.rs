use std::collections::BTreeMap;

use hostlink_frame::DEFAULT_MAX_PAYLOAD;
use hostlink_session::{DEFAULT_PIPE_NAME, PROTOCOL_VERSION};
use hostlink_transport::resolve_pipe_path;
use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// Environment variables that change how hostlink behaves.
const WATCHED_ENV: &[&str] = &["HOSTLINK_PIPE", "RUST_LOG"];

#[derive(Serialize)]
struct EnvInfoOutput {
    version: &'static str,
    target: &'static str,
    rust_version: &'static str,
    git_hash: &'static str,
    protocol_version: u32,
    max_payload: usize,
    /// Pipe `run` and `ping` would use without an argument.
    pipe: String,
    pipe_path: Option<String>,
    environment: BTreeMap<&'static str, Option<String>>,
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let environment: BTreeMap<_, _> = WATCHED_ENV
        .iter()
        .map(|&name| (name, std::env::var(name).ok()))
        .collect();
    let pipe = environment
        .get("HOSTLINK_PIPE")
        .cloned()
        .flatten()
        .unwrap_or_else(|| DEFAULT_PIPE_NAME.to_string());

    let output = EnvInfoOutput {
        version: env!("CARGO_PKG_VERSION"),
        target: target_triple(),
        rust_version: option_env!("RUSTC_VERSION").unwrap_or("unknown"),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
        protocol_version: PROTOCOL_VERSION,
        max_payload: DEFAULT_MAX_PAYLOAD,
        pipe_path: resolve_pipe_path(&pipe)
            .ok()
            .map(|path| path.display().to_string()),
        pipe,
        environment,
    };

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut t = table(vec!["KEY", "VALUE"]);
            for (key, value) in rows(&output) {
                t.add_row(vec![key.to_string(), value]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            println!("hostlink environment\n");
            for (key, value) in rows(&output) {
                println!("  {key:<20} {value}");
            }
        }
        OutputFormat::Raw => println!("{}", output.version),
    }
    Ok(SUCCESS)
}

fn rows(output: &EnvInfoOutput) -> Vec<(&str, String)> {
    let mut rows = vec![
        ("version", output.version.to_string()),
        ("target", output.target.to_string()),
        ("rustc", output.rust_version.to_string()),
        ("git hash", output.git_hash.to_string()),
        ("protocol", output.protocol_version.to_string()),
        ("max payload", output.max_payload.to_string()),
        ("pipe", output.pipe.clone()),
        (
            "pipe path",
            output.pipe_path.clone().unwrap_or_else(|| "(invalid)".to_string()),
        ),
    ];
    for (name, value) in &output.environment {
        rows.push((*name, value.clone().unwrap_or_else(|| "(not set)".to_string())));
    }
    rows
}

fn target_triple() -> &'static str {
    option_env!("HOSTLINK_BUILD_TARGET").unwrap_or("unknown-unknown-unknown")
}
