//! Idle-driven code sandbox CLI.
//!
//! Every command works on a sandbox root (`./sandbox` by default) and prints
//! JSON to stdout. Failures map to the stable codes in `exit_codes`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use sandbox::approval::approve;
use sandbox::engine::Engine;
use sandbox::error::{SandboxError, classify};
use sandbox::exit_codes;
use sandbox::io::config::{SandboxConfig, load_config};
use sandbox::io::init::{InitOptions, SandboxPaths, init_sandbox};
use sandbox::io::pending::PendingQueue;
use sandbox::io::run_log::{list_logs, read_log};
use sandbox::logging;
use sandbox::scheduler::{ConfigSource, Scheduler, SchedulerContext};

#[derive(Parser)]
#[command(
    name = "sandbox",
    version,
    about = "Run untrusted code in isolated, time-bounded child processes"
)]
struct Cli {
    /// Sandbox root directory.
    #[arg(long, global = true, default_value = "sandbox")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the sandbox layout and a default `config.toml`.
    Init {
        /// Overwrite an existing config with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a snippet read from FILE (or stdin when omitted or `-`).
    Run {
        file: Option<PathBuf>,
        /// Timeout in seconds (default: exec.snippet_timeout_secs).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Save code from FILE (or stdin) as an approved project.
    Save { name: String, file: Option<PathBuf> },
    /// List approved projects, most recently modified first.
    Projects,
    /// Run an approved project by name.
    Exec {
        name: String,
        /// Timeout in seconds (default: exec.project_timeout_secs).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// File code from FILE (or stdin) for review.
    Submit {
        name: String,
        file: Option<PathBuf>,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// List pending requests (newest first) and disposable tasks.
    Pending,
    /// Approve a pending request by its descriptor file name.
    Approve { descriptor: String },
    /// List recent run logs, or show one by file name.
    Logs {
        file: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run the idle scheduler in the foreground.
    Autorun {
        /// Run a single cycle now, ignoring the idle threshold, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the effective configuration.
    Config,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match classify(err) {
        Some(SandboxError::NotFound { .. }) => exit_codes::NOT_FOUND,
        Some(SandboxError::BadRequest { .. }) => exit_codes::BAD_REQUEST,
        None => exit_codes::INVALID,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = SandboxPaths::new(&cli.root);

    if let Command::Autorun { .. } = cli.command {
        paths.ensure_dirs()?;
        logging::init_with_file(&paths.autorun_log_path);
    } else {
        logging::init();
    }

    if let Command::Init { force } = cli.command {
        let paths = init_sandbox(&cli.root, &InitOptions { force })?;
        print_json(&json!({ "root": paths.root, "config": paths.config_path }))?;
        return Ok(exit_codes::OK);
    }

    paths.ensure_dirs()?;
    let config = load_config(&paths.config_path)?;
    let engine = Engine::new(&paths, config.exec.clone());
    let queue = PendingQueue::new(&paths.pending_dir, config.exec.script_suffix.clone());

    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::Run { file, timeout } => {
            let code = read_source(file.as_deref())?;
            let timeout = timeout.map_or(config.exec.snippet_timeout(), Duration::from_secs);
            let result = engine.run(&code, timeout);
            print_json(&result)?;
            Ok(if result.ok { exit_codes::OK } else { exit_codes::RUN_FAILED })
        }
        Command::Save { name, file } => {
            let code = read_source(file.as_deref())?;
            let path = engine.store().save(&name, &code)?;
            print_json(&json!({ "path": path }))?;
            Ok(exit_codes::OK)
        }
        Command::Projects => {
            print_json(&engine.store().list()?)?;
            Ok(exit_codes::OK)
        }
        Command::Exec { name, timeout } => {
            let timeout = timeout.map_or(config.exec.project_timeout(), Duration::from_secs);
            let result = engine.run_named(&name, timeout)?;
            print_json(&result)?;
            Ok(if result.ok { exit_codes::OK } else { exit_codes::RUN_FAILED })
        }
        Command::Submit { name, file, reason } => {
            let code = read_source(file.as_deref())?;
            let listed = queue.submit(&name, &code, &reason)?;
            print_json(&json!({
                "descriptor": listed.descriptor_path,
                "request": listed.request,
            }))?;
            Ok(exit_codes::OK)
        }
        Command::Pending => {
            let requests: Vec<_> = queue
                .list_requests()?
                .into_iter()
                .map(|listed| {
                    json!({
                        "descriptor": file_name_of(&listed.descriptor_path),
                        "request": listed.request,
                    })
                })
                .collect();
            let tasks: Vec<_> = queue
                .list_tasks()?
                .into_iter()
                .map(|task| task.file_name)
                .collect();
            print_json(&json!({ "requests": requests, "tasks": tasks }))?;
            Ok(exit_codes::OK)
        }
        Command::Approve { descriptor } => {
            let path = approve(&queue, engine.store(), &descriptor)?;
            print_json(&json!({ "path": path }))?;
            Ok(exit_codes::OK)
        }
        Command::Logs { file: Some(file), .. } => {
            print_json(&read_log(&paths.logs_dir, &file)?)?;
            Ok(exit_codes::OK)
        }
        Command::Logs { file: None, limit } => {
            print_json(&list_logs(&paths.logs_dir, limit)?)?;
            Ok(exit_codes::OK)
        }
        Command::Autorun { once } => cmd_autorun(&paths, &config, engine, queue, once),
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).context("serialize config toml")?;
            print!("{rendered}");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_autorun(
    paths: &SandboxPaths,
    config: &SandboxConfig,
    engine: Engine,
    queue: PendingQueue,
    once: bool,
) -> Result<i32> {
    let ctx = Arc::new(SchedulerContext::new());
    let scheduler = Scheduler::new(
        Arc::clone(&ctx),
        Arc::new(engine),
        queue,
        ConfigSource::File(paths.config_path.clone()),
    )?;
    if once {
        let report = scheduler.run_cycle(&config.autorun)?;
        print_json(&report)?;
        return Ok(exit_codes::OK);
    }
    scheduler.run_loop();
    Ok(exit_codes::OK)
}

fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
        }
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("read code from stdin")?;
            Ok(code)
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
