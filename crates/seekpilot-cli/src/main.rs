//! seekpilot: drive the DeepSeek web chat through Chrome DevTools plugins.

use std::path::PathBuf;

use seekpilot_core::config::DEFAULT_CONFIG_PATH;
use seekpilot_core::{AppConfig, WorkflowConfig};
use tracing::info;

mod commands;
mod logging;

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Workflow(PathBuf),
    List,
    Validate,
    Help,
}

#[derive(Debug, PartialEq)]
struct Args {
    config: PathBuf,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut config = std::env::var("SEEKPILOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a path")?;
                config = PathBuf::from(path);
            }
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.as_slice() {
        [] | ["run"] => Command::Run,
        ["workflow", file] => Command::Workflow(PathBuf::from(*file)),
        ["workflow"] => return Err("Usage: seekpilot workflow <file.json>".into()),
        ["list"] => Command::List,
        ["validate"] => Command::Validate,
        ["help"] | ["--help"] | ["-h"] => Command::Help,
        [other, ..] => {
            return Err(format!(
                "Unknown command: {}. Use 'seekpilot help' for usage.",
                other
            ))
        }
    };
    Ok(Args { config, command })
}

fn print_help() {
    println!("seekpilot - DeepSeek web chat automation over Chrome DevTools");
    println!();
    println!("Usage: seekpilot [--config <path>] [command]");
    println!();
    println!("Commands:");
    println!("  run                      Run enabled plugins, or the config's workflow (default)");
    println!("  workflow <file.json>     Run the workflow in the given file");
    println!("  list                     List built-in plugins and their settings");
    println!("  validate                 Check the configuration");
    println!("  help                     Show this help message");
    println!();
    println!(
        "Chrome must be running with --remote-debugging-port (default {}).",
        seekpilot_core::config::DEFAULT_DEVTOOLS_URL
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };
    if args.command == Command::Help {
        print_help();
        return Ok(());
    }

    let config = AppConfig::load(&args.config)?;
    let guard = logging::init(&config.log_level, config.log_dir.as_deref());
    info!("Config: {}", config.config_path.display());

    let ok = match args.command {
        Command::List => {
            commands::list(&config);
            true
        }
        Command::Validate => commands::validate(&config),
        Command::Run => {
            let workflow = config.workflow.clone();
            commands::run(config, workflow).await?.succeeded()
        }
        Command::Workflow(path) => {
            let workflow = WorkflowConfig::from_file(&path)?;
            commands::run(config, Some(workflow)).await?.succeeded()
        }
        Command::Help => {
            print_help();
            true
        }
    };

    // flush the file log before exiting
    drop(guard);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
