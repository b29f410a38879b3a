use dockhand::cli::commands::{CliArgs, OutputFormatArg};
use dockhand::cli::handlers::{handle_action, handle_probe};
use dockhand::cli::menu;
use dockhand::config::DockhandConfig;
use dockhand::util::logging::{self, LoggingConfig};
use dockhand::VERSION;

use anyhow::Context;
use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("dockhand v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(args: CliArgs) -> anyhow::Result<i32> {
    let mut config = DockhandConfig::default();
    if let Some(file) = &args.file {
        config.definition_file = file.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.to_lowercase();
    }
    config.validate().context("invalid configuration")?;

    match &args.command {
        Some(command) => match command.action() {
            Some(action) => Ok(handle_action(action, command.format(), &config, args.yes).await),
            None => Ok(handle_probe(command.format(), &config).await),
        },
        None => {
            if !menu::stdin_is_terminal() {
                eprintln!(
                    "No terminal attached. Pick an explicit action: \
                     dockhand <probe|rebuild|restart|stop|logs|clean-rebuild>"
                );
                return Ok(2);
            }
            match menu::choose_action() {
                Some(action) => {
                    Ok(handle_action(action, OutputFormatArg::Human, &config, args.yes).await)
                }
                None => {
                    println!("No valid selection; cancelled.");
                    Ok(0)
                }
            }
        }
    }
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        logging::parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("DOCKHAND_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        logging::parse_level(&level_str)
    };

    let use_json = env::var("DOCKHAND_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    logging::init_logging(LoggingConfig {
        level,
        use_json,
        ..Default::default()
    });
}
