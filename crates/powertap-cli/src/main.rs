//! CLI for powertap: live or replayed macOS powermetrics as text or JSON.

mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand};

use commands::OutputArgs;

#[derive(Parser)]
#[command(name = "powertap")]
#[command(about = "Structured power, frequency and residency samples from macOS powermetrics")]
#[command(version = powertap_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run powermetrics and print samples as they arrive (needs root)
    Watch {
        /// Sample interval (e.g. "500ms", "1s", "2m")
        #[arg(long, default_value = "1s", value_parser = commands::parse_duration)]
        interval: Duration,

        /// Path to the powermetrics binary (default: $POWERTAP_POWERMETRICS or /usr/bin/powermetrics)
        #[arg(long)]
        powermetrics: Option<String>,

        /// Comma-separated powermetrics samplers
        #[arg(long, default_value = "default")]
        samplers: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Parse a saved powermetrics capture
    Replay {
        /// Path to the capture file
        file: String,

        /// Sample window the capture was recorded with
        #[arg(long, default_value = "1s", value_parser = commands::parse_duration)]
        window: Duration,

        /// Print every snapshot instead of the final accumulated view
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        output: OutputArgs,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            interval,
            powermetrics,
            samplers,
            output,
        } => {
            commands::init_logging(output.debug);
            commands::watch::run(commands::watch::WatchCommandConfig {
                interval,
                powermetrics_path: powermetrics.as_deref(),
                samplers: &samplers,
                output: &output,
            });
        }
        Commands::Replay {
            file,
            window,
            all,
            output,
        } => {
            commands::init_logging(output.debug);
            commands::replay::run(commands::replay::ReplayCommandConfig {
                file: &file,
                window,
                all,
                output: &output,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_flags() {
        let cli = Cli::try_parse_from([
            "powertap",
            "watch",
            "--interval",
            "500ms",
            "--json",
            "--network",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                interval, output, ..
            } => {
                assert_eq!(interval, Duration::from_millis(500));
                assert!(output.json);
                assert!(output.network);
                assert!(!output.disk);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_replay_rejects_bad_window() {
        assert!(Cli::try_parse_from(["powertap", "replay", "log.txt", "--window", "soon"]).is_err());
    }
}
