use symrun_core::campaign::{CampaignRequest, campaign_output_dir};
use symrun_core::config::SymrunConfig;
use symrun_core::registry::ProgramRegistry;
use symrun_core::replay::ReplayRunner;
use symrun_core::sandbox;
use symrun_core::strategy::SearchStrategy;
use symrun_core::triage::{UbsanExtractor, triage};
use symrun_core::variant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Generate the guided-search variant of a program's bitcode artifact.
    Gen { program: String },
    /// Run one exploration campaign for a (program, strategy) pair.
    Run {
        program: String,
        strategy: SearchStrategy,
    },
    /// Replay a campaign's recorded test cases against the instrumented
    /// artifact and deduplicate the sanitizer diagnostics.
    Triage {
        program: String,
        strategy: SearchStrategy,
    },
}

fn load_config(cli_path: Option<PathBuf>) -> Result<SymrunConfig, anyhow::Error> {
    match cli_path {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            SymrunConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("symrun.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                SymrunConfig::load_from_file(&default_config_path)
            } else {
                println!(
                    "No config file specified and default 'symrun.toml' not found, using built-in defaults."
                );
                Ok(SymrunConfig::default())
            }
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let config = load_config(cli.config_file)?;

    let registry = ProgramRegistry::load(&config.paths.registry_file)
        .context("loading the program registry")?;

    match cli.mode {
        Mode::Gen { program } => {
            let program = registry.resolve(&program)?.clone();
            let artifact = variant::generate(
                &config.paths.opt,
                &config.paths.pass_library,
                &config.paths.variant_staging_root,
                &config.paths.stats_root,
                &program,
            )
            .context("generating the guided variant")?;
            println!("Guided variant staged at {artifact:?}");
        }
        Mode::Run { program, strategy } => {
            let program = registry.resolve(&program)?.clone();
            // cgs explores the transformed artifact; whether `gen` actually
            // ran (or was interrupted mid-write) is not checked here.
            let artifact = if strategy.is_guided() {
                variant::guided_artifact_path(&config.paths.variant_staging_root, &program.name)
            } else {
                program.primary_artifact.clone()
            };

            let sandbox = sandbox::provision(
                &config.paths.sandbox_root,
                &config.paths.sandbox_template,
                &config.paths.env_file,
                strategy,
                &program.name,
            )
            .context("provisioning the campaign sandbox")?;

            let request =
                CampaignRequest::from_config(&config, program, strategy, artifact, &sandbox);
            request
                .prepare_output_dir()
                .context("preparing the campaign output directory")?;
            let outcome = request.launch(&config.paths.engine)?;
            println!(
                "Campaign finished (exit code {:?}); artifacts in {:?}",
                outcome.exit_code, request.output_dir
            );
        }
        Mode::Triage { program, strategy } => {
            let program = registry.resolve(&program)?.clone();
            let output_dir = campaign_output_dir(&config.paths.output_root, strategy, &program.name);
            let runner = ReplayRunner::new(
                config.paths.replayer.clone(),
                program.replay_target(),
                Duration::from_secs(config.triage.replay_timeout_secs),
            );
            let report = triage(&output_dir, &runner, &UbsanExtractor::new())
                .context("triaging recorded test cases")?;
            let stdout = std::io::stdout();
            report
                .write_to(&mut stdout.lock())
                .context("writing the triage report")?;
            std::io::stdout().flush().ok();
            eprintln!(
                "Replayed {} test cases ({} timed out)",
                report.replayed, report.timed_out
            );
        }
    }

    Ok(())
}
