use crate::config::SymrunConfig;
use crate::registry::ProgramDescriptor;
use crate::sandbox::Sandbox;
use crate::strategy::SearchStrategy;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CampaignError {
    /// The per-campaign output location could not be reset. Raised before
    /// the engine is spawned; a prior run's artifacts must never be
    /// mistaken for the current run's.
    #[error("failed to prepare output directory {path:?}: {source}")]
    OutputDirPreparation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The engine executable could not be started at all. A non-zero engine
    /// exit is deliberately NOT an error (see [`CampaignOutcome`]).
    #[error("failed to spawn engine {engine:?}: {source}")]
    EngineSpawn {
        engine: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write invocation record {path:?}: {detail}")]
    InvocationRecord { path: PathBuf, detail: String },
}

/// Resource budgets enforced by the engine itself via its flag surface.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceBudgets {
    pub max_time_secs: u64,
    pub max_memory_mb: u64,
    pub max_solver_time_secs: u64,
    pub max_sym_array_size: u64,
}

/// Hyperparameters for the guided-branch-count strategy: the engine
/// periodically re-selects a working set of up to `target_branch_num`
/// interesting branches and re-evaluates it every
/// `target_branch_update_insts` executed instructions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GuidedParams {
    pub target_branch_num: u32,
    pub target_branch_update_insts: u64,
}

/// Everything that determines one campaign: program, strategy, resolved
/// artifact, budgets, toggles and filesystem locations. Constructed fresh
/// per invocation; campaigns share no mutable state beyond the paths they
/// are given.
#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub program: ProgramDescriptor,
    pub strategy: SearchStrategy,
    /// Bitcode the engine explores: the guided variant for the guided
    /// strategy, the program's primary artifact otherwise.
    pub artifact: PathBuf,
    pub budgets: ResourceBudgets,
    pub optimize: bool,
    pub cov_stats: bool,
    pub guided: GuidedParams,
    /// `<output-root>/<strategy>/<program>`; created by the engine itself,
    /// removed here if a prior run left it behind.
    pub output_dir: PathBuf,
    pub env_file: PathBuf,
    pub sandbox_dir: PathBuf,
}

/// Terminal state of one engine invocation.
///
/// A non-zero exit is not a campaign failure: test cases recorded before a
/// crash or timeout are still valid triage input. No retries are attempted;
/// a retried campaign would silently alter timing-sensitive exploration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignOutcome {
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CampaignRequest {
    /// Assembles a request from the explicit configuration structure, a
    /// resolved program, and a provisioned sandbox.
    pub fn from_config(
        config: &SymrunConfig,
        program: ProgramDescriptor,
        strategy: SearchStrategy,
        artifact: PathBuf,
        sandbox: &Sandbox,
    ) -> Self {
        let output_dir = campaign_output_dir(&config.paths.output_root, strategy, &program.name);
        Self {
            program,
            strategy,
            artifact,
            budgets: ResourceBudgets {
                max_time_secs: config.campaign.max_time_secs,
                max_memory_mb: config.campaign.max_memory_mb,
                max_solver_time_secs: config.campaign.max_solver_time_secs,
                max_sym_array_size: config.campaign.max_sym_array_size,
            },
            optimize: config.campaign.optimize,
            cov_stats: config.campaign.cov_stats,
            guided: GuidedParams {
                target_branch_num: config.guided.target_branch_num,
                target_branch_update_insts: config.guided.target_branch_update_insts,
            },
            output_dir,
            env_file: sandbox.env_file.clone(),
            sandbox_dir: sandbox.dir.clone(),
        }
    }

    /// Composes the full engine argument vector: the fixed baseline flag
    /// set, the request-specific values, the conditional toggles and guided
    /// hyperparameters, then the positional artifact path and the
    /// whitespace-split symbolic-environment spec.
    pub fn compose_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--simplify-sym-indices".into(),
            "--use-forked-solver".into(),
            "--use-cex-cache".into(),
            "--external-calls=all".into(),
            "--switch-type=internal".into(),
            "--libc=uclibc".into(),
            "--posix-runtime".into(),
            "--output-stats".into(),
            format!("--max-solver-time={}", self.budgets.max_solver_time_secs),
            format!("--max-sym-array-size={}", self.budgets.max_sym_array_size),
            "--ignore-solver-failures".into(),
            "--only-output-states-covering-new".into(),
            "--dump-states-on-halt=false".into(),
            format!("--max-memory={}", self.budgets.max_memory_mb),
            "--max-memory-inhibit=false".into(),
            "--watchdog".into(),
            format!("--output-dir={}", self.output_dir.display()),
            format!("--env-file={}", self.env_file.display()),
            format!("--run-in-dir={}", self.sandbox_dir.display()),
            format!("--max-time={}s", self.budgets.max_time_secs),
            format!("--search={}", self.strategy),
        ];

        if self.cov_stats {
            args.push("--cov-stats".into());
        }
        if self.optimize {
            args.push("--optimize".into());
        }
        if self.strategy.is_guided() {
            args.push(format!(
                "--target-branch-num={}",
                self.guided.target_branch_num
            ));
            args.push(format!(
                "--target-branch-update-insts={}",
                self.guided.target_branch_update_insts
            ));
        }

        args.push(self.artifact.display().to_string());
        args.extend(self.program.sym_env.split_whitespace().map(str::to_string));
        args
    }

    /// Resets the campaign's output location: removes the
    /// `<output-root>/<strategy>/<program>` leaf if a prior run left it and
    /// creates the `<strategy>` parent. The engine refuses a pre-existing
    /// output directory and creates the leaf itself.
    pub fn prepare_output_dir(&self) -> Result<(), CampaignError> {
        let map_err = |source| CampaignError::OutputDirPreparation {
            path: self.output_dir.clone(),
            source,
        };
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).map_err(map_err)?;
        }
        if let Some(parent) = self.output_dir.parent() {
            fs::create_dir_all(parent).map_err(map_err)?;
        }
        Ok(())
    }

    /// Runs the engine once, blocking until it exits. The wall-clock budget
    /// is enforced by the engine's own time-budget flag; no external
    /// supervisor kills a hung process.
    pub fn launch(&self, engine: &Path) -> Result<CampaignOutcome, CampaignError> {
        let args = self.compose_args();
        println!(
            "Launching campaign: program '{}', strategy '{}', budget {}s",
            self.program.name, self.strategy, self.budgets.max_time_secs
        );

        let status = Command::new(engine)
            .args(&args)
            .status()
            .map_err(|e| CampaignError::EngineSpawn {
                engine: engine.to_path_buf(),
                source: e,
            })?;

        let outcome = CampaignOutcome {
            exit_code: status.code(),
            success: status.success(),
        };
        if !outcome.success {
            eprintln!(
                "Engine exited with {:?} for '{}'/{}; partial output remains valid triage input",
                outcome.exit_code, self.program.name, self.strategy
            );
        }
        self.write_invocation_record(engine, &args, &outcome)?;
        Ok(outcome)
    }

    /// Persists a machine-readable record of the exact invocation next to
    /// the output directory, so a campaign can be re-derived from its
    /// artifacts alone.
    fn write_invocation_record(
        &self,
        engine: &Path,
        args: &[String],
        outcome: &CampaignOutcome,
    ) -> Result<(), CampaignError> {
        let record = InvocationRecord {
            program: &self.program.name,
            strategy: self.strategy.engine_tag(),
            engine: engine.display().to_string(),
            args,
            budgets: &self.budgets,
            exit_code: outcome.exit_code,
        };
        let path = invocation_record_path(&self.output_dir);
        let map_err = |detail: String| CampaignError::InvocationRecord {
            path: path.clone(),
            detail,
        };
        let file = File::create(&path).map_err(|e| map_err(e.to_string()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &record)
            .map_err(|e| map_err(e.to_string()))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct InvocationRecord<'a> {
    program: &'a str,
    strategy: &'a str,
    engine: String,
    args: &'a [String],
    budgets: &'a ResourceBudgets,
    exit_code: Option<i32>,
}

/// `<output-root>/<strategy>/<program-name>`, the directory the engine
/// populates with recorded test cases and statistics.
pub fn campaign_output_dir(
    output_root: &Path,
    strategy: SearchStrategy,
    program_name: &str,
) -> PathBuf {
    output_root.join(strategy.engine_tag()).join(program_name)
}

fn invocation_record_path(output_dir: &Path) -> PathBuf {
    let file_name = match output_dir.file_name() {
        Some(name) => format!("{}.invocation.json", name.to_string_lossy()),
        None => "campaign.invocation.json".to_string(),
    };
    match output_dir.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}
