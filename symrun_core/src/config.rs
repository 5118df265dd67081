use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Flat registry table mapping program names to their artifacts.
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,
    /// Template archive extracted into every fresh sandbox.
    #[serde(default = "default_sandbox_template")]
    pub sandbox_template: PathBuf,
    /// Environment-variable file copied into every fresh sandbox.
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Staging location for guided-variant bitcode artifacts.
    #[serde(default = "default_variant_staging_root")]
    pub variant_staging_root: PathBuf,
    #[serde(default = "default_stats_root")]
    pub stats_root: PathBuf,
    /// Symbolic-execution engine executable.
    #[serde(default = "default_engine")]
    pub engine: PathBuf,
    /// Test-case replayer executable.
    #[serde(default = "default_replayer")]
    pub replayer: PathBuf,
    /// Bitcode optimizer executable hosting the guided-variant pass.
    #[serde(default = "default_opt")]
    pub opt: PathBuf,
    #[serde(default = "default_pass_library")]
    pub pass_library: PathBuf,
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("benchmark/config.txt")
}
fn default_sandbox_template() -> PathBuf {
    PathBuf::from("sandbox.tgz")
}
fn default_env_file() -> PathBuf {
    PathBuf::from("test.env")
}
fn default_sandbox_root() -> PathBuf {
    PathBuf::from("sandbox")
}
fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}
fn default_variant_staging_root() -> PathBuf {
    PathBuf::from("new_benchmark")
}
fn default_stats_root() -> PathBuf {
    PathBuf::from("stat")
}
fn default_engine() -> PathBuf {
    PathBuf::from("klee")
}
fn default_replayer() -> PathBuf {
    PathBuf::from("klee-replay")
}
fn default_opt() -> PathBuf {
    PathBuf::from("opt")
}
fn default_pass_library() -> PathBuf {
    PathBuf::from("libidapass.so")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry_file: default_registry_file(),
            sandbox_template: default_sandbox_template(),
            env_file: default_env_file(),
            sandbox_root: default_sandbox_root(),
            output_root: default_output_root(),
            variant_staging_root: default_variant_staging_root(),
            stats_root: default_stats_root(),
            engine: default_engine(),
            replayer: default_replayer(),
            opt: default_opt(),
            pass_library: default_pass_library(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    /// Wall-clock budget handed to the engine via its own time-budget flag.
    #[serde(default = "default_max_time_secs")]
    pub max_time_secs: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_solver_time_secs")]
    pub max_solver_time_secs: u64,
    #[serde(default = "default_max_sym_array_size")]
    pub max_sym_array_size: u64,
    #[serde(default)]
    pub optimize: bool,
    /// Collect per-branch coverage statistics (pair with random-path to
    /// measure symbolic/concrete branch coverage).
    #[serde(default)]
    pub cov_stats: bool,
}

fn default_max_time_secs() -> u64 {
    3600 * 2
}
fn default_max_memory_mb() -> u64 {
    4096
}
fn default_max_solver_time_secs() -> u64 {
    30
}
fn default_max_sym_array_size() -> u64 {
    4096
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            max_time_secs: default_max_time_secs(),
            max_memory_mb: default_max_memory_mb(),
            max_solver_time_secs: default_max_solver_time_secs(),
            max_sym_array_size: default_max_sym_array_size(),
            optimize: false,
            cov_stats: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GuidedSettings {
    /// Size of the working set of interesting branches the guided strategy
    /// steers toward.
    #[serde(default = "default_target_branch_num")]
    pub target_branch_num: u32,
    /// Executed-instruction interval at which the branch working set is
    /// re-selected.
    #[serde(default = "default_target_branch_update_insts")]
    pub target_branch_update_insts: u64,
}

fn default_target_branch_num() -> u32 {
    10
}
fn default_target_branch_update_insts() -> u64 {
    300_000
}

impl Default for GuidedSettings {
    fn default() -> Self {
        Self {
            target_branch_num: default_target_branch_num(),
            target_branch_update_insts: default_target_branch_update_insts(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TriageSettings {
    #[serde(default = "default_replay_timeout_secs")]
    pub replay_timeout_secs: u64,
}

fn default_replay_timeout_secs() -> u64 {
    30
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            replay_timeout_secs: default_replay_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SymrunConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub guided: GuidedSettings,
    #[serde(default)]
    pub triage: TriageSettings,
}

impl SymrunConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: SymrunConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_builtin_values() {
        let config = SymrunConfig::default();
        assert_eq!(config.campaign.max_time_secs, 7200);
        assert_eq!(config.campaign.max_memory_mb, 4096);
        assert!(!config.campaign.optimize);
        assert!(!config.campaign.cov_stats);
        assert_eq!(config.guided.target_branch_num, 10);
        assert_eq!(config.guided.target_branch_update_insts, 300_000);
        assert_eq!(config.triage.replay_timeout_secs, 30);
        assert_eq!(
            config.paths.registry_file,
            PathBuf::from("benchmark/config.txt")
        );
        assert_eq!(config.paths.sandbox_template, PathBuf::from("sandbox.tgz"));
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml_str = r#"
            [campaign]
            max-time-secs = 60
            optimize = true

            [guided]
            target-branch-num = 25
        "#;
        let config: SymrunConfig = toml::from_str(toml_str).expect("valid TOML");
        assert_eq!(config.campaign.max_time_secs, 60);
        assert!(config.campaign.optimize);
        assert_eq!(config.campaign.max_solver_time_secs, 30);
        assert_eq!(config.guided.target_branch_num, 25);
        assert_eq!(config.guided.target_branch_update_insts, 300_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let toml_str = r#"
            [campaign]
            max-time-sec = 60
        "#;
        let result: Result<SymrunConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err(), "typoed field name must not parse silently");
    }

    #[test]
    fn load_from_file_reads_and_parses() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[paths]\nengine = \"/opt/engine/bin/klee\"").expect("write config");
        let config =
            SymrunConfig::load_from_file(&file.path().to_path_buf()).expect("config loads");
        assert_eq!(config.paths.engine, PathBuf::from("/opt/engine/bin/klee"));
    }

    #[test]
    fn load_from_file_missing_path_fails() {
        let result = SymrunConfig::load_from_file(&PathBuf::from("/does/not/exist.toml"));
        assert!(result.is_err());
    }
}
