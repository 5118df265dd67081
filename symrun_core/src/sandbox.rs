use crate::strategy::SearchStrategy;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("sandbox template archive {0:?} does not exist")]
    TemplateMissing(PathBuf),

    #[error("environment file {0:?} does not exist")]
    EnvFileMissing(PathBuf),

    #[error("extracting sandbox template {template:?} failed: {detail}")]
    ExtractionFailed { template: PathBuf, detail: String },

    #[error("sandbox I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::Io(err.to_string())
    }
}

/// A freshly provisioned, self-contained sandbox for one campaign.
///
/// The directory holds the extracted template plus a private copy of the
/// environment-variable file. It is owned exclusively by the campaign that
/// created it and is destroyed and recreated (never merged) on the next
/// provisioning of the same (strategy, program) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    /// Root of the sandbox tree; the engine runs in this directory.
    pub dir: PathBuf,
    /// The copied environment file inside the sandbox.
    pub env_file: PathBuf,
}

pub fn sandbox_dir_name(strategy: SearchStrategy, program_name: &str) -> String {
    format!("sandbox-{strategy}-{program_name}")
}

/// Provisions a clean sandbox for one (strategy, program) pair.
///
/// The template is extracted and the environment file copied into a staging
/// directory first; only a fully populated tree is swapped into the final
/// `sandbox-<strategy>-<program>` location, replacing any previous sandbox
/// for the pair. On any failure the staging directory is discarded and the
/// previous sandbox, if one existed, is left untouched.
pub fn provision(
    sandbox_root: &Path,
    template: &Path,
    env_file: &Path,
    strategy: SearchStrategy,
    program_name: &str,
) -> Result<Sandbox, SandboxError> {
    if !template.exists() {
        return Err(SandboxError::TemplateMissing(template.to_path_buf()));
    }
    if !env_file.exists() {
        return Err(SandboxError::EnvFileMissing(env_file.to_path_buf()));
    }

    fs::create_dir_all(sandbox_root)?;
    let staging = tempfile::Builder::new()
        .prefix(".sandbox-staging-")
        .tempdir_in(sandbox_root)?;

    extract_template(template, staging.path())?;

    let env_file_name = env_file
        .file_name()
        .ok_or_else(|| SandboxError::EnvFileMissing(env_file.to_path_buf()))?;
    fs::copy(env_file, staging.path().join(env_file_name))?;

    let final_dir = sandbox_root.join(sandbox_dir_name(strategy, program_name));
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    let staging_path = staging.keep();
    fs::rename(&staging_path, &final_dir)?;

    Ok(Sandbox {
        env_file: final_dir.join(env_file_name),
        dir: final_dir,
    })
}

fn extract_template(template: &Path, dest: &Path) -> Result<(), SandboxError> {
    let output = Command::new("tar")
        .arg("-xzf")
        .arg(template)
        .arg("-C")
        .arg(dest)
        .output()
        .map_err(|e| SandboxError::ExtractionFailed {
            template: template.to_path_buf(),
            detail: format!("failed to spawn tar: {e}"),
        })?;

    if !output.status.success() {
        return Err(SandboxError::ExtractionFailed {
            template: template.to_path_buf(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
