use crate::registry::ProgramDescriptor;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VariantError {
    #[error("bitcode pass library {0:?} does not exist")]
    PassLibraryMissing(PathBuf),

    #[error("failed to spawn bitcode optimizer {opt:?}: {source}")]
    OptSpawn {
        opt: PathBuf,
        source: std::io::Error,
    },

    #[error("bitcode transformation of {artifact:?} failed: {detail}")]
    TransformFailed { artifact: PathBuf, detail: String },

    #[error("variant staging I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VariantError {
    fn from(err: std::io::Error) -> Self {
        VariantError::Io(err.to_string())
    }
}

/// Where the transformed artifact for `program_name` lands.
pub fn guided_artifact_path(staging_root: &Path, program_name: &str) -> PathBuf {
    staging_root.join(format!("{program_name}.bc"))
}

/// Runs the external bitcode-rewriting pass over the program's primary
/// artifact, producing the guided-search variant under the staging root.
///
/// Re-running overwrites the previous variant. This is deliberately not
/// transactional: an interrupted pass can leave a corrupt artifact behind,
/// and the next campaign launch will attempt to run it.
pub fn generate(
    opt: &Path,
    pass_library: &Path,
    staging_root: &Path,
    stats_root: &Path,
    program: &ProgramDescriptor,
) -> Result<PathBuf, VariantError> {
    if !pass_library.exists() {
        return Err(VariantError::PassLibraryMissing(pass_library.to_path_buf()));
    }
    fs::create_dir_all(staging_root)?;
    fs::create_dir_all(stats_root)?;

    let output = Command::new(opt)
        .arg("-load")
        .arg(pass_library)
        .arg("-ida")
        .arg(&program.primary_artifact)
        .output()
        .map_err(|e| VariantError::OptSpawn {
            opt: opt.to_path_buf(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(VariantError::TransformFailed {
            artifact: program.primary_artifact.clone(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(guided_artifact_path(staging_root, &program.name))
}
