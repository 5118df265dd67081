use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Field separator used by the registry table.
pub const FIELD_DELIMITER: &str = "##";

const FIELDS_PER_RECORD: usize = 4;

/// Errors raised while loading the registry table or resolving a program.
///
/// All of these are configuration errors: the campaign pipeline must abort
/// before any subprocess is spawned when one occurs.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The requested program name has no record in the registry table.
    #[error("program '{0}' is not registered in the registry table")]
    ProgramNotFound(String),

    /// A record does not have the expected number of delimiter-separated
    /// fields. The 1-based line number points at the offending record.
    #[error("malformed registry record at line {line}: expected 4 '##'-separated fields, found {found}")]
    MalformedRecord { line: usize, found: usize },

    /// The registry table itself could not be read.
    #[error("failed to read registry file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything the pipeline needs to know about one registered target program.
///
/// Immutable once parsed; one descriptor per registered program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDescriptor {
    pub name: String,
    /// Bitcode artifact campaigns explore (non-guided strategies).
    pub primary_artifact: PathBuf,
    /// Sanitizer-instrumented bitcode artifact; the replayer runs the
    /// native executable built next to it, see [`Self::replay_target`].
    pub instrumented_artifact: PathBuf,
    /// Symbolic-environment spec passed to the engine, e.g. `sym-args 2 10`.
    /// Encodes the shape of symbolic command-line/file inputs.
    pub sym_env: String,
}

impl ProgramDescriptor {
    /// The native executable test cases are replayed against.
    ///
    /// The registry stores the instrumented artifact as a bitcode path;
    /// the toolchain builds the matching executable next to it under the
    /// same name minus the `.bc` extension, and that is what the replayer
    /// takes. A path without a `.bc` extension is handed over unchanged.
    pub fn replay_target(&self) -> PathBuf {
        match self.instrumented_artifact.extension().and_then(|e| e.to_str()) {
            Some("bc") => self.instrumented_artifact.with_extension(""),
            _ => self.instrumented_artifact.clone(),
        }
    }
}

/// In-memory map of program name to [`ProgramDescriptor`], built once from
/// the registry table at load time.
///
/// The table is one record per line, four fields separated by
/// [`FIELD_DELIMITER`]: name, primary artifact, instrumented artifact,
/// symbolic-environment spec. The format does not require unique names;
/// when a name repeats, the first record wins.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: HashMap<String, ProgramDescriptor>,
}

impl ProgramRegistry {
    /// Loads and parses the registry table at `path`.
    ///
    /// Blank lines are skipped; any other line with the wrong field count is
    /// a [`RegistryError::MalformedRecord`].
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, RegistryError> {
        let mut programs = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
            if fields.len() != FIELDS_PER_RECORD {
                return Err(RegistryError::MalformedRecord {
                    line: idx + 1,
                    found: fields.len(),
                });
            }
            let descriptor = ProgramDescriptor {
                name: fields[0].to_string(),
                primary_artifact: PathBuf::from(fields[1]),
                instrumented_artifact: PathBuf::from(fields[2]),
                sym_env: fields[3].to_string(),
            };
            // First record wins for duplicate names.
            programs
                .entry(descriptor.name.clone())
                .or_insert(descriptor);
        }
        Ok(Self { programs })
    }

    /// Looks up a registered program by name.
    pub fn resolve(&self, name: &str) -> Result<&ProgramDescriptor, RegistryError> {
        self.programs
            .get(name)
            .ok_or_else(|| RegistryError::ProgramNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
