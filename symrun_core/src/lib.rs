pub mod campaign;
pub mod config;
pub mod registry;
pub mod replay;
pub mod sandbox;
pub mod strategy;
pub mod triage;
pub mod variant;

pub use campaign::{CampaignError, CampaignOutcome, CampaignRequest};
pub use config::SymrunConfig;
pub use registry::{ProgramDescriptor, ProgramRegistry, RegistryError};
pub use replay::{ReplayRunner, ReplayStatus};
pub use sandbox::{Sandbox, SandboxError};
pub use strategy::{NursMetric, SearchStrategy};
pub use triage::{DiagnosticExtractor, TriageFinding, TriageReport, UbsanExtractor};
pub use variant::VariantError;
