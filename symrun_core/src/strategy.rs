use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "unknown search strategy '{0}' (expected one of: dfs, bfs, random-state, random-path, \
     cgs, nurs:depth, nurs:covnew, nurs:icnt, nurs:cpicnt, nurs:rp, nurs:md2u, nurs:qc)"
)]
pub struct StrategyParseError(pub String);

/// Scoring metric for the non-uniform random search family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NursMetric {
    Depth,
    /// New-coverage distance.
    CovNew,
    /// Instruction count.
    Icnt,
    /// Call-path instruction count.
    CpIcnt,
    /// Random-path weighted.
    Rp,
    /// Minimum distance to uncovered.
    Md2u,
    /// Solver query cost.
    Qc,
}

/// The heuristic the engine uses to choose which execution state to advance
/// next. Tags mirror the engine's `--search=` values verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchStrategy {
    Dfs,
    Bfs,
    RandomState,
    RandomPath,
    /// Guided-branch-count strategy; the only one requiring a transformed
    /// artifact and the target-branch hyperparameters.
    Cgs,
    Nurs(NursMetric),
}

impl SearchStrategy {
    /// Whether this strategy runs against the guided variant artifact and
    /// carries the target-branch hyperparameters.
    pub fn is_guided(&self) -> bool {
        matches!(self, SearchStrategy::Cgs)
    }

    /// The exact tag handed to the engine's search flag.
    pub fn engine_tag(&self) -> &'static str {
        match self {
            SearchStrategy::Dfs => "dfs",
            SearchStrategy::Bfs => "bfs",
            SearchStrategy::RandomState => "random-state",
            SearchStrategy::RandomPath => "random-path",
            SearchStrategy::Cgs => "cgs",
            SearchStrategy::Nurs(NursMetric::Depth) => "nurs:depth",
            SearchStrategy::Nurs(NursMetric::CovNew) => "nurs:covnew",
            SearchStrategy::Nurs(NursMetric::Icnt) => "nurs:icnt",
            SearchStrategy::Nurs(NursMetric::CpIcnt) => "nurs:cpicnt",
            SearchStrategy::Nurs(NursMetric::Rp) => "nurs:rp",
            SearchStrategy::Nurs(NursMetric::Md2u) => "nurs:md2u",
            SearchStrategy::Nurs(NursMetric::Qc) => "nurs:qc",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_tag())
    }
}

impl FromStr for SearchStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dfs" => Ok(SearchStrategy::Dfs),
            "bfs" => Ok(SearchStrategy::Bfs),
            "random-state" => Ok(SearchStrategy::RandomState),
            "random-path" => Ok(SearchStrategy::RandomPath),
            "cgs" => Ok(SearchStrategy::Cgs),
            "nurs:depth" => Ok(SearchStrategy::Nurs(NursMetric::Depth)),
            "nurs:covnew" => Ok(SearchStrategy::Nurs(NursMetric::CovNew)),
            "nurs:icnt" => Ok(SearchStrategy::Nurs(NursMetric::Icnt)),
            "nurs:cpicnt" => Ok(SearchStrategy::Nurs(NursMetric::CpIcnt)),
            "nurs:rp" => Ok(SearchStrategy::Nurs(NursMetric::Rp)),
            "nurs:md2u" => Ok(SearchStrategy::Nurs(NursMetric::Md2u)),
            "nurs:qc" => Ok(SearchStrategy::Nurs(NursMetric::Qc)),
            other => Err(StrategyParseError(other.to_string())),
        }
    }
}
