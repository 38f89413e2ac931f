//! Solver options and their per-prefix registry.

use indexmap::IndexMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where the preconditioner is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Variant {
    /// Iterate on `M^{-1} A`.
    #[default]
    Left,
    /// Iterate on `A M^{-1}`.
    Right,
    /// Right preconditioning with a preconditioner that may change each step.
    Flexible,
}

/// Gram-Schmidt flavour of the orthogonalization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GramSchmidt {
    /// All projections in one reduction.
    #[default]
    Classical,
    /// One reduction per previous basis vector.
    Modified,
    /// One reduction, only the newest projection subtracted.
    IncompleteClassical,
}

/// Domain decomposition preconditioner configured on the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SchwarzMethod {
    Ras,
    Oras,
    Soras,
    Asm,
    Osm,
    #[default]
    None,
}

/// Coarse correction combined with the Schwarz preconditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CoarseCorrection {
    Deflated,
    Additive,
    Balanced,
}

/// Krylov method picked by [`SolverConfig::method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum KrylovMethod {
    #[default]
    Gmres,
    BlockGmres,
    Cg,
    BlockCg,
}

impl KrylovMethod {
    /// Parse a method name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "gmres" => Some(Self::Gmres),
            "bgmres" | "block_gmres" => Some(Self::BlockGmres),
            "cg" => Some(Self::Cg),
            "bcg" | "block_cg" => Some(Self::BlockCg),
            _ => None,
        }
    }
}

impl std::fmt::Display for KrylovMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KrylovMethod::Gmres => "GMRES",
            KrylovMethod::BlockGmres => "BGMRES",
            KrylovMethod::Cg => "CG",
            KrylovMethod::BlockCg => "BCG",
        };
        f.write_str(name)
    }
}

/// Options of one Krylov solve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// Convergence tolerance.
    ///
    /// Positive values are relative to the initial residual, negative values
    /// are absolute bounds on the residual norm.
    pub tol: f64,
    /// Iteration budget.
    pub max_it: usize,
    /// Restart length of GMRES and Block-GMRES.
    pub restart: usize,
    pub variant: Variant,
    pub orthogonalization: GramSchmidt,
    /// 0 is silent, 1 reports the outcome, 2 adds restarts, 3 every iteration.
    pub verbosity: u8,
    /// Keep every CG search direction and re-orthogonalize against all of them.
    pub reorthogonalize: bool,
    /// Relative threshold under which Block-GMRES drops dependent right-hand sides.
    pub deflation_tol: Option<f64>,
    pub schwarz_method: SchwarzMethod,
    pub coarse_correction: Option<CoarseCorrection>,
    pub method: KrylovMethod,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_it: 100,
            restart: 40,
            variant: Variant::Left,
            orthogonalization: GramSchmidt::Classical,
            verbosity: 0,
            reorthogonalize: false,
            deflation_tol: None,
            schwarz_method: SchwarzMethod::None,
            coarse_correction: None,
            method: KrylovMethod::Gmres,
        }
    }
}

impl SolverConfig {
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_it(mut self, max_it: usize) -> Self {
        self.max_it = max_it;
        self
    }

    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_orthogonalization(mut self, gs: GramSchmidt) -> Self {
        self.orthogonalization = gs;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_reorthogonalization(mut self, enabled: bool) -> Self {
        self.reorthogonalize = enabled;
        self
    }

    pub fn with_deflation_tol(mut self, tol: f64) -> Self {
        self.deflation_tol = Some(tol);
        self
    }

    pub fn with_schwarz_method(mut self, method: SchwarzMethod) -> Self {
        self.schwarz_method = method;
        self
    }

    pub fn with_coarse_correction(mut self, correction: CoarseCorrection) -> Self {
        self.coarse_correction = Some(correction);
        self
    }

    pub fn with_method(mut self, method: KrylovMethod) -> Self {
        self.method = method;
        self
    }

    /// Whether the configured preconditioner is symmetric, as CG requires.
    pub fn is_cg_compatible(&self) -> bool {
        let symmetric_schwarz = !matches!(
            self.schwarz_method,
            SchwarzMethod::Ras | SchwarzMethod::Oras | SchwarzMethod::Osm
        );
        symmetric_schwarz && self.coarse_correction != Some(CoarseCorrection::Deflated)
    }

    /// Restart length actually used, never zero.
    pub fn effective_restart(&self) -> usize {
        self.restart.clamp(1, self.max_it.max(1))
    }
}

/// Per-prefix solver options.
///
/// Operators name their entry through a prefix; unknown prefixes fall back to
/// the default options.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    pub default: SolverConfig,
    pub prefixes: IndexMap<String, SolverConfig>,
}

impl Options {
    pub fn new(default: SolverConfig) -> Self {
        Self {
            default,
            prefixes: IndexMap::new(),
        }
    }

    /// Register options for `prefix`, replacing any previous entry.
    pub fn insert(
        &mut self,
        prefix: impl Into<String>,
        config: SolverConfig,
    ) -> Option<SolverConfig> {
        self.prefixes.insert(prefix.into(), config)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, config: SolverConfig) -> Self {
        self.insert(prefix, config);
        self
    }

    /// Options of `prefix`.
    pub fn get(&self, prefix: &str) -> &SolverConfig {
        if prefix.is_empty() {
            return &self.default;
        }
        self.prefixes.get(prefix).unwrap_or(&self.default)
    }
}

impl From<SolverConfig> for Options {
    fn from(default: SolverConfig) -> Self {
        Self::new(default)
    }
}
