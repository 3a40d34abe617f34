// ========================================================================================
//
//                     Coefficient table: loading, validation & sharing
//
// ========================================================================================
//
// The table is configuration, not request data. It is loaded once, validated against the
// fixed site count, and then only ever read. Request handling reaches it through the
// `CoefficientProvider` seam so that an eagerly loaded table and a lazily loaded one look
// identical to the handler.

use crate::types::NUM_CPG_SITES;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// The table compiled into the binary. `build.rs` rejects a bundled file that does not
/// carry exactly one intercept and `NUM_CPG_SITES` site rows.
pub const BUNDLED_TABLE: &str = include_str!("../data/horvath2013_demo.tsv");

/// Origin label used in diagnostics for the bundled table.
const BUNDLED_ORIGIN: &str = "<bundled>";

/// The row label marking the intercept term, as used by the published Horvath files.
pub const INTERCEPT_LABEL: &str = "(Intercept)";

const SITE_COLUMN: &str = "cpg_id";
const WEIGHT_COLUMN: &str = "weight";
const VERSION_KEY: &str = "table_version";

/// The fixed, ordered per-site weights plus intercept of the linear age model.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    version: String,
    site_ids: Vec<String>,
    weights: Vec<f64>,
    intercept: f64,
}

/// Every way a coefficient source can fail to produce a usable table. These are
/// infrastructure faults: fatal at startup, or a generic internal error per request.
#[derive(Error, Debug)]
pub enum CoefficientError {
    #[error("Failed to read coefficient table '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed coefficient table '{origin}' at line {line}: {details}")]
    Parse {
        origin: String,
        line: u64,
        details: String,
    },
    #[error("Coefficient table '{origin}' has no '(Intercept)' row.")]
    MissingIntercept { origin: String },
    #[error("Coefficient table '{origin}' has a second '(Intercept)' row at line {line}.")]
    DuplicateIntercept { origin: String, line: u64 },
    #[error(
        "Coefficient table '{origin}' lists {found} CpG sites, but the clock requires exactly {expected}."
    )]
    WrongSiteCount {
        origin: String,
        found: usize,
        expected: usize,
    },
    #[error("Coefficient table '{origin}' has a non-finite weight for '{site}'.")]
    NonFiniteWeight { origin: String, site: String },
    #[error("Coefficient table '{origin}' lists site '{site}' twice (second time at line {line}).")]
    DuplicateSite {
        origin: String,
        site: String,
        line: u64,
    },
}

impl CoefficientTable {
    /// Builds a table from its parts, enforcing the site count and finiteness invariants.
    pub fn new(
        version: impl Into<String>,
        site_ids: Vec<String>,
        weights: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, CoefficientError> {
        let version = version.into();
        let origin = version.clone();
        if weights.len() != NUM_CPG_SITES || site_ids.len() != weights.len() {
            return Err(CoefficientError::WrongSiteCount {
                origin,
                found: weights.len().min(site_ids.len()),
                expected: NUM_CPG_SITES,
            });
        }
        if !intercept.is_finite() {
            return Err(CoefficientError::NonFiniteWeight {
                origin,
                site: INTERCEPT_LABEL.to_string(),
            });
        }
        if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
            return Err(CoefficientError::NonFiniteWeight {
                origin,
                site: site_ids[i].clone(),
            });
        }
        Ok(Self {
            version,
            site_ids,
            weights,
            intercept,
        })
    }

    /// Parses the table compiled into the binary.
    pub fn bundled() -> Result<Self, CoefficientError> {
        Self::parse(BUNDLED_TABLE, BUNDLED_ORIGIN)
    }

    /// Reads and parses a coefficient table from disk.
    pub fn load(path: &Path) -> Result<Self, CoefficientError> {
        let text = fs::read_to_string(path).map_err(|source| CoefficientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parses the tab-separated table format.
    ///
    /// Leading `#key=value` lines are metadata; `#table_version=` names the table. The
    /// header must contain `cpg_id` and `weight` columns. Site rows are kept in file
    /// order, which defines the site order of every input vector.
    pub fn parse(text: &str, origin: &str) -> Result<Self, CoefficientError> {
        // --- Stage 1: Metadata header ---
        let mut version = None;
        let mut metadata_lines = 0u64;
        let mut body_offset = 0usize;
        for line in text.split_inclusive('\n') {
            let Some(meta) = line.strip_prefix('#') else {
                break;
            };
            if let Some((key, value)) = meta.trim().split_once('=') {
                if key.trim() == VERSION_KEY {
                    version = Some(value.trim().to_string());
                }
            }
            metadata_lines += 1;
            body_offset += line.len();
        }

        // --- Stage 2: Column discovery ---
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text[body_offset..].as_bytes());

        let parse_err = |line: u64, details: String| CoefficientError::Parse {
            origin: origin.to_string(),
            line: line + metadata_lines,
            details,
        };

        let headers = reader
            .headers()
            .map_err(|e| parse_err(1, e.to_string()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| parse_err(1, format!("header is missing the '{name}' column")))
        };
        let site_col = column(SITE_COLUMN)?;
        let weight_col = column(WEIGHT_COLUMN)?;

        // --- Stage 3: Rows ---
        let mut intercept = None;
        let mut site_ids = Vec::with_capacity(NUM_CPG_SITES);
        let mut weights = Vec::with_capacity(NUM_CPG_SITES);
        let mut seen = HashSet::with_capacity(NUM_CPG_SITES);

        for record in reader.records() {
            let record = record.map_err(|e| {
                let line = e.position().map_or(0, |p| p.line());
                parse_err(line, e.to_string())
            })?;
            let body_line = record.position().map_or(0, |p| p.line());
            let line = body_line + metadata_lines;

            let site = record
                .get(site_col)
                .ok_or_else(|| parse_err(body_line, "missing cpg_id".to_string()))?;
            let raw_weight = record
                .get(weight_col)
                .ok_or_else(|| parse_err(body_line, "missing weight".to_string()))?;
            let weight: f64 = raw_weight.parse().map_err(|_| {
                parse_err(
                    body_line,
                    format!("weight '{raw_weight}' for '{site}' is not a number"),
                )
            })?;
            if !weight.is_finite() {
                return Err(CoefficientError::NonFiniteWeight {
                    origin: origin.to_string(),
                    site: site.to_string(),
                });
            }

            if site == INTERCEPT_LABEL {
                if intercept.replace(weight).is_some() {
                    return Err(CoefficientError::DuplicateIntercept {
                        origin: origin.to_string(),
                        line,
                    });
                }
                continue;
            }

            if !seen.insert(site.to_string()) {
                return Err(CoefficientError::DuplicateSite {
                    origin: origin.to_string(),
                    site: site.to_string(),
                    line,
                });
            }
            site_ids.push(site.to_string());
            weights.push(weight);
        }

        // --- Stage 4: Invariants ---
        let intercept = intercept.ok_or_else(|| CoefficientError::MissingIntercept {
            origin: origin.to_string(),
        })?;
        if weights.len() != NUM_CPG_SITES {
            return Err(CoefficientError::WrongSiteCount {
                origin: origin.to_string(),
                found: weights.len(),
                expected: NUM_CPG_SITES,
            });
        }

        let version = version.unwrap_or_else(|| origin.to_string());
        log::debug!(
            "Parsed coefficient table '{version}' from {origin}: {} sites, intercept {intercept}",
            weights.len()
        );
        Ok(Self {
            version,
            site_ids,
            weights,
            intercept,
        })
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn site_ids(&self) -> &[String] {
        &self.site_ids
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

// ========================================================================================
//                                 Table sources
// ========================================================================================

/// Where the process-wide table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoefficientSource {
    Bundled,
    File(PathBuf),
}

impl CoefficientSource {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Bundled, Self::File)
    }

    pub fn load(&self) -> Result<CoefficientTable, CoefficientError> {
        match self {
            Self::Bundled => CoefficientTable::bundled(),
            Self::File(path) => CoefficientTable::load(path),
        }
    }
}

/// Read-only access to the shared table. The handler only asks for the table after a
/// request has fully validated.
pub trait CoefficientProvider: Send + Sync {
    fn table(&self) -> Result<&CoefficientTable, &CoefficientError>;
}

impl CoefficientProvider for CoefficientTable {
    fn table(&self) -> Result<&CoefficientTable, &CoefficientError> {
        Ok(self)
    }
}

impl<P: CoefficientProvider + ?Sized> CoefficientProvider for Arc<P> {
    fn table(&self) -> Result<&CoefficientTable, &CoefficientError> {
        (**self).table()
    }
}

/// Loads its table on first use and caches the outcome, success or failure, for the
/// rest of the process lifetime.
#[derive(Debug)]
pub struct LazyCoefficients {
    source: CoefficientSource,
    cell: OnceLock<Result<CoefficientTable, CoefficientError>>,
}

impl LazyCoefficients {
    pub fn new(source: CoefficientSource) -> Self {
        Self {
            source,
            cell: OnceLock::new(),
        }
    }
}

impl CoefficientProvider for LazyCoefficients {
    fn table(&self) -> Result<&CoefficientTable, &CoefficientError> {
        self.cell
            .get_or_init(|| {
                log::info!("Loading coefficient table on first use from {:?}", self.source);
                self.source.load()
            })
            .as_ref()
    }
}
