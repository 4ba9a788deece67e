//! Batch job catalog.
//!
//! A catalog entry describes one batch workload: its image, the command
//! template it runs (with a `{threads}` placeholder), and the parallelism
//! class it was designed for. The default catalog is the PARSEC/SPLASH-2X
//! benchmark set; a JSON file with the same shape can replace it.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not valid JSON.
    #[error("failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),

    /// The catalog contents are inconsistent.
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// One batch job descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job name; doubles as the container name.
    pub name: String,

    /// Container image reference.
    pub image: String,

    /// Command template; every `{threads}` is replaced at launch.
    pub command: Vec<String>,

    /// Number of cores the workload is designed to use.
    pub class: usize,
}

impl JobSpec {
    /// Render the command template for a given thread count.
    pub fn render_command(&self, threads: usize) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace("{threads}", &threads.to_string()))
            .collect()
    }
}

fn parsec_spec(name: &str, suite: &str, class: usize) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        image: format!("anakli/cca:{}_{}", suite, name),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("./run -a run -S {} -p {} -i native -n {{threads}}", suite, name),
        ],
        class,
    }
}

/// The default PARSEC/SPLASH-2X catalog.
pub fn default_catalog() -> Vec<JobSpec> {
    vec![
        parsec_spec("blackscholes", "parsec", 2),
        parsec_spec("canneal", "parsec", 2),
        parsec_spec("dedup", "parsec", 1),
        parsec_spec("ferret", "parsec", 2),
        parsec_spec("freqmine", "parsec", 2),
        parsec_spec("radix", "splash2x", 1),
        parsec_spec("vips", "parsec", 2),
    ]
}

/// Load a catalog from a JSON file.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<JobSpec>, CatalogError> {
    let contents = std::fs::read_to_string(path)?;
    let specs: Vec<JobSpec> = serde_json::from_str(&contents)?;
    validate_catalog(&specs)?;
    Ok(specs)
}

/// Check catalog invariants: non-empty, unique names, sane classes.
pub fn validate_catalog(specs: &[JobSpec]) -> Result<(), CatalogError> {
    if specs.is_empty() {
        return Err(CatalogError::Invalid("catalog is empty".to_string()));
    }

    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(CatalogError::Invalid(format!(
                "duplicate job name: {}",
                spec.name
            )));
        }
        if spec.class == 0 {
            return Err(CatalogError::Invalid(format!(
                "job {} has parallelism class 0",
                spec.name
            )));
        }
        if spec.command.is_empty() {
            return Err(CatalogError::Invalid(format!(
                "job {} has an empty command",
                spec.name
            )));
        }
    }

    Ok(())
}
