//! CSV ingestion of the aggregate size distribution.
//!
//! Source headers `vf_max` and `n_cuts` are renamed to `maxVolumeFriction`
//! and `numCuts`. Numeric cells that are empty or not numbers are kept as
//! missing values so the planner can exclude the class instead of aborting
//! the whole run.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::model::AggregateClass;

/// Errors while reading the aggregate table.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("could not open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("the aggregate table contains no rows")]
    Empty,
    #[error("duplicate aggregate id '{0}'")]
    DuplicateId(String),
}

#[derive(Debug, Deserialize)]
struct AggregateRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    a: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    b: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    c: Option<f64>,
    #[serde(rename = "vf_max", default, deserialize_with = "csv::invalid_option")]
    max_volume_friction: Option<f64>,
    #[serde(rename = "n_cuts", default, deserialize_with = "csv::invalid_option")]
    num_cuts: Option<f64>,
}

impl AggregateRecord {
    fn into_class(self, row: usize) -> AggregateClass {
        let id = self
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("aggregate-{}", row));

        let mut missing = Vec::new();
        let mut number = |value: Option<f64>, name: &'static str| {
            value.unwrap_or_else(|| {
                missing.push(name);
                f64::NAN
            })
        };
        let a = number(self.a, "a");
        let b = number(self.b, "b");
        let c = number(self.c, "c");
        let max_volume_friction = number(self.max_volume_friction, "vf_max");
        let num_cuts = match self.num_cuts {
            Some(value) if value.is_finite() && value >= 0.0 => value.round() as usize,
            _ => {
                missing.push("n_cuts");
                0
            }
        };

        let class = AggregateClass::new(id, (a, b, c), max_volume_friction, num_cuts);
        if !missing.is_empty() {
            log::warn!(
                "⚠️ Row {} ('{}') has missing or non-numeric fields: {}",
                row,
                class.id,
                missing.join(", ")
            );
        } else if let Err(err) = class.validate() {
            log::warn!("⚠️ Row {} ('{}') is kept but cannot spawn cleanly: {}", row, class.id, err);
        }
        class
    }
}

/// Parses an aggregate table from any reader.
///
/// Rows are numbered from 1 (the header is not counted); that number forms
/// the class id when the table has no `id` column.
pub fn parse_aggregate_classes<R: Read>(reader: R) -> Result<Vec<AggregateClass>, InputError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut seen = HashSet::new();
    let mut classes = Vec::new();
    for (idx, record) in csv_reader.deserialize::<AggregateRecord>().enumerate() {
        let class = record?.into_class(idx + 1);
        if !seen.insert(class.id.clone()) {
            return Err(InputError::DuplicateId(class.id));
        }
        classes.push(class);
    }

    if classes.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(classes)
}

/// Loads the aggregate table from a file.
pub fn load_aggregate_classes(path: impl AsRef<Path>) -> Result<Vec<AggregateClass>, InputError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| InputError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let classes = parse_aggregate_classes(file)?;
    log::info!(
        "📥 Loaded {} aggregate classes from {}",
        classes.len(),
        path.display()
    );
    Ok(classes)
}
