use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::model::multigraph::MgmModel;
use crate::solution::MgmSolution;

/// On-disk shape of a solution file: total energy, the node count per graph,
/// and one labeling per pair under a `"g1, g2"` key with `null` marking
/// unmatched nodes.
#[derive(Debug, Serialize, Deserialize)]
struct RawSolution {
    energy: f64,
    #[serde(rename = "graph orders")]
    graph_orders: Vec<usize>,
    labeling: IndexMap<String, Vec<Option<usize>>>,
}

pub struct SolutionWriter;

impl SolutionWriter {
    /// Writes the solution as JSON, returning the path actually written. A
    /// directory target gets a `solution.json` inside it; any other extension
    /// is replaced by `.json`.
    pub fn save(path: &Path, model: &MgmModel, solution: &MgmSolution) -> Result<PathBuf> {
        let path = normalize(path);

        let mut labeling = IndexMap::with_capacity(solution.labelings.len());
        for (pair, pair_labeling) in &solution.labelings {
            labeling.insert(format!("{}, {}", pair.0, pair.1), pair_labeling.clone());
        }
        let raw = RawSolution {
            energy: solution.evaluate(model),
            graph_orders: model.graphs.iter().map(|g| g.node_count).collect(),
            labeling,
        };

        let text = serde_json::to_string_pretty(&raw)?;
        fs::write(&path, text).with_context(|| format!("write solution to {:?}", path))?;
        info!("Saved solution to {:?}", path);
        Ok(path)
    }
}

pub struct SolutionReader;

impl SolutionReader {
    /// Restores a solution against its owning model. Labelings for unknown
    /// pairs or with out-of-range labels are rejected.
    pub fn load(path: &Path, model: &MgmModel) -> Result<MgmSolution> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read solution from {:?}", path))?;
        let raw: RawSolution = serde_json::from_str(&text)
            .with_context(|| format!("parse solution file {:?}", path))?;

        let mut solution = MgmSolution::empty(model);
        for (key, labeling) in raw.labeling {
            let pair = parse_pair_key(&key)?;
            let Some(slot) = solution.labelings.get_mut(&pair) else {
                bail!("solution file references pair {:?} absent from the model", pair);
            };
            if labeling.len() != slot.len() {
                bail!(
                    "labeling for pair {:?} has {} entries, expected {}",
                    pair,
                    labeling.len(),
                    slot.len()
                );
            }
            *slot = labeling;
        }
        solution.validate(model)?;
        debug!(
            "Loaded solution: stored energy {}, recomputed {}",
            raw.energy,
            solution.evaluate(model)
        );
        Ok(solution)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut path = path.to_path_buf();
    if path.is_dir() {
        path.push("solution.json");
    }
    if path.extension().map_or(true, |ext| ext != "json") {
        path.set_extension("json");
    }
    path
}

fn parse_pair_key(key: &str) -> Result<(usize, usize)> {
    let mut parts = key.split(',').map(str::trim);
    let (Some(g1), Some(g2), None) = (parts.next(), parts.next(), parts.next()) else {
        bail!("malformed pair key {:?}", key);
    };
    let g1 = g1
        .parse()
        .with_context(|| format!("malformed pair key {:?}", key))?;
    let g2 = g2
        .parse()
        .with_context(|| format!("malformed pair key {:?}", key))?;
    Ok((g1, g2))
}
