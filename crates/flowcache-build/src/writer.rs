//! Cache writer / index builder.
//!
//! Serializes every partition and aggregate table as an independent JSON
//! artifact under the key scheme in `flowcache_model::artifact::keys`, plus
//! the manifest (`index.json`) and global summary. No artifact depends on
//! another having been written first, and rewriting an artifact yields the
//! same bytes, so a build can be re-run or parallelized by key safely.

use crate::aggregate::BuildOutput;
use anyhow::{Context, Result};
use flowcache_model::artifact::{
    keys, AttrPartition, Dimensions, Manifest, Partition, PartitionKind,
};
use flowcache_model::geo::GeoEntity;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Writes the artifact set under one cache root directory.
pub struct CacheWriter {
    root: PathBuf,
}

impl CacheWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serialize the whole artifact set.
    pub fn write_all(&self, output: &BuildOutput, counties: &[GeoEntity]) -> Result<()> {
        for (code, rows) in &output.by_dest {
            self.write_json(
                &keys::by_dest(code),
                &Partition {
                    code: code.clone(),
                    kind: PartitionKind::ByDest,
                    max_observed: output.summary.max_observed,
                    max_predicted: output.summary.max_predicted,
                    rows: rows.clone(),
                },
            )?;
        }
        for (code, rows) in &output.by_origin {
            self.write_json(
                &keys::by_origin(code),
                &Partition {
                    code: code.clone(),
                    kind: PartitionKind::ByOrigin,
                    max_observed: output.summary.max_observed,
                    max_predicted: output.summary.max_predicted,
                    rows: rows.clone(),
                },
            )?;
        }
        for (code, rows) in &output.by_dest_attr {
            self.write_json(
                &keys::by_dest_attr(code),
                &AttrPartition {
                    code: code.clone(),
                    kind: PartitionKind::ByDestAttr,
                    rows: rows.clone(),
                },
            )?;
        }

        self.write_json(keys::SUMMARY, &output.summary)?;
        self.write_json(keys::INDEX, &manifest_of(output))?;
        self.write_json(keys::COUNTY_METADATA, &counties)?;

        if !output.schema.is_empty() {
            self.write_json(keys::ATTR_SCHEMA, &output.schema)?;
            self.write_json(keys::FEATURE_GLOBAL_RANK, &output.feature_rank)?;
            for aggregate in &output.feature_by_county {
                self.write_json(&keys::feature_by_county(&aggregate.id), aggregate)?;
            }
        }

        let sliced = output
            .by_dest
            .values()
            .flatten()
            .any(|r| r.age.is_some() || r.income.is_some() || r.education.is_some());
        if sliced {
            self.write_json(keys::DIMENSIONS, &Dimensions::standard())?;
        }

        tracing::info!(
            root = %self.root.display(),
            partitions = output.by_dest.len() + output.by_origin.len() + output.by_dest_attr.len(),
            rows = output.summary.total_rows,
            "cache written"
        );
        Ok(())
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn manifest_of(output: &BuildOutput) -> Manifest {
    Manifest {
        by_dest: output
            .by_dest
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect(),
        by_origin: output
            .by_origin
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect(),
        by_dest_attr: output
            .by_dest_attr
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect(),
    }
}

/// Convenience used by tests and the `inspect` command.
pub fn read_json<T: serde::de::DeserializeOwned>(root: &Path, key: &str) -> Result<T> {
    let path = root.join(key);
    let bytes =
        std::fs::read(&path).with_context(|| format!("reading artifact {}", path.display()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{build_cache, GeoIndex};
    use flowcache_model::artifact::Summary;
    use flowcache_model::record::{Demographics, FlowRecord};
    use flowcache_model::GeoEntity;

    fn sample_output() -> (BuildOutput, Vec<GeoEntity>) {
        let counties = vec![GeoEntity {
            geoid: "06037".to_string(),
            state: "06".to_string(),
            state_name: "California".to_string(),
            name: "Los Angeles".to_string(),
            lon: Some(-118.2),
            lat: Some(34.0),
        }];
        let geo = GeoIndex::new(counties.clone(), Vec::new());
        let records = vec![FlowRecord {
            origin: "36".to_string(),
            dest: "06037".to_string(),
            observed: 42.0,
            predicted: 40.0,
            demographics: Demographics::default(),
            attribution: None,
        }];
        (build_cache(&records, &[], &geo), counties)
    }

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (output, counties) = sample_output();
        CacheWriter::new(dir.path()).write_all(&output, &counties).unwrap();

        let partition: Partition = read_json(dir.path(), &keys::by_dest("06")).unwrap();
        assert_eq!(partition.code, "06");
        assert_eq!(partition.kind, PartitionKind::ByDest);
        assert_eq!(partition.rows.len(), 1);
        assert_eq!(partition.rows[0].observed, 42.0);

        let summary: Summary = read_json(dir.path(), keys::SUMMARY).unwrap();
        assert_eq!(summary.total_rows, 1);

        let manifest: Manifest = read_json(dir.path(), keys::INDEX).unwrap();
        assert_eq!(manifest.by_dest["06"], 1);
        assert_eq!(manifest.by_origin["036"], 1);
        assert!(manifest.by_dest_attr.is_empty());

        // no attribution columns -> no schema artifact
        assert!(!dir.path().join(keys::ATTR_SCHEMA).exists());
        // no demographic tags -> no dimensions artifact
        assert!(!dir.path().join(keys::DIMENSIONS).exists());
    }

    #[test]
    fn rewrites_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (output, counties) = sample_output();
        let writer = CacheWriter::new(dir.path());
        writer.write_all(&output, &counties).unwrap();
        let first = std::fs::read(dir.path().join(keys::SUMMARY)).unwrap();
        writer.write_all(&output, &counties).unwrap();
        let second = std::fs::read(dir.path().join(keys::SUMMARY)).unwrap();
        assert_eq!(first, second);
    }
}
