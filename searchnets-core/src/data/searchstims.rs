//! Dataset over visual search stimuli generated by `searchstims`.
//!
//! Rows come from the split file; each row names an image, whether the
//! target is present, the stimulus type and its set size.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::transforms::{RawLabel, Target, TargetTransform, Transform};
use super::{Dataset, Sample, Split};
use crate::error::{ResourceError, Result};

#[derive(Debug, Deserialize)]
struct Row {
    img_file: PathBuf,
    #[serde(default)]
    root_output_dir: Option<PathBuf>,
    target_condition: String,
    set_size: u32,
    #[serde(default)]
    stimulus: Option<String>,
    split: String,
}

/// One stimulus, resolved from its split-file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusRecord {
    pub image_path: PathBuf,
    pub target_present: bool,
    pub set_size: u32,
    pub stimulus: Option<String>,
}

pub struct Searchstims {
    split: Split,
    records: Vec<StimulusRecord>,
    transform: Arc<dyn Transform>,
    target_transform: Option<Arc<dyn TargetTransform>>,
    return_set_size: bool,
}

impl Searchstims {
    pub fn new(
        csv_file: &Path,
        split: Split,
        transform: Arc<dyn Transform>,
        return_set_size: bool,
    ) -> Result<Self> {
        let records = read_records(csv_file, split)?;
        tracing::debug!(
            csv = %csv_file.display(),
            %split,
            samples = records.len(),
            "loaded searchstims split"
        );
        Ok(Self {
            split,
            records,
            transform,
            target_transform: None,
            return_set_size,
        })
    }

    pub fn with_target_transform(mut self, target_transform: Arc<dyn TargetTransform>) -> Self {
        self.target_transform = Some(target_transform);
        self
    }

    pub fn records(&self) -> &[StimulusRecord] {
        &self.records
    }
}

impl Dataset for Searchstims {
    fn split(&self) -> Split {
        self.split
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let record = &self.records[index];
        let image = self.transform.apply(&record.image_path)?;
        let label = RawLabel::TargetPresent(record.target_present);
        let target = match &self.target_transform {
            Some(t) => t.apply(&label)?,
            None => Target::from_raw(&label)?,
        };
        Ok(Sample {
            image,
            target,
            set_size: self.return_set_size.then_some(record.set_size),
        })
    }

    fn set_sizes(&self) -> Vec<u32> {
        if !self.return_set_size {
            return Vec::new();
        }
        let unique: BTreeSet<u32> = self.records.iter().map(|r| r.set_size).collect();
        unique.into_iter().collect()
    }
}

/// Read the rows of `csv_file` that belong to `split`.
pub fn read_records(csv_file: &Path, split: Split) -> Result<Vec<StimulusRecord>> {
    let base_dir = csv_file.parent().unwrap_or_else(|| Path::new("."));
    let mut reader = csv::Reader::from_path(csv_file)?;
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        let row: Row = record.deserialize(Some(&headers))?;
        if row.split != split.as_str() {
            continue;
        }
        let target_present = match row.target_condition.as_str() {
            "present" => true,
            "absent" => false,
            other => {
                return Err(ResourceError::InvalidRecord {
                    path: csv_file.to_path_buf(),
                    line,
                    message: format!(
                        "target_condition must be 'present' or 'absent', but was '{other}'"
                    ),
                }
                .into());
            }
        };
        let image_path = match &row.root_output_dir {
            Some(root) => root.join(&row.img_file),
            None => base_dir.join(&row.img_file),
        };
        records.push(StimulusRecord {
            image_path,
            target_present,
            set_size: row.set_size,
            stimulus: row.stimulus,
        });
    }
    Ok(records)
}
