//! Visual Search Difficulty dataset, backed by Pascal VOC 2012 images.
//!
//! The VOC corpus lives under `root/VOCdevkit/VOC2012`. When it is missing
//! and downloading is allowed, the trainval archive is fetched into `root`
//! and unpacked with the system `tar`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use super::transforms::{RawLabel, TargetTransform, Transform};
use super::{Dataset, Sample, Split};
use crate::error::{ResourceError, Result};

pub const VOC_TRAINVAL_URL: &str =
    "http://host.robots.ox.ac.uk/pascal/VOC/voc2012/VOCtrainval_11-May-2012.tar";
const VOC_ARCHIVE_NAME: &str = "VOCtrainval_11-May-2012.tar";

#[derive(Debug, Deserialize)]
struct Row {
    img: String,
    split: String,
    classes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VocRecord {
    image_path: PathBuf,
    classes: Vec<String>,
}

pub struct VocDetection {
    split: Split,
    records: Vec<VocRecord>,
    transform: Arc<dyn Transform>,
    target_transform: Arc<dyn TargetTransform>,
}

impl VocDetection {
    pub fn new(
        root: &Path,
        csv_file: &Path,
        split: Split,
        download: bool,
        transform: Arc<dyn Transform>,
        target_transform: Arc<dyn TargetTransform>,
    ) -> Result<Self> {
        let voc_dir = voc_dir(root);
        if !voc_dir.exists() {
            if !download {
                return Err(ResourceError::DatasetRootMissing { path: voc_dir }.into());
            }
            download_voc(root)?;
        }
        let records = read_records(&voc_dir, csv_file, split)?;
        tracing::debug!(csv = %csv_file.display(), %split, samples = records.len(), "loaded VSD split");
        Ok(Self {
            split,
            records,
            transform,
            target_transform,
        })
    }
}

impl Dataset for VocDetection {
    fn split(&self) -> Split {
        self.split
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let record = &self.records[index];
        let image = self.transform.apply(&record.image_path)?;
        let target = self
            .target_transform
            .apply(&RawLabel::Classes(record.classes.clone()))?;
        Ok(Sample {
            image,
            target,
            set_size: None,
        })
    }
}

fn voc_dir(root: &Path) -> PathBuf {
    root.join("VOCdevkit").join("VOC2012")
}

fn read_records(voc_dir: &Path, csv_file: &Path, split: Split) -> Result<Vec<VocRecord>> {
    let images = voc_dir.join("JPEGImages");
    let mut reader = csv::Reader::from_path(csv_file)?;
    let mut records = Vec::new();
    for result in reader.deserialize::<Row>() {
        let row = result?;
        if row.split != split.as_str() {
            continue;
        }
        let classes = row
            .classes
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        records.push(VocRecord {
            image_path: images.join(format!("{}.jpg", row.img)),
            classes,
        });
    }
    Ok(records)
}

/// Fetch and unpack the VOC 2012 trainval archive into `root`. Not retried.
pub fn download_voc(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let archive = root.join(VOC_ARCHIVE_NAME);
    if !archive.exists() {
        tracing::info!(url = VOC_TRAINVAL_URL, dest = %archive.display(), "downloading VOC 2012");
        let download_err = |message: String| ResourceError::Download {
            url: VOC_TRAINVAL_URL.to_string(),
            message,
        };
        let mut response = reqwest::blocking::get(VOC_TRAINVAL_URL)
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?;
        let partial = archive.with_extension("part");
        let mut file = std::fs::File::create(&partial)?;
        response
            .copy_to(&mut file)
            .map_err(|e| download_err(e.to_string()))?;
        std::fs::rename(&partial, &archive)?;
    }

    tracing::info!(archive = %archive.display(), "unpacking VOC 2012");
    let status = Command::new("tar")
        .arg("-xf")
        .arg(&archive)
        .arg("-C")
        .arg(root)
        .status()?;
    if !status.success() {
        return Err(ResourceError::Download {
            url: VOC_TRAINVAL_URL.to_string(),
            message: format!("tar exited with {status}"),
        }
        .into());
    }
    let voc_dir = voc_dir(root);
    if !voc_dir.exists() {
        return Err(ResourceError::DatasetRootMissing { path: voc_dir }.into());
    }
    Ok(())
}
