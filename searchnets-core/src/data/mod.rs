//! Datasets, transforms and batch loading.
//!
//! [`select_dataset`] is the single place that turns a dataset kind plus a
//! split file into a dataset handle. Handles are read-only and shared by
//! reference across every job in a run.

pub mod loader;
pub mod searchstims;
pub mod transforms;
pub mod vsd;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::DatasetType;
use crate::error::{ConfigError, Result};

pub use loader::{Batch, DataLoader};
pub use searchstims::Searchstims;
pub use transforms::{
    ImageTensor, RawLabel, StandardTransforms, Target, TargetTransform, Transform,
    TransformProvider, VOC_CLASSES, VSD_PAD_SIZE,
};
pub use vsd::VocDetection;

/// Which rows of the split file a dataset reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transformed example.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: ImageTensor,
    pub target: Target,
    /// Present only for datasets built with `return_set_size`.
    pub set_size: Option<u32>,
}

/// Random-access dataset of transformed samples.
pub trait Dataset: Send + Sync {
    fn split(&self) -> Split;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;

    /// Sorted unique set sizes, empty unless the dataset reports them.
    fn set_sizes(&self) -> Vec<u32> {
        Vec::new()
    }
}

/// Build the dataset for one split.
///
/// `root` is only used for VSD, which downloads the VOC corpus there if it is absent.
/// `return_set_size` is only valid for searchstims.
pub fn select_dataset(
    dataset_type: DatasetType,
    csv_file: &Path,
    root: Option<&Path>,
    split: Split,
    transform: Arc<dyn Transform>,
    target_transform: Option<Arc<dyn TargetTransform>>,
    return_set_size: bool,
) -> Result<Arc<dyn Dataset>> {
    match dataset_type {
        DatasetType::Searchstims => {
            let dataset = Searchstims::new(csv_file, split, transform, return_set_size)?;
            Ok(Arc::new(match target_transform {
                Some(t) => dataset.with_target_transform(t),
                None => dataset,
            }))
        }
        DatasetType::Vsd => {
            if return_set_size {
                return Err(ConfigError::inconsistent(
                    "can only measure accuracy by set size with searchstims stimuli, not VSD dataset",
                )
                .into());
            }
            let root = root.ok_or_else(|| ConfigError::MissingField {
                field: "data.root".to_string(),
            })?;
            let target_transform = target_transform.ok_or_else(|| {
                ConfigError::inconsistent("VSD dataset requires a target transform")
            })?;
            let dataset =
                VocDetection::new(root, csv_file, split, true, transform, target_transform)?;
            Ok(Arc::new(dataset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossFunc;
    use crate::error::SearchnetsError;
    use std::path::PathBuf;

    #[test]
    fn test_vsd_rejects_set_size_view() {
        let (transform, target) = StandardTransforms::new(8)
            .transforms(DatasetType::Vsd, LossFunc::Ce, VSD_PAD_SIZE)
            .unwrap();
        let result = select_dataset(
            DatasetType::Vsd,
            &PathBuf::from("split.csv"),
            Some(Path::new("/tmp")),
            Split::Train,
            transform,
            target,
            true,
        );
        assert!(matches!(result, Err(SearchnetsError::Config(_))));
    }

    #[test]
    fn test_vsd_requires_root() {
        let (transform, target) = StandardTransforms::new(8)
            .transforms(DatasetType::Vsd, LossFunc::Bce, VSD_PAD_SIZE)
            .unwrap();
        let result = select_dataset(
            DatasetType::Vsd,
            &PathBuf::from("split.csv"),
            None,
            Split::Train,
            transform,
            target,
            false,
        );
        assert!(matches!(
            result,
            Err(SearchnetsError::Config(ConfigError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_split_names() {
        assert_eq!(Split::Train.to_string(), "train");
        assert_eq!(Split::Val.as_str(), "val");
    }
}
