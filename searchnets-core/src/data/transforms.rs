//! Image and target transforms.
//!
//! Decoding and resizing use the `image` crate. Images are normalized with
//! the ImageNet channel statistics so pretrained weights see the input
//! distribution they were trained on.

use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use crate::config::{DatasetType, LossFunc};
use crate::error::{ConfigError, ResourceError, Result};

/// Size VSD images are padded to before resizing.
pub const VSD_PAD_SIZE: u32 = 500;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pascal VOC object classes, in the order used for multi-hot targets.
pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Channel-major image data.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    /// Single-channel tensor over a flat vector, convenient for synthetic data.
    pub fn flat(data: Vec<f32>) -> Self {
        let width = data.len();
        Self::new(1, 1, width, data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Label as it is stored in the split file, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLabel {
    /// Searchstims: whether the target is present.
    TargetPresent(bool),
    /// VSD: VOC classes present in the image, in file order.
    Classes(Vec<String>),
}

/// Encoded training target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Class index, for cross-entropy.
    Class(usize),
    /// One entry per label, for binary cross-entropy.
    MultiHot(Vec<f32>),
}

impl Target {
    /// Default encoding when no target transform is configured.
    pub fn from_raw(label: &RawLabel) -> Result<Self> {
        match label {
            RawLabel::TargetPresent(present) => Ok(Target::Class(usize::from(*present))),
            RawLabel::Classes(_) => Err(ConfigError::inconsistent(
                "multi-class labels need a target transform",
            )
            .into()),
        }
    }
}

pub trait Transform: Send + Sync {
    fn apply(&self, path: &Path) -> Result<ImageTensor>;
}

pub trait TargetTransform: Send + Sync {
    fn apply(&self, label: &RawLabel) -> Result<Target>;
}

/// Resolves the transform pair for a dataset kind and loss function.
pub trait TransformProvider: Send + Sync {
    /// `pad_size` only affects VSD.
    fn transforms(
        &self,
        dataset_type: DatasetType,
        loss_func: LossFunc,
        pad_size: u32,
    ) -> Result<(Arc<dyn Transform>, Option<Arc<dyn TargetTransform>>)>;
}

/// Decode, optionally pad, resize to a square and normalize.
#[derive(Debug, Clone)]
pub struct StandardTransforms {
    image_size: u32,
    seed: Option<u64>,
}

impl StandardTransforms {
    pub fn new(image_size: u32) -> Self {
        Self {
            image_size,
            seed: None,
        }
    }

    /// Seed the random placement used when padding VSD images.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl TransformProvider for StandardTransforms {
    fn transforms(
        &self,
        dataset_type: DatasetType,
        loss_func: LossFunc,
        pad_size: u32,
    ) -> Result<(Arc<dyn Transform>, Option<Arc<dyn TargetTransform>>)> {
        let pad = match dataset_type {
            DatasetType::Searchstims => None,
            DatasetType::Vsd => {
                if pad_size == 0 {
                    return Err(ConfigError::invalid("pad_size", "must be positive").into());
                }
                let seed = self.seed.unwrap_or_else(rand::random);
                Some(RandomPad {
                    size: pad_size,
                    seed,
                })
            }
        };
        let transform = ImageNetTransform {
            image_size: self.image_size,
            pad,
        };
        let targets = StandardTargets {
            dataset_type,
            loss_func,
        };
        Ok((Arc::new(transform), Some(Arc::new(targets))))
    }
}

/// The offset depends only on the seed and the image path, so it does not
/// change with the order loader threads pick samples.
struct RandomPad {
    size: u32,
    seed: u64,
}

impl RandomPad {
    fn rng_for(&self, path: &Path) -> StdRng {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        StdRng::seed_from_u64(self.seed ^ u64::from_le_bytes(head))
    }

    /// Place the image at a random offset on a black square canvas.
    fn apply(&self, path: &Path, img: RgbImage) -> RgbImage {
        let img = if img.width() > self.size || img.height() > self.size {
            let scale = self.size as f32 / img.width().max(img.height()) as f32;
            let w = ((img.width() as f32 * scale) as u32).clamp(1, self.size);
            let h = ((img.height() as f32 * scale) as u32).clamp(1, self.size);
            imageops::resize(&img, w, h, FilterType::Triangle)
        } else {
            img
        };
        let mut rng = self.rng_for(path);
        let x = rng.gen_range(0..=self.size - img.width());
        let y = rng.gen_range(0..=self.size - img.height());
        let mut canvas = RgbImage::new(self.size, self.size);
        imageops::replace(&mut canvas, &img, i64::from(x), i64::from(y));
        canvas
    }
}

struct ImageNetTransform {
    image_size: u32,
    pad: Option<RandomPad>,
}

impl Transform for ImageNetTransform {
    fn apply(&self, path: &Path) -> Result<ImageTensor> {
        let img = image::open(path)
            .map_err(|e| ResourceError::Image {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .to_rgb8();
        let img = match &self.pad {
            Some(pad) => pad.apply(path, img),
            None => img,
        };
        let img = imageops::resize(&img, self.image_size, self.image_size, FilterType::Triangle);
        Ok(normalize(&img))
    }
}

fn normalize(img: &RgbImage) -> ImageTensor {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * plane + offset] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    ImageTensor::new(3, height, width, data)
}

/// Class index for cross-entropy, multi-hot vector for binary cross-entropy.
struct StandardTargets {
    dataset_type: DatasetType,
    loss_func: LossFunc,
}

impl TargetTransform for StandardTargets {
    fn apply(&self, label: &RawLabel) -> Result<Target> {
        match (label, self.loss_func) {
            (RawLabel::TargetPresent(present), LossFunc::Ce) => {
                Ok(Target::Class(usize::from(*present)))
            }
            (RawLabel::TargetPresent(present), LossFunc::Bce) => {
                let p = if *present { 1.0 } else { 0.0 };
                Ok(Target::MultiHot(vec![1.0 - p, p]))
            }
            (RawLabel::Classes(names), loss) => {
                let indices = names
                    .iter()
                    .map(|name| voc_class_index(name))
                    .collect::<Result<Vec<_>>>()?;
                match loss {
                    LossFunc::Ce => indices.first().copied().map(Target::Class).ok_or_else(|| {
                        ConfigError::inconsistent(format!(
                            "{} image without any labelled class",
                            self.dataset_type
                        ))
                        .into()
                    }),
                    LossFunc::Bce => {
                        let mut hot = vec![0.0; VOC_CLASSES.len()];
                        for ind in indices {
                            hot[ind] = 1.0;
                        }
                        Ok(Target::MultiHot(hot))
                    }
                }
            }
        }
    }
}

fn voc_class_index(name: &str) -> Result<usize> {
    VOC_CLASSES
        .iter()
        .position(|c| *c == name)
        .ok_or_else(|| ConfigError::choice("VOC class", name, &VOC_CLASSES).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn targets(dataset_type: DatasetType, loss_func: LossFunc) -> StandardTargets {
        StandardTargets {
            dataset_type,
            loss_func,
        }
    }

    #[test]
    fn test_searchstims_targets() {
        let ce = targets(DatasetType::Searchstims, LossFunc::Ce);
        assert_eq!(
            ce.apply(&RawLabel::TargetPresent(true)).unwrap(),
            Target::Class(1)
        );
        let bce = targets(DatasetType::Searchstims, LossFunc::Bce);
        assert_eq!(
            bce.apply(&RawLabel::TargetPresent(false)).unwrap(),
            Target::MultiHot(vec![1.0, 0.0])
        );
    }

    #[test]
    fn test_voc_multi_hot() {
        let bce = targets(DatasetType::Vsd, LossFunc::Bce);
        let label = RawLabel::Classes(vec!["cat".into(), "dog".into()]);
        let Target::MultiHot(hot) = bce.apply(&label).unwrap() else {
            panic!("expected multi-hot target");
        };
        assert_eq!(hot.len(), 20);
        assert_eq!(hot.iter().sum::<f32>(), 2.0);
        assert_eq!(hot[7], 1.0);
        assert_eq!(hot[11], 1.0);
    }

    #[test]
    fn test_voc_unknown_class() {
        let ce = targets(DatasetType::Vsd, LossFunc::Ce);
        let label = RawLabel::Classes(vec!["unicorn".into()]);
        assert!(ce.apply(&label).is_err());
    }

    #[test]
    fn test_random_pad_keeps_image_inside_canvas() {
        let pad = RandomPad { size: 10, seed: 0 };
        let img = RgbImage::from_pixel(4, 6, Rgb([255, 255, 255]));
        let padded = pad.apply(Path::new("a.jpg"), img);
        assert_eq!(padded.dimensions(), (10, 10));
        let white = padded.pixels().filter(|p| p.0 == [255, 255, 255]).count();
        assert_eq!(white, 24);
    }

    #[test]
    fn test_random_pad_ignores_call_order() {
        let pad = RandomPad { size: 64, seed: 3 };
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let paths: Vec<String> = (0..8).map(|i| format!("JPEGImages/{i}.jpg")).collect();
        let forward: Vec<RgbImage> = paths
            .iter()
            .map(|p| pad.apply(Path::new(p), img.clone()))
            .collect();
        let mut backward: Vec<RgbImage> = paths
            .iter()
            .rev()
            .map(|p| pad.apply(Path::new(p), img.clone()))
            .collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert!(forward.iter().any(|p| *p != forward[0]));

        let reseeded = RandomPad { size: 64, seed: 4 };
        let moved = paths
            .iter()
            .zip(&forward)
            .any(|(p, padded)| reseeded.apply(Path::new(p), img.clone()) != *padded);
        assert!(moved);
    }

    #[test]
    fn test_normalize_layout() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let tensor = normalize(&img);
        assert_eq!(tensor.len(), 12);
        assert!((tensor.data[0] - (-IMAGENET_MEAN[0] / IMAGENET_STD[0])).abs() < 1e-6);
        assert!((tensor.data[4] - (-IMAGENET_MEAN[1] / IMAGENET_STD[1])).abs() < 1e-6);
    }

    #[test]
    fn test_transform_reads_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stim.png");
        RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        let (transform, _) = StandardTransforms::new(8)
            .transforms(DatasetType::Searchstims, LossFunc::Ce, VSD_PAD_SIZE)
            .unwrap();
        let tensor = transform.apply(&path).unwrap();
        assert_eq!((tensor.channels, tensor.height, tensor.width), (3, 8, 8));
    }
}
