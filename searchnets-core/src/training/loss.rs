//! Loss functions and the loss selector.

use crate::config::LossFunc;
use crate::data::Target;
use crate::error::{ConfigError, Result, TrainingError};

/// Smallest probability fed to `ln`, keeps BCE finite on saturated outputs.
const PROB_EPS: f64 = 1e-7;

/// Loss applied to the scores a network produces for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    /// Softmax over the scores, negative log-likelihood of the target.
    CrossEntropy,
    /// Sigmoid on every score, mean binary cross-entropy. Multi-label.
    BinaryCrossEntropy,
}

/// Map a loss function to its criterion and whether network outputs must be
/// squashed into probabilities.
pub fn select_criterion(loss_func: LossFunc) -> (Criterion, bool) {
    let criterion = match loss_func {
        LossFunc::Ce => Criterion::CrossEntropy,
        LossFunc::Bce => Criterion::BinaryCrossEntropy,
    };
    (criterion, criterion.apply_sigmoid())
}

/// [`select_criterion`] for an unparsed name such as `"BCE"`.
pub fn select_criterion_by_name(name: &str) -> std::result::Result<(Criterion, bool), ConfigError> {
    let loss_func: LossFunc = name.parse()?;
    Ok(select_criterion(loss_func))
}

impl Criterion {
    pub fn apply_sigmoid(&self) -> bool {
        matches!(self, Criterion::BinaryCrossEntropy)
    }

    /// Loss for one sample and its gradient with respect to `scores`.
    pub fn loss_and_grad(&self, scores: &[f32], target: &Target) -> Result<(f64, Vec<f32>)> {
        let target = dense_target(scores.len(), target)?;
        match self {
            Criterion::CrossEntropy => {
                let probs = softmax(scores);
                let mass: f64 = target.iter().sum();
                let loss = -probs
                    .iter()
                    .zip(&target)
                    .map(|(&p, &t)| t * p.max(PROB_EPS).ln())
                    .sum::<f64>();
                let grad = probs
                    .iter()
                    .zip(&target)
                    .map(|(&p, &t)| (p * mass - t) as f32)
                    .collect();
                Ok((loss, grad))
            }
            Criterion::BinaryCrossEntropy => {
                let n = scores.len() as f64;
                let mut loss = 0.0;
                let mut grad = Vec::with_capacity(scores.len());
                for (&s, &t) in scores.iter().zip(&target) {
                    let p = sigmoid(f64::from(s));
                    let clamped = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
                    loss -= t * clamped.ln() + (1.0 - t) * (1.0 - clamped).ln();
                    grad.push(((p - t) / n) as f32);
                }
                Ok((loss / n, grad))
            }
        }
    }

    /// Whether the prediction for one sample matches its target.
    ///
    /// Multi-label targets count as correct only when every label matches.
    pub fn is_correct(&self, scores: &[f32], target: &Target) -> bool {
        match (self, target) {
            (_, Target::Class(class)) => argmax(scores) == Some(*class),
            (Criterion::BinaryCrossEntropy, Target::MultiHot(labels)) => {
                labels.len() == scores.len()
                    && scores
                        .iter()
                        .zip(labels)
                        .all(|(&s, &t)| (sigmoid(f64::from(s)) >= 0.5) == (t >= 0.5))
            }
            (Criterion::CrossEntropy, Target::MultiHot(labels)) => {
                let predicted = argmax(scores);
                predicted.is_some() && predicted == argmax(labels)
            }
        }
    }
}

fn dense_target(width: usize, target: &Target) -> Result<Vec<f64>> {
    match target {
        Target::Class(class) if *class < width => {
            let mut dense = vec![0.0; width];
            dense[*class] = 1.0;
            Ok(dense)
        }
        Target::Class(class) => Err(TrainingError::ShapeMismatch {
            name: "target class".to_string(),
            expected: width,
            actual: class + 1,
        }
        .into()),
        Target::MultiHot(labels) if labels.len() == width => {
            Ok(labels.iter().map(|&t| f64::from(t)).collect())
        }
        Target::MultiHot(labels) => Err(TrainingError::ShapeMismatch {
            name: "target labels".to_string(),
            expected: width,
            actual: labels.len(),
        }
        .into()),
    }
}

fn softmax(scores: &[f32]) -> Vec<f64> {
    let max = scores
        .iter()
        .map(|&s| f64::from(s))
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| (f64::from(s) - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_sigmoid_flag() {
        assert_eq!(
            select_criterion(LossFunc::Bce),
            (Criterion::BinaryCrossEntropy, true)
        );
        assert_eq!(
            select_criterion(LossFunc::Ce),
            (Criterion::CrossEntropy, false)
        );
        assert!(select_criterion_by_name("BCE").unwrap().1);
        assert!(!select_criterion_by_name("CE").unwrap().1);
        assert!(matches!(
            select_criterion_by_name("MSE"),
            Err(ConfigError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn test_cross_entropy_uniform_scores() {
        let (loss, grad) = Criterion::CrossEntropy
            .loss_and_grad(&[0.0, 0.0], &Target::Class(1))
            .unwrap();
        assert!((loss - 2f64.ln()).abs() < 1e-9);
        assert!((grad[0] - 0.5).abs() < 1e-6);
        assert!((grad[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bce_gradient_sign() {
        let (loss, grad) = Criterion::BinaryCrossEntropy
            .loss_and_grad(&[2.0, -2.0], &Target::MultiHot(vec![0.0, 1.0]))
            .unwrap();
        assert!(loss > 1.0);
        assert!(grad[0] > 0.0);
        assert!(grad[1] < 0.0);
    }

    #[test]
    fn test_target_out_of_range() {
        let err = Criterion::CrossEntropy.loss_and_grad(&[0.0, 1.0], &Target::Class(2));
        assert!(err.is_err());
        let err = Criterion::BinaryCrossEntropy
            .loss_and_grad(&[0.0, 1.0], &Target::MultiHot(vec![1.0]));
        assert!(err.is_err());
    }

    #[test]
    fn test_correctness() {
        let ce = Criterion::CrossEntropy;
        assert!(ce.is_correct(&[0.1, 0.9], &Target::Class(1)));
        assert!(!ce.is_correct(&[0.9, 0.1], &Target::Class(1)));

        let bce = Criterion::BinaryCrossEntropy;
        let labels = Target::MultiHot(vec![1.0, 0.0, 1.0]);
        assert!(bce.is_correct(&[3.0, -3.0, 0.5], &labels));
        assert!(!bce.is_correct(&[3.0, 3.0, 0.5], &labels));
    }
}
