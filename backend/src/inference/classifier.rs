use shared::Category;
use std::sync::Arc;
use strum::EnumCount;
use tch::{Device, Kind, Tensor};

use super::network::Network;
use super::{InferenceError, Prediction};
use crate::config::Normalization;

const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// Pretrained head mapping a feature vector to scores over [`Category`].
#[derive(Clone)]
pub struct Classifier {
    network: Arc<dyn Network>,
    input_dim: usize,
    normalization: Normalization,
}

impl Classifier {
    /// Binds the head to the extractor's feature dimensionality and checks
    /// once that it accepts vectors of that size and emits one score per label.
    pub fn new(
        network: Arc<dyn Network>,
        input_dim: usize,
        normalization: Normalization,
    ) -> Result<Self, InferenceError> {
        let classifier = Self {
            network,
            input_dim,
            normalization,
        };
        classifier
            .scores(&vec![0.0; input_dim])
            .map_err(|e| match e {
                InferenceError::Model(err) => InferenceError::UnexpectedOutput(format!(
                    "classifier rejected {}-dimensional features: {}",
                    input_dim, err
                )),
                other => other,
            })?;
        Ok(classifier)
    }

    /// Probability distribution over the labels, in label order.
    pub fn classify(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let scores = self.scores(features)?;
        normalize(&scores, self.normalization)
    }

    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if features.len() != self.input_dim {
            return Err(InferenceError::ShapeMismatch {
                expected: self.input_dim,
                actual: features.len(),
            });
        }

        let input = Tensor::from_slice(features)
            .view([1, self.input_dim as i64])
            .to_device(self.network.device());
        let output = tch::no_grad(|| self.network.forward(&input))?;
        let output = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .contiguous()
            .view([-1]);
        let scores = Vec::<f32>::try_from(&output)?;

        if scores.len() != Category::COUNT {
            return Err(InferenceError::UnexpectedOutput(format!(
                "expected {} scores, got {}",
                Category::COUNT,
                scores.len()
            )));
        }
        Ok(scores)
    }
}

pub fn normalize(scores: &[f32], mode: Normalization) -> Result<Vec<f32>, InferenceError> {
    let probabilities = match mode {
        Normalization::None => scores.to_vec(),
        Normalization::Softmax => softmax(scores),
        Normalization::Auto if is_distribution(scores) => scores.to_vec(),
        Normalization::Auto => {
            log::debug!("Classifier scores are not a distribution, applying softmax");
            softmax(scores)
        }
    };

    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::UnexpectedOutput(format!(
            "non-finite scores {:?}",
            scores
        )));
    }
    Ok(probabilities)
}

fn is_distribution(scores: &[f32]) -> bool {
    let in_range = scores
        .iter()
        .all(|s| s.is_finite() && (0.0..=1.0).contains(s));
    in_range && (scores.iter().sum::<f32>() - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Picks the most probable label (first on ties) and reports it as a
/// percentage rounded to two decimals.
pub fn summarize(probabilities: Vec<f32>) -> Result<Prediction, InferenceError> {
    let (index, max) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, b)) if b >= p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| InferenceError::UnexpectedOutput("empty score vector".to_string()))?;

    let category = Category::from_index(index).ok_or_else(|| {
        InferenceError::UnexpectedOutput(format!("no label for output index {}", index))
    })?;

    Ok(Prediction {
        category,
        confidence: to_percentage(max),
        probabilities,
    })
}

fn to_percentage(probability: f32) -> f64 {
    let percent = (f64::from(probability) * 100.0).clamp(0.0, 100.0);
    (percent * 100.0).round() / 100.0
}
