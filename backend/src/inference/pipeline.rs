use std::sync::Arc;
use std::time::Instant;

use super::classifier::{Classifier, summarize};
use super::extractor::FeatureExtractor;
use super::fetch::{FetchError, ensure_artifact};
use super::network::{Network, TorchScriptNetwork};
use super::preprocess::preprocess;
use super::{InferenceError, Prediction, Predictor};
use crate::config::{ModelsConfig, Normalization};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to fetch model artifact: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to load {name} model: {source}")]
    Load {
        name: &'static str,
        source: tch::TchError,
    },
    #[error("Model check failed: {0}")]
    Check(#[from] InferenceError),
}

/// Preprocessing, feature extraction and classification, in that order.
///
/// Both networks are loaded once and only read afterwards, so a single
/// pipeline is shared by every request.
#[derive(Clone)]
pub struct Pipeline {
    extractor: FeatureExtractor,
    classifier: Classifier,
}

impl Pipeline {
    /// Binds a classifier head to the extractor. The extractor's output size
    /// is measured once and the head is checked against it, so a mismatch
    /// fails here instead of on the first request.
    pub fn assemble(
        extractor: FeatureExtractor,
        classifier_net: Arc<dyn Network>,
        normalization: Normalization,
    ) -> Result<Self, InferenceError> {
        let features = extractor.probe_dimension()?;
        log::info!("Feature extractor produces {} features", features);
        let classifier = Classifier::new(classifier_net, features, normalization)?;
        Ok(Self {
            extractor,
            classifier,
        })
    }

    /// Fetches the extractor if needed, loads both networks and assembles
    /// the pipeline.
    pub async fn load(config: &ModelsConfig) -> Result<Self, StartupError> {
        let device = config.device.resolve();
        log::info!("Using device {:?}", device);

        let extractor_path = ensure_artifact(
            &config.extractor.path,
            config.extractor.url.as_deref(),
            config.extractor.sha256.as_deref(),
        )
        .await?;

        let extractor_net = TorchScriptNetwork::load(&extractor_path, device)
            .map_err(|source| StartupError::Load {
                name: "feature extractor",
                source,
            })?;
        let extractor = FeatureExtractor::new(
            Arc::new(extractor_net),
            config.extractor.layout,
            config.image_size,
        );

        let classifier_net = TorchScriptNetwork::load(&config.classifier.path, device)
            .map_err(|source| StartupError::Load {
                name: "classifier",
                source,
            })?;

        Ok(Self::assemble(
            extractor,
            Arc::new(classifier_net),
            config.normalization,
        )?)
    }
}

impl Predictor for Pipeline {
    fn predict(&self, image: &[u8]) -> Result<Prediction, InferenceError> {
        let start = Instant::now();
        let batch = preprocess(image, self.extractor.image_size())?;
        let features = self.extractor.extract(&batch)?;
        let probabilities = self.classifier.classify(&features)?;
        let prediction = summarize(probabilities)?;
        log::debug!(
            "Pipeline finished in {} ms: {:?}",
            start.elapsed().as_millis(),
            prediction.probabilities
        );
        Ok(prediction)
    }
}
