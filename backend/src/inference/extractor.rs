use ndarray::Array4;
use std::sync::Arc;
use tch::{Device, Kind, Tensor};

use super::InferenceError;
use super::network::Network;
use crate::config::TensorLayout;

/// Frozen convolutional backbone that turns a preprocessed batch into a
/// flat feature vector.
#[derive(Clone)]
pub struct FeatureExtractor {
    network: Arc<dyn Network>,
    layout: TensorLayout,
    image_size: u32,
}

impl FeatureExtractor {
    pub fn new(network: Arc<dyn Network>, layout: TensorLayout, image_size: u32) -> Self {
        Self {
            network,
            layout,
            image_size,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Runs the backbone without gradient tracking and flattens its output
    /// in NHWC order.
    pub fn extract(&self, batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let side = self.image_size as usize;
        if batch.shape() != &[1, side, side, 3] {
            return Err(InferenceError::Preprocessing(format!(
                "expected batch of shape [1, {side}, {side}, 3], got {:?}",
                batch.shape()
            )));
        }

        let data = batch.as_slice().ok_or_else(|| {
            InferenceError::Preprocessing("batch is not contiguous".to_string())
        })?;
        let side = side as i64;
        let input = Tensor::from_slice(data)
            .view([1, side, side, 3])
            .to_device(self.network.device());
        let input = match self.layout {
            TensorLayout::Nhwc => input,
            TensorLayout::Nchw => input.permute([0, 3, 1, 2]).contiguous(),
        };

        let output = tch::no_grad(|| self.network.forward(&input))?;
        let output = match self.layout {
            TensorLayout::Nchw if output.dim() == 4 => output.permute([0, 2, 3, 1]),
            _ => output,
        };

        let flat = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .contiguous()
            .view([-1]);
        Ok(Vec::<f32>::try_from(&flat)?)
    }

    /// Feature dimensionality, measured by running a blank image through the backbone.
    pub fn probe_dimension(&self) -> Result<usize, InferenceError> {
        let side = self.image_size as usize;
        let blank = Array4::<f32>::zeros((1, side, side, 3));
        Ok(self.extract(&blank)?.len())
    }
}
