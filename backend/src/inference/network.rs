use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, TchError, Tensor};

/// A frozen forward pass. Implementations must not mutate any state, so a
/// single instance can be shared across request threads.
pub trait Network: Send + Sync {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TchError>;

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// A TorchScript module loaded once at startup and kept in eval mode.
pub struct TorchScriptNetwork {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptNetwork {
    pub fn load(path: &Path, device: Device) -> Result<Self, TchError> {
        log::info!("Loading TorchScript module {} on {:?}", path.display(), device);
        let mut module = CModule::load_on_device(path, device)?;
        module.set_eval();
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl Network for TorchScriptNetwork {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TchError> {
        // Weights are never written, so a poisoned lock is still usable.
        let module = self.module.lock().unwrap_or_else(|e| e.into_inner());
        module.forward_ts(&[input])
    }

    fn device(&self) -> Device {
        self.device
    }
}
