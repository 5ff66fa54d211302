use candle_core::{utils, Device};
use strum_macros::{Display, EnumString};

/// Where model weights are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ComputeDevice {
    /// CUDA when compiled in and present, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn create(&self) -> anyhow::Result<Device> {
        let device = match self {
            ComputeDevice::Cpu => Device::Cpu,
            ComputeDevice::Cuda => Device::new_cuda(0)?,
            ComputeDevice::Metal => Device::new_metal(0)?,
            ComputeDevice::Auto => {
                if utils::cuda_is_available() {
                    Device::new_cuda(0)?
                } else if utils::metal_is_available() {
                    Device::new_metal(0)?
                } else {
                    Device::Cpu
                }
            }
        };
        tracing::debug!("using device {:?}", device);
        Ok(device)
    }
}
