/// Where a run is placed, derived from the configured GPU id list.
///
/// The ndarray backend always computes on the CPU thread pool; the GPU ids are
/// kept so experiment logs record the requested placement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum ComputeDevice {
    #[default] CPU,
    CUDA(usize),
    DataParallel(Vec<usize>),
}

// Hardcoded device names. Storing the "proper" spelling and the lowercase version.
const CPU: [&str; 2] = ["CPU", "cpu"];
const CUDA: [&str; 2] = ["CUDA", "cuda"];
const DATA_PARALLEL: [&str; 2] = ["DataParallel", "dataparallel"];

impl ComputeDevice {
    pub fn from_gpu_ids(gpu_ids: &[usize]) -> Self {
        match gpu_ids {
            [] => ComputeDevice::CPU,
            [id] => ComputeDevice::CUDA(*id),
            ids => ComputeDevice::DataParallel(ids.to_vec()),
        }
    }

    pub fn from_str(device: &str, device_ids: &[usize]) -> Option<Self> {
        match device.to_lowercase().as_str() {
            "cpu" => Some(ComputeDevice::CPU),
            "cuda" => Some(ComputeDevice::CUDA(device_ids.first().copied().unwrap_or(0))),
            "dataparallel" if device_ids.len() > 1 => Some(ComputeDevice::DataParallel(device_ids.to_vec())),
            _ => None,
        }
    }

    pub fn str(&self) -> &'static str {
        match self {
            ComputeDevice::CPU => CPU[0],
            ComputeDevice::CUDA(_) => CUDA[0],
            ComputeDevice::DataParallel(_) => DATA_PARALLEL[0],
        }
    }

    pub fn str_lowercase(&self) -> &'static str {
        match self {
            ComputeDevice::CPU => CPU[1],
            ComputeDevice::CUDA(_) => CUDA[1],
            ComputeDevice::DataParallel(_) => DATA_PARALLEL[1],
        }
    }

    pub fn device_ids(&self) -> Vec<usize> {
        match self {
            ComputeDevice::CPU => vec![],
            ComputeDevice::CUDA(id) => vec![*id],
            ComputeDevice::DataParallel(ids) => ids.clone(),
        }
    }

    pub fn is_accelerator(&self) -> bool {
        !matches!(self, ComputeDevice::CPU)
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::CPU => write!(f, "{}", self.str()),
            _ => write!(f, "{}{:?}", self.str(), self.device_ids()),
        }
    }
}
