mod batch;
mod compute_device;
mod reduction;
mod train_config;

pub use batch::*;
pub use compute_device::*;
pub use reduction::*;
pub use train_config::*;
