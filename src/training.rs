mod data_loader;
mod experiment;
mod lr_schedule;
mod optimizer;
mod pixel_linear;
mod segmentation_model;
mod trainer;
mod validator;

pub use data_loader::*;
pub use experiment::*;
pub use lr_schedule::*;
pub use optimizer::*;
pub use pixel_linear::*;
pub use segmentation_model::*;
pub use trainer::*;
pub use validator::*;
