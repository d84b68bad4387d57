mod histogram;
mod mean_iou;

pub use histogram::*;
pub use mean_iou::*;
