mod cross_entropy;
mod focal;
mod icnet_loss;

pub use cross_entropy::*;
pub use focal::*;
pub use icnet_loss::*;
