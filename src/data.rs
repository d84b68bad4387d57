mod class_iou;
mod filesystem_access;
mod palette;
mod time_calc;
pub mod send_channels;

pub use class_iou::ClassIou;
pub use filesystem_access::{rm_file, rmrf_mkdir, FsAccess};
pub use palette::{colorize_mask, Palette};
pub use time_calc::Timer;
