use serde::{Deserialize, Serialize};

/// IoU of one class over a validation pass.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassIou {
    pub id: usize,
    pub label: String,
    pub iou: f64,
}

impl ClassIou {
    pub fn new(id: usize, label: String, iou: f64) -> Self {
        Self {
            id,
            label,
            iou,
        }
    }

    /// False when the class had no support in truth or prediction.
    pub fn is_defined(&self) -> bool {
        !self.iou.is_nan()
    }

    pub fn percent(&self) -> f64 {
        self.iou * 100.
    }
}
