use serde::{Deserialize, Serialize};

/// How an elementwise loss is folded into the returned value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default] Mean,
    Sum,
    None,
}

// Hardcoded reduction names. Storing the "proper" spelling and the lowercase version.
static MEAN: [&str; 2] = ["Mean", "mean"];
static SUM: [&str; 2] = ["Sum", "sum"];
static NONE: [&str; 2] = ["None", "none"];

impl Reduction {
    pub fn from_str(reduction: &str) -> Option<Self> {
        match reduction.to_lowercase().as_str() {
            "mean" => Some(Reduction::Mean),
            "sum" => Some(Reduction::Sum),
            "none" => Some(Reduction::None),
            _ => None,
        }
    }

    pub fn str(&self) -> &'static str {
        match self {
            Reduction::Mean => MEAN[0],
            Reduction::Sum => SUM[0],
            Reduction::None => NONE[0],
        }
    }

    pub fn str_lowercase(&self) -> &'static str {
        match self {
            Reduction::Mean => MEAN[1],
            Reduction::Sum => SUM[1],
            Reduction::None => NONE[1],
        }
    }

    pub fn all_reductions() -> Vec<String> {
        vec![
            Reduction::Mean.str_lowercase().to_string(),
            Reduction::Sum.str_lowercase().to_string(),
            Reduction::None.str_lowercase().to_string(),
        ]
    }

    pub fn is_valid_reduction(reduction: &str) -> bool {
        Reduction::from_str(reduction).is_some()
    }
}
