use image::{Rgb, RgbImage};
use ndarray::ArrayView2;

/// Label colour table, index = class id.
#[derive(Debug, Clone)]
pub struct Palette(pub Vec<[u8; 3]>);

impl Default for Palette {
    fn default() -> Self {
        Self(vec![
            [0, 0, 0],
            [128, 0, 128],
            [0, 255, 0],
            [255, 0, 0],
            [0, 0, 255],
            [255, 255, 0],
            [0, 255, 255],
            [255, 0, 255],
        ])
    }
}

impl Palette {
    pub fn colour(&self, class: i64) -> Rgb<u8> {
        usize::try_from(class)
            .ok()
            .and_then(|i| self.0.get(i))
            .map(|c| Rgb(*c))
            .unwrap_or(Rgb([0, 0, 0]))
    }
}

/// Paints a `[H, W]` label map with `palette`. Ignore and unknown labels are black.
pub fn colorize_mask(mask: ArrayView2<i64>, palette: &Palette) -> RgbImage {
    let (h, w) = mask.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| palette.colour(mask[[y as usize, x as usize]]))
}
