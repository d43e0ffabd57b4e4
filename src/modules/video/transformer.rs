use thiserror::Error;

use super::model::Frame;

/// Gaussians kept per pixel.
const MAX_MODES: usize = 3;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("frame is {got_w}x{got_h} but the background model is {want_w}x{want_h}")]
    DimensionMismatch {
        want_w: u32,
        want_h: u32,
        got_w: u32,
        got_h: u32,
    },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Tuning for the per-pixel mixture model. Defaults mirror the usual MOG2 values.
#[derive(Debug, Clone, Copy)]
pub struct SubtractorParams {
    /// Number of frames after which the learning rate stops shrinking.
    pub history: u32,
    /// Squared Mahalanobis distance under which a sample matches a mode.
    pub var_threshold: f32,
    /// Cumulative weight the background modes must cover.
    pub background_ratio: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
}

impl Default for SubtractorParams {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            background_ratio: 0.9,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    var: f32,
}

/// Running mixture-of-Gaussians background model for one video.
///
/// Each call to [`apply`](Self::apply) updates the model with the new frame and
/// returns a single-channel mask of the same size: 255 where the pixel does not
/// fit the background, 0 elsewhere. Frames must arrive in temporal order.
pub struct BackgroundSubtractor {
    params: SubtractorParams,
    dims: Option<(u32, u32)>,
    modes: Vec<Mode>,
    used: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundSubtractor {
    pub fn new(params: SubtractorParams) -> Self {
        Self {
            params,
            dims: None,
            modes: Vec::new(),
            used: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn apply(&mut self, frame: &Frame) -> Result<Frame, TransformError> {
        let expected = Frame::expected_len(frame.width, frame.height, frame.channels);
        if frame.data.len() != expected {
            return Err(TransformError::BufferSize {
                expected,
                actual: frame.data.len(),
            });
        }

        match self.dims {
            None => {
                let pixels = frame.pixel_count();
                self.dims = Some((frame.width, frame.height));
                self.modes = vec![Mode::default(); pixels * MAX_MODES];
                self.used = vec![0; pixels];
            }
            Some((w, h)) if (w, h) != (frame.width, frame.height) => {
                return Err(TransformError::DimensionMismatch {
                    want_w: w,
                    want_h: h,
                    got_w: frame.width,
                    got_h: frame.height,
                });
            }
            Some(_) => {}
        }

        self.frames_seen += 1;
        let alpha = 1.0 / self.frames_seen.min(self.params.history.max(1) as u64) as f32;

        let mut mask = vec![BACKGROUND; frame.pixel_count()];
        for (p, out) in mask.iter_mut().enumerate() {
            let modes = &mut self.modes[p * MAX_MODES..(p + 1) * MAX_MODES];
            *out = update_pixel(modes, &mut self.used[p], frame.luma(p), alpha, &self.params);
        }

        Ok(Frame::new(frame.width, frame.height, 1, mask))
    }
}

/// Classifies one sample against its pixel's modes, then folds it into them.
/// Modes stay sorted by descending weight.
fn update_pixel(modes: &mut [Mode], used: &mut u8, x: f32, alpha: f32, params: &SubtractorParams) -> u8 {
    let n = *used as usize;

    let mut matched = None;
    let mut is_background = false;
    let mut cumulative = 0.0;
    for (i, m) in modes[..n].iter().enumerate() {
        let d = x - m.mean;
        if matched.is_none() && d * d < params.var_threshold * m.var {
            matched = Some(i);
            is_background = cumulative < params.background_ratio;
        }
        cumulative += m.weight;
    }

    for m in modes[..n].iter_mut() {
        m.weight *= 1.0 - alpha;
    }

    let touched = match matched {
        Some(i) => {
            let m = &mut modes[i];
            m.weight += alpha;
            let rho = alpha / m.weight;
            let d = x - m.mean;
            m.mean += rho * d;
            m.var = (m.var + rho * (d * d - m.var)).clamp(params.var_min, params.var_max);
            i
        }
        None => {
            let slot = if n < MAX_MODES {
                *used += 1;
                n
            } else {
                MAX_MODES - 1
            };
            modes[slot] = Mode {
                weight: alpha,
                mean: x,
                var: params.var_init,
            };
            slot
        }
    };

    let active = *used as usize;
    let total: f32 = modes[..active].iter().map(|m| m.weight).sum();
    if total > 0.0 {
        for m in modes[..active].iter_mut() {
            m.weight /= total;
        }
    }

    let mut j = touched;
    while j > 0 && modes[j].weight > modes[j - 1].weight {
        modes.swap(j, j - 1);
        j -= 1;
    }

    if is_background { BACKGROUND } else { FOREGROUND }
}
