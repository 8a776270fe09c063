//! Strength curves used for distance falloff and height remapping.
//!
//! A curve maps a parameter in `[0,1]` to a multiplier. For falloff the
//! parameter is the normalized radial distance from the stamp center (0 at the
//! pivot, 1 at the corner); for height remapping it is the stamp's normalized
//! height. All variants clamp the input into `[0,1]` before evaluating.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Curve {
    /// Fixed multiplier regardless of distance.
    Constant(f32),
    /// `f(t) = t`, useful as a pass-through remap.
    Identity,
    /// `f(t) = 1 - t`: linear fade from full strength to zero.
    LinearFade,
    /// Smoothstep fade from 1 at the center to 0 at the edge.
    SmoothFade,
    /// `f(t) = (1 - t)^p`: sharper fade for larger `p`.
    PowerFade(f32),
    /// Piecewise-linear keyframes `(t, value)`, sorted by `t`. Evaluation
    /// clamps to the first/last keyframe outside the covered range.
    Points(Vec<(f32, f32)>),
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Constant(1.0)
    }
}

impl Curve {
    /// Check that [`Curve::Points`] keyframes are sorted by parameter; the
    /// piecewise-linear evaluation assumes that order. Other variants are
    /// always well-formed.
    pub fn validate(&self) -> Result<(), String> {
        if let Curve::Points(points) = self {
            for pair in points.windows(2) {
                if pair[1].0 < pair[0].0 {
                    return Err(format!(
                        "keyframes out of order: {} after {}",
                        pair[1].0, pair[0].0
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Curve::Constant(v) => *v,
            Curve::Identity => t,
            Curve::LinearFade => 1.0 - t,
            Curve::SmoothFade => {
                let s = t * t * (3.0 - 2.0 * t);
                1.0 - s
            }
            Curve::PowerFade(p) => (1.0 - t).powf(p.max(0.0)),
            Curve::Points(points) => {
                if points.is_empty() {
                    return 1.0;
                }
                if t <= points[0].0 {
                    return points[0].1;
                }
                for pair in points.windows(2) {
                    let (t0, v0) = pair[0];
                    let (t1, v1) = pair[1];
                    if t <= t1 {
                        let span = t1 - t0;
                        if span <= f32::EPSILON {
                            return v1;
                        }
                        let f = (t - t0) / span;
                        return v0 + (v1 - v0) * f;
                    }
                }
                points[points.len() - 1].1
            }
        }
    }
}
