use serde::{Deserialize, Serialize};

use animanode_core::{AnimaError, AnimaResult, BlendMode, Color, Interpolation, Point2D};

/// A value type that keyframe tracks can hold.
///
/// Continuous types blend between keys; discrete types only support
/// [`Interpolation::Step`] and hold the left key of every segment.
pub trait Animatable: Clone + PartialEq + Send + Sync + 'static {
    /// Short type name used in error messages.
    const KIND: &'static str;
    /// Whether Linear and Cubic interpolation are meaningful for this type.
    const CONTINUOUS: bool;

    /// Blend from `a` to `b` at parameter `t` in `[0, 1]`.
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        if t < 1.0 {
            a.clone()
        } else {
            b.clone()
        }
    }

    /// Catmull-Rom through `p1..p2`, with `p0` and `p3` shaping the tangents.
    fn catmull_rom(_p0: &Self, p1: &Self, p2: &Self, _p3: &Self, t: f64) -> Self {
        Self::lerp(p1, p2, t)
    }
}

/// Uniform Catmull-Rom on a single scalar channel.
///
/// Hermite form with tangents `(p2 - p0) / 2` at `p1` and `(p3 - p1) / 2` at `p2`.
fn catmull_rom_scalar(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let m1 = (p2 - p0) * 0.5;
    let m2 = (p3 - p1) * 0.5;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * p1 + h10 * m1 + h01 * p2 + h11 * m2
}

impl Animatable for f64 {
    const KIND: &'static str = "f64";
    const CONTINUOUS: bool = true;

    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        a + (b - a) * t
    }

    fn catmull_rom(p0: &Self, p1: &Self, p2: &Self, p3: &Self, t: f64) -> Self {
        catmull_rom_scalar(*p0, *p1, *p2, *p3, t)
    }
}

impl Animatable for f32 {
    const KIND: &'static str = "f32";
    const CONTINUOUS: bool = true;

    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        (*a as f64 + (*b as f64 - *a as f64) * t) as f32
    }

    fn catmull_rom(p0: &Self, p1: &Self, p2: &Self, p3: &Self, t: f64) -> Self {
        catmull_rom_scalar(*p0 as f64, *p1 as f64, *p2 as f64, *p3 as f64, t) as f32
    }
}

impl Animatable for Point2D {
    const KIND: &'static str = "Point2D";
    const CONTINUOUS: bool = true;

    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        a.lerp(b, t)
    }

    fn catmull_rom(p0: &Self, p1: &Self, p2: &Self, p3: &Self, t: f64) -> Self {
        Point2D::new(
            catmull_rom_scalar(p0.x, p1.x, p2.x, p3.x, t),
            catmull_rom_scalar(p0.y, p1.y, p2.y, p3.y, t),
        )
    }
}

impl Animatable for Color {
    const KIND: &'static str = "Color";
    const CONTINUOUS: bool = true;

    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        a.lerp(b, t as f32)
    }

    fn catmull_rom(p0: &Self, p1: &Self, p2: &Self, p3: &Self, t: f64) -> Self {
        let channel = |f: fn(&Color) -> f32| {
            catmull_rom_scalar(f(p0) as f64, f(p1) as f64, f(p2) as f64, f(p3) as f64, t) as f32
        };
        Color::rgba(
            channel(|c| c.r),
            channel(|c| c.g),
            channel(|c| c.b),
            channel(|c| c.a),
        )
    }
}

impl Animatable for bool {
    const KIND: &'static str = "bool";
    const CONTINUOUS: bool = false;
}

impl Animatable for BlendMode {
    const KIND: &'static str = "BlendMode";
    const CONTINUOUS: bool = false;
}

/// A value at a specific time, plus how to interpolate towards the next key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe<V> {
    /// Time in seconds on the timeline.
    pub time: f64,
    pub value: V,
    /// Mode of the segment that starts at this key.
    pub interpolation: Interpolation,
}

impl<V> Keyframe<V> {
    pub fn new(time: f64, value: V, interpolation: Interpolation) -> Self {
        Self {
            time,
            value,
            interpolation,
        }
    }
}

/// An ordered sequence of keyframes for one animated property.
///
/// Key times are finite and strictly increasing. Evaluation outside the key
/// domain clamps to the first or last value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeTrack<V> {
    keys: Vec<Keyframe<V>>,
}

impl<V> Default for KeyframeTrack<V> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

impl<V: Animatable> KeyframeTrack<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from `(time, value, mode)` triples in any order.
    pub fn from_keys<I>(keys: I) -> AnimaResult<Self>
    where
        I: IntoIterator<Item = (f64, V, Interpolation)>,
    {
        let mut track = Self::new();
        for (time, value, mode) in keys {
            track.insert(time, value, mode)?;
        }
        Ok(track)
    }

    /// Insert a keyframe, keeping keys sorted.
    ///
    /// An existing key at exactly the same time is never overwritten.
    pub fn insert(&mut self, time: f64, value: V, mode: Interpolation) -> AnimaResult<()> {
        if !time.is_finite() {
            return Err(AnimaError::invalid_time(time, "time must be finite"));
        }
        if mode.is_continuous() && !V::CONTINUOUS {
            return Err(AnimaError::UnsupportedInterpolation {
                mode,
                value_kind: V::KIND,
            });
        }
        match self.keys.binary_search_by(|k| k.time.total_cmp(&time)) {
            Ok(_) => Err(AnimaError::invalid_time(
                time,
                "a keyframe already exists at this time",
            )),
            Err(pos) => {
                self.keys.insert(pos, Keyframe::new(time, value, mode));
                Ok(())
            }
        }
    }

    /// Remove the keyframe at exactly `time`.
    pub fn remove(&mut self, time: f64) -> Option<Keyframe<V>> {
        let pos = self
            .keys
            .binary_search_by(|k| k.time.total_cmp(&time))
            .ok()?;
        Some(self.keys.remove(pos))
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Keyframe<V>] {
        &self.keys
    }

    /// Times of the first and last keys.
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((self.keys.first()?.time, self.keys.last()?.time))
    }

    /// Sample the track at `t`. Returns `None` only when the track is empty.
    ///
    /// A NaN time samples the first key.
    pub fn evaluate(&self, t: f64) -> Option<V> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;
        if t.is_nan() || t <= first.time {
            return Some(first.value.clone());
        }
        if t >= last.time {
            return Some(last.value.clone());
        }

        // first.time < t < last.time, so 1 <= upper < len.
        let upper = self.keys.partition_point(|k| k.time <= t);
        let i = upper - 1;
        let a = &self.keys[i];
        let b = &self.keys[upper];
        let u = (t - a.time) / (b.time - a.time);

        let value = match a.interpolation {
            Interpolation::Step => a.value.clone(),
            Interpolation::Linear => V::lerp(&a.value, &b.value, u),
            Interpolation::Cubic => {
                if i >= 1 && upper + 1 < self.keys.len() {
                    V::catmull_rom(
                        &self.keys[i - 1].value,
                        &a.value,
                        &b.value,
                        &self.keys[upper + 1].value,
                        u,
                    )
                } else {
                    V::lerp(&a.value, &b.value, u)
                }
            }
        };
        Some(value)
    }
}
