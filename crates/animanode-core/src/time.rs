use serde::{Deserialize, Serialize};

/// Non-negative span of simulated time in fractional seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Duration {
    seconds: f64,
}

impl Duration {
    /// Negative and NaN inputs clamp to zero.
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: if s.is_nan() { 0.0 } else { s.max(0.0) },
        }
    }

    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    /// Length of one frame at `fps`; zero for a non-positive or NaN rate.
    pub fn frame_interval(fps: f64) -> Self {
        if fps.is_nan() || fps <= 0.0 {
            return Self::zero();
        }
        Self::from_seconds(1.0 / fps)
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    /// Frames needed to cover this span at `fps`, rounding up.
    pub fn frame_count(&self, fps: f64) -> u64 {
        if fps.is_nan() || fps <= 0.0 {
            return 0;
        }
        (self.seconds * fps).ceil() as u64
    }

    /// Wall-clock equivalent, used for deadline pacing.
    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_and_nan_clamp_to_zero() {
        assert_eq!(Duration::from_seconds(-1.0), Duration::zero());
        assert_eq!(Duration::from_seconds(f64::NAN), Duration::zero());
        assert_eq!(Duration::from_seconds(2.5).as_seconds(), 2.5);
    }

    #[test]
    fn test_frame_interval() {
        assert!((Duration::frame_interval(25.0).as_seconds() - 0.04).abs() < 1e-12);
        assert_eq!(Duration::frame_interval(0.0), Duration::zero());
        assert_eq!(Duration::frame_interval(f64::NAN), Duration::zero());
        assert_eq!(
            Duration::frame_interval(50.0).to_std(),
            std::time::Duration::from_millis(20)
        );
    }

    #[test]
    fn test_frame_count_rounds_up() {
        assert_eq!(Duration::from_seconds(1.0).frame_count(30.0), 30);
        assert_eq!(Duration::from_seconds(1.01).frame_count(30.0), 31);
        assert_eq!(Duration::zero().frame_count(30.0), 0);
        assert_eq!(Duration::from_seconds(1.0).frame_count(-5.0), 0);
    }
}
