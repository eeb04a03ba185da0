//! Runtime configuration for the post-processing chain.
//!
//! [`PipelineConfig`] is the only path through which toggles and effect scalars
//! reach the pipeline. It is a plain value: build one, hand it to
//! [`Pipeline::set_config`](crate::Pipeline::set_config), or use the pipeline's
//! per-parameter setters. The pipeline snapshots it at `begin_frame`, so edits
//! land on the next frame.

/// Which optional stages run this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureToggles {
    pub bloom: bool,
    pub depth_of_field: bool,
    pub stylized: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            bloom: true,
            depth_of_field: true,
            stylized: false,
        }
    }
}

impl FeatureToggles {
    /// Every optional stage disabled.
    pub const NONE: Self = Self {
        bloom: false,
        depth_of_field: false,
        stylized: false,
    };
}

/// Feature toggles plus the scalar inputs of each effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub toggles: FeatureToggles,
    /// User-facing bloom threshold in `[0, 1]`. Higher values let more through.
    pub bloom_threshold: f32,
    /// View-space distance that stays sharp under depth of field.
    pub focal_distance: f32,
    /// Kernel radius of the stylized filter, in pixels.
    pub filter_radius: f32,
    /// Quantization level of the stylized filter.
    pub filter_level: f32,
    /// Clear colour for the GBuffer and every post stage.
    pub clear_color: [f32; 4],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            toggles: FeatureToggles::default(),
            bloom_threshold: 0.5,
            focal_distance: 30.0,
            filter_radius: 3.0,
            filter_level: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_bloom(mut self, enabled: bool) -> Self {
        self.toggles.bloom = enabled;
        self
    }

    pub fn with_depth_of_field(mut self, enabled: bool) -> Self {
        self.toggles.depth_of_field = enabled;
        self
    }

    pub fn with_stylized(mut self, enabled: bool) -> Self {
        self.toggles.stylized = enabled;
        self
    }

    pub fn with_bloom_threshold(mut self, threshold: f32) -> Self {
        self.set_bloom_threshold(threshold);
        self
    }

    pub fn with_focal_distance(mut self, distance: f32) -> Self {
        self.focal_distance = distance;
        self
    }

    pub fn with_filter_radius(mut self, radius: f32) -> Self {
        self.filter_radius = radius.max(0.0);
        self
    }

    pub fn with_filter_level(mut self, level: f32) -> Self {
        self.filter_level = level;
        self
    }

    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// Stores `threshold` clamped to `[0, 1]`. NaN resets to the default.
    pub fn set_bloom_threshold(&mut self, threshold: f32) {
        self.bloom_threshold = if threshold.is_nan() {
            Self::default().bloom_threshold
        } else {
            threshold.clamp(0.0, 1.0)
        };
    }

    /// Luminance cutoff the extract shader actually compares against.
    ///
    /// The user value is inverted: 0 means only pixels at full brightness bloom,
    /// 1 means everything blooms.
    pub fn effective_bloom_threshold(&self) -> f32 {
        effective_bloom_threshold(self.bloom_threshold)
    }
}

/// `1 - user`, with the user value clamped to `[0, 1]` first.
pub fn effective_bloom_threshold(user: f32) -> f32 {
    1.0 - user.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_initial_controls() {
        let config = PipelineConfig::default();
        assert!(config.toggles.bloom);
        assert!(config.toggles.depth_of_field);
        assert!(!config.toggles.stylized);
        assert_eq!(config.bloom_threshold, 0.5);
        assert_eq!(config.focal_distance, 30.0);
        assert_eq!(config.filter_radius, 3.0);
        assert_eq!(config.filter_level, 1.0);
    }

    #[test]
    fn threshold_is_inverted() {
        assert_eq!(effective_bloom_threshold(0.0), 1.0);
        assert_eq!(effective_bloom_threshold(1.0), 0.0);
        for i in 0..=10 {
            let user = i as f32 / 10.0;
            let effective = effective_bloom_threshold(user);
            assert!((effective - (1.0 - user)).abs() < 1e-6);
            assert!((effective_bloom_threshold(effective) - user).abs() < 1e-6);
        }
    }

    #[test]
    fn threshold_is_clamped() {
        let config = PipelineConfig::new().with_bloom_threshold(1.5);
        assert_eq!(config.bloom_threshold, 1.0);
        assert_eq!(config.effective_bloom_threshold(), 0.0);

        let mut config = PipelineConfig::new();
        config.set_bloom_threshold(-2.0);
        assert_eq!(config.bloom_threshold, 0.0);
        config.set_bloom_threshold(f32::NAN);
        assert_eq!(config.bloom_threshold, 0.5);
    }
}
