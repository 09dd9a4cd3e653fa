use serde::{Deserialize, Serialize};

/// Analytics capability available in this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Regression forecasts and isolation-forest detection.
    Statistical,
    /// Naive extrapolation and deviation thresholds.
    Basic,
}

impl Capability {
    /// Capability selected by the `statistical` cargo feature.
    #[must_use]
    pub const fn detect() -> Self {
        if cfg!(feature = "statistical") {
            Self::Statistical
        } else {
            Self::Basic
        }
    }

    /// Default forecast mode for this capability.
    #[must_use]
    pub const fn forecast_mode(self) -> ForecastMode {
        match self {
            Self::Statistical => ForecastMode::Regression,
            Self::Basic => ForecastMode::Naive,
        }
    }

    /// Default detection mode for this capability.
    #[must_use]
    pub const fn detection_mode(self) -> DetectionMode {
        match self {
            Self::Statistical => DetectionMode::IsolationForest,
            Self::Basic => DetectionMode::Deviation,
        }
    }
}

/// How the forecaster extrapolates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// Ordinary least squares with a 95% band.
    Regression,
    /// Last difference held constant.
    Naive,
}

impl ForecastMode {
    /// True for the fallback mode.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Naive)
    }
}

/// How the anomaly detector flags points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Isolation forest.
    IsolationForest,
    /// Points beyond two standard deviations.
    Deviation,
}

impl DetectionMode {
    /// True for the fallback mode.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Deviation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "statistical")]
    fn default_build_is_statistical() {
        assert_eq!(Capability::detect(), Capability::Statistical);
        assert_eq!(
            Capability::detect().forecast_mode(),
            ForecastMode::Regression
        );
        assert!(Capability::Basic.detection_mode().is_fallback());
    }
}
