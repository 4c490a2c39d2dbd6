//! Registry configuration.

use crate::error::{InputError, PwmError};

/// Period given to freshly exported channels: 20 ms, a 50 Hz servo frame.
pub const DEFAULT_PERIOD_NS: u64 = 20_000_000;
/// Duty cycle given to freshly exported channels: 1.5 ms, servo centre.
pub const DEFAULT_DUTY_CYCLE_NS: u64 = 1_500_000;
pub const DEFAULT_MAX_CHANNELS: usize = 64;
/// Label passed to the output backend when a line is claimed.
pub const DEFAULT_LABEL: &str = "soft_pwm_gpio";

/// Configuration for a [`Registry`](crate::Registry).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwmConfig {
    pub default_period_ns: u64,
    pub default_duty_cycle_ns: u64,
    pub max_channels: usize,
    pub label: String,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            default_period_ns: DEFAULT_PERIOD_NS,
            default_duty_cycle_ns: DEFAULT_DUTY_CYCLE_NS,
            max_channels: DEFAULT_MAX_CHANNELS,
            label: DEFAULT_LABEL.to_owned(),
        }
    }
}

impl PwmConfig {
    pub fn builder() -> PwmConfigBuilder {
        PwmConfigBuilder::default()
    }

    /// Checks that the channel defaults describe a runnable waveform.
    pub fn validate(&self) -> Result<(), PwmError> {
        if self.default_period_ns == 0 {
            return Err(PwmError::InvalidConfig(InputError::ZeroPeriod));
        }
        if self.default_duty_cycle_ns > self.default_period_ns {
            return Err(PwmError::InvalidConfig(InputError::DutyExceedsPeriod {
                duty_ns: self.default_duty_cycle_ns,
                period_ns: self.default_period_ns,
            }));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PwmConfigBuilder {
    config: PwmConfig,
}

impl PwmConfigBuilder {
    /// Sets the period of newly exported channels.
    pub fn default_period_ns(mut self, period_ns: u64) -> Self {
        self.config.default_period_ns = period_ns;
        self
    }

    /// Sets the duty cycle of newly exported channels.
    pub fn default_duty_cycle_ns(mut self, duty_ns: u64) -> Self {
        self.config.default_duty_cycle_ns = duty_ns;
        self
    }

    /// Caps the number of simultaneously exported channels.
    pub fn max_channels(mut self, max: usize) -> Self {
        self.config.max_channels = max;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    pub fn build(self) -> PwmConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_servo_frame() {
        let config = PwmConfig::default();
        assert_eq!(config.default_period_ns, 20_000_000);
        assert_eq!(config.default_duty_cycle_ns, 1_500_000);
        assert_eq!(config.label, "soft_pwm_gpio");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = PwmConfig::builder()
            .default_period_ns(1_000_000)
            .default_duty_cycle_ns(250_000)
            .max_channels(4)
            .label("test")
            .build();

        assert_eq!(config.default_period_ns, 1_000_000);
        assert_eq!(config.default_duty_cycle_ns, 250_000);
        assert_eq!(config.max_channels, 4);
        assert_eq!(config.label, "test");
    }

    #[test]
    fn validate_rejects_unrunnable_defaults() {
        let zero = PwmConfig::builder().default_period_ns(0).build();
        assert!(matches!(
            zero.validate(),
            Err(PwmError::InvalidConfig(InputError::ZeroPeriod))
        ));

        let overshoot = PwmConfig::builder()
            .default_period_ns(1_000)
            .default_duty_cycle_ns(1_001)
            .build();
        assert!(matches!(
            overshoot.validate(),
            Err(PwmError::InvalidConfig(InputError::DutyExceedsPeriod { .. }))
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PwmConfig = serde_json::from_str(r#"{ "max_channels": 8 }"#).unwrap();
        assert_eq!(config.max_channels, 8);
        assert_eq!(config.default_period_ns, DEFAULT_PERIOD_NS);
    }
}
