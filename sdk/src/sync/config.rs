//! Sync layer configuration.

use std::time::Duration;

use crate::error::SdkError;

/// How long a price flash stays visible, in milliseconds.
pub const DEFAULT_PRICE_FLASH_MS: u64 = 500;

/// How long an order book row flash stays visible, in milliseconds.
pub const DEFAULT_BOOK_FLASH_MS: u64 = 300;

/// Default throttle window for notifications, in milliseconds.
pub const DEFAULT_NOTIFICATION_INTERVAL_MS: u64 = 1000;

/// Default throttle window for market events, in milliseconds.
pub const DEFAULT_EVENT_INTERVAL_MS: u64 = 500;

/// Default period between notification snapshot refreshes, in seconds.
pub const DEFAULT_NOTIFICATION_REFRESH_SECS: u64 = 30;

/// Default number of recent pushed items retained.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Default number of items shown.
pub const DEFAULT_DISPLAY_LIMIT: usize = 20;

/// Default number of portfolio updates retained.
pub const DEFAULT_PORTFOLIO_HISTORY: usize = 5;

/// Device class, used to slow down UI work on constrained clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Desktop browser or native app.
    #[default]
    Desktop,
    /// Phone or tablet; throttle windows and refresh periods are doubled.
    Mobile,
}

impl DeviceProfile {
    /// Multiplier applied to throttle windows and refresh periods.
    #[must_use]
    pub const fn interval_factor(&self) -> u32 {
        match self {
            Self::Desktop => 1,
            Self::Mobile => 2,
        }
    }
}

/// Settings for one throttled feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Flush window on desktop.
    pub interval: Duration,
    /// Number of most recent pushed items kept.
    pub buffer_capacity: usize,
    /// Maximum items in a flushed view.
    pub display_limit: usize,
    /// Period between REST snapshot refreshes on desktop. `None` disables
    /// polling.
    pub refresh: Option<Duration>,
}

impl ThrottleConfig {
    /// Creates a throttle configuration.
    #[must_use]
    pub const fn new(interval: Duration, buffer_capacity: usize, display_limit: usize) -> Self {
        Self {
            interval,
            buffer_capacity,
            display_limit,
            refresh: None,
        }
    }

    /// Sets the snapshot refresh period.
    #[must_use]
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Flush window for the given device.
    #[must_use]
    pub fn interval_for(&self, device: DeviceProfile) -> Duration {
        self.interval.saturating_mul(device.interval_factor())
    }

    /// Snapshot refresh period for the given device, if polling is enabled.
    #[must_use]
    pub fn refresh_for(&self, device: DeviceProfile) -> Option<Duration> {
        self.refresh
            .map(|refresh| refresh.saturating_mul(device.interval_factor()))
    }

    fn validate(&self, name: &str) -> Result<(), SdkError> {
        if self.interval.is_zero() {
            return Err(SdkError::InvalidConfig(format!(
                "{} interval must be > 0",
                name
            )));
        }
        if self.refresh.is_some_and(|refresh| refresh.is_zero()) {
            return Err(SdkError::InvalidConfig(format!(
                "{} refresh must be > 0",
                name
            )));
        }
        if self.buffer_capacity == 0 || self.display_limit == 0 {
            return Err(SdkError::InvalidConfig(format!(
                "{} buffer_capacity and display_limit must be > 0",
                name
            )));
        }
        Ok(())
    }
}

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Price flash duration.
    pub price_flash: Duration,
    /// Order book row flash duration.
    pub book_flash: Duration,
    /// Notification feed throttle.
    pub notifications: ThrottleConfig,
    /// Market event feed throttle.
    pub events: ThrottleConfig,
    /// Portfolio updates retained, newest first.
    pub portfolio_history: usize,
    /// Device class.
    pub device: DeviceProfile,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            price_flash: Duration::from_millis(DEFAULT_PRICE_FLASH_MS),
            book_flash: Duration::from_millis(DEFAULT_BOOK_FLASH_MS),
            notifications: ThrottleConfig::new(
                Duration::from_millis(DEFAULT_NOTIFICATION_INTERVAL_MS),
                DEFAULT_BUFFER_CAPACITY,
                DEFAULT_DISPLAY_LIMIT,
            )
            .with_refresh(Duration::from_secs(DEFAULT_NOTIFICATION_REFRESH_SECS)),
            events: ThrottleConfig::new(
                Duration::from_millis(DEFAULT_EVENT_INTERVAL_MS),
                DEFAULT_BUFFER_CAPACITY,
                DEFAULT_DISPLAY_LIMIT,
            ),
            portfolio_history: DEFAULT_PORTFOLIO_HISTORY,
            device: DeviceProfile::Desktop,
        }
    }
}

impl SyncConfig {
    /// Sets the device profile.
    #[must_use]
    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    /// Sets the price flash duration.
    #[must_use]
    pub fn with_price_flash(mut self, flash: Duration) -> Self {
        self.price_flash = flash;
        self
    }

    /// Sets the order book flash duration.
    #[must_use]
    pub fn with_book_flash(mut self, flash: Duration) -> Self {
        self.book_flash = flash;
        self
    }

    /// Sets the notification throttle.
    #[must_use]
    pub fn with_notifications(mut self, throttle: ThrottleConfig) -> Self {
        self.notifications = throttle;
        self
    }

    /// Sets the market event throttle.
    #[must_use]
    pub fn with_events(mut self, throttle: ThrottleConfig) -> Self {
        self.events = throttle;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a duration or capacity is zero.
    pub fn validate(&self) -> Result<(), SdkError> {
        if self.price_flash.is_zero() || self.book_flash.is_zero() {
            return Err(SdkError::InvalidConfig(
                "flash durations must be > 0".to_string(),
            ));
        }
        if self.portfolio_history == 0 {
            return Err(SdkError::InvalidConfig(
                "portfolio_history must be > 0".to_string(),
            ));
        }
        self.notifications.validate("notifications")?;
        self.events.validate("events")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.price_flash, Duration::from_millis(500));
        assert_eq!(config.book_flash, Duration::from_millis(300));
        assert_eq!(config.portfolio_history, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mobile_doubles_interval() {
        let throttle = ThrottleConfig::new(Duration::from_millis(250), 10, 5);
        assert_eq!(
            throttle.interval_for(DeviceProfile::Desktop),
            Duration::from_millis(250)
        );
        assert_eq!(
            throttle.interval_for(DeviceProfile::Mobile),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_refresh_defaults_and_mobile_scaling() {
        let config = SyncConfig::default();
        assert_eq!(
            config.notifications.refresh_for(DeviceProfile::Desktop),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.notifications.refresh_for(DeviceProfile::Mobile),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.events.refresh_for(DeviceProfile::Mobile), None);

        let config = SyncConfig::default().with_notifications(
            ThrottleConfig::new(Duration::from_millis(10), 5, 5).with_refresh(Duration::ZERO),
        );
        assert!(matches!(config.validate(), Err(SdkError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let config = SyncConfig::default().with_price_flash(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SyncConfig::default()
            .with_notifications(ThrottleConfig::new(Duration::from_millis(10), 0, 5));
        assert!(matches!(config.validate(), Err(SdkError::InvalidConfig(_))));
    }
}
