//! Mock XY motion stage implementation.

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{Axis, AxisLimits, Position, TravelLimits, XyStage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{ErrorConfig, MockMode, TimingConfig, simulate_delay};

const DRIVER: &str = "mock_stage";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for MockStage
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MockStageConfig {
    /// X travel in mm from the home origin
    pub x_max_mm: f64,
    /// Y travel in mm from the home origin
    pub y_max_mm: f64,
    /// Home position in mm
    pub home: Position,
    /// Maximum (and initial) motion speed in mm/sec
    pub max_speed_mm_per_sec: f64,
    /// Operational mode
    pub mode: MockMode,
}

impl Default for MockStageConfig {
    fn default() -> Self {
        Self {
            x_max_mm: 50.0,
            y_max_mm: 50.0,
            home: Position::ORIGIN,
            max_speed_mm_per_sec: 10.0,
            mode: MockMode::Instant,
        }
    }
}

/// Trapezoidal velocity profile for realistic motion simulation
#[derive(Debug, Clone, Copy)]
pub struct VelocityProfile {
    /// Acceleration in mm/sec²
    pub acceleration: f64,
}

impl VelocityProfile {
    /// Motion time for `distance` mm when cruising at `max_velocity` mm/s.
    ///
    /// Falls back to a triangular profile when the move is too short to
    /// reach cruise speed.
    pub fn motion_time(&self, distance: f64, max_velocity: f64) -> Duration {
        let distance = distance.abs();
        if distance == 0.0 || max_velocity <= 0.0 {
            return Duration::ZERO;
        }
        if self.acceleration <= 0.0 {
            return Duration::from_secs_f64(distance / max_velocity);
        }

        let ramp_time = max_velocity / self.acceleration;
        let ramp_dist = 0.5 * self.acceleration * ramp_time * ramp_time;

        let total = if 2.0 * ramp_dist <= distance {
            2.0 * ramp_time + (distance - 2.0 * ramp_dist) / max_velocity
        } else {
            2.0 * (distance / self.acceleration).sqrt()
        };
        Duration::from_secs_f64(total)
    }
}

impl Default for VelocityProfile {
    fn default() -> Self {
        Self { acceleration: 20.0 }
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct StageState {
    position: Position,
    speed: f64,
    connected: bool,
    homed: bool,
    emergency_stop: bool,
    moving: bool,
}

/// Holds `moving` for the lifetime of one move, including a move whose
/// future is dropped before completion.
struct MotionGuard<'a> {
    state: &'a Mutex<StageState>,
}

impl<'a> MotionGuard<'a> {
    fn start(state: &'a Mutex<StageState>) -> Self {
        state.lock().moving = true;
        Self { state }
    }
}

impl Drop for MotionGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().moving = false;
    }
}

// =============================================================================
// MockStage - Simulated XY Stage
// =============================================================================

/// Mock two-axis stage.
///
/// Simulates:
/// - Connection and homing preconditions for motion
/// - Hard travel limits (out-of-range targets are rejected)
/// - Distance/speed based motion time in realistic mode
/// - A latching emergency stop
/// - Error injection for testing
///
/// Operation names for error injection: `connect`, `home`, `move`.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::builder()
///     .limits(TravelLimits::from_origin(25.0, 25.0))
///     .mode(MockMode::Realistic)
///     .build();
///
/// stage.connect().await?;
/// stage.home().await?;
/// stage.move_abs(Position::new(10.0, 5.0), true).await?;
/// ```
#[derive(Clone)]
pub struct MockStage {
    state: Arc<Mutex<StageState>>,
    limits: TravelLimits,
    home: Position,
    max_speed: f64,
    velocity_profile: VelocityProfile,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
}

impl MockStage {
    /// Create a disconnected stage with default limits (0-50 mm on both axes).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create mock stage from configuration.
    pub fn with_config(config: &MockStageConfig) -> Self {
        Self::builder()
            .limits(TravelLimits::from_origin(config.x_max_mm, config.y_max_mm))
            .home(config.home)
            .max_speed(config.max_speed_mm_per_sec)
            .mode(config.mode)
            .build()
    }

    /// Create a builder for configuring MockStage
    pub fn builder() -> MockStageBuilder {
        MockStageBuilder::new()
    }

    /// Current speed setting in mm/s.
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    fn check_bounds(&self, target: &Position) -> Result<()> {
        for (axis, value) in [(Axis::X, target.x), (Axis::Y, target.y)] {
            let limits = self.limits.axis(axis);
            if !limits.contains(value) {
                bail!(
                    "{} position {:.3} outside limits [{}, {}]",
                    axis,
                    value,
                    limits.min,
                    limits.max
                );
            }
        }
        Ok(())
    }

    fn check_ready(&self) -> Result<()> {
        let state = self.state.lock();
        if !state.connected {
            bail!("Stage not connected");
        }
        if !state.homed {
            bail!("Stage not homed - call home() first");
        }
        if state.emergency_stop {
            bail!("Emergency stop active");
        }
        Ok(())
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XyStage for MockStage {
    async fn connect(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER, "connect")?;
        simulate_delay(self.mode, self.timing.communication_delay()).await;

        self.state.lock().connected = true;
        tracing::info!(limits = ?self.limits, "MockStage: Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.moving = false;
        tracing::info!("MockStage: Disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn is_homed(&self) -> bool {
        self.state.lock().homed
    }

    fn emergency_stop_active(&self) -> bool {
        self.state.lock().emergency_stop
    }

    fn is_moving(&self) -> bool {
        self.state.lock().moving
    }

    async fn home(&self) -> Result<Position> {
        {
            let state = self.state.lock();
            if !state.connected {
                bail!("Stage not connected");
            }
            if state.emergency_stop {
                bail!("Emergency stop active");
            }
        }
        self.error_config.check_operation(DRIVER, "home")?;

        tracing::debug!("MockStage: Homing...");
        simulate_delay(self.mode, self.timing.homing_time()).await;

        let mut state = self.state.lock();
        state.position = self.home;
        state.homed = true;
        tracing::debug!(position = %self.home, "MockStage: Homing complete");
        Ok(self.home)
    }

    async fn move_abs(&self, target: Position, wait: bool) -> Result<Position> {
        self.check_ready()?;
        self.check_bounds(&target)?;
        self.error_config.check_operation(DRIVER, "move")?;

        let (current, speed) = {
            let state = self.state.lock();
            (state.position, state.speed)
        };
        let motion = MotionGuard::start(&self.state);
        let distance = current.distance_to(&target);

        tracing::debug!(from = %current, to = %target, distance, "MockStage: Moving");

        if wait {
            let duration = self.velocity_profile.motion_time(distance, speed);
            simulate_delay(self.mode, duration).await;
        }
        drop(motion);

        let mut state = self.state.lock();
        if state.emergency_stop {
            bail!("Motion interrupted by emergency stop");
        }
        state.position = target;
        Ok(target)
    }

    async fn position(&self) -> Result<Position> {
        let state = self.state.lock();
        if !state.connected {
            bail!("Stage not connected");
        }
        Ok(state.position)
    }

    async fn limits(&self) -> Result<TravelLimits> {
        Ok(self.limits)
    }

    async fn set_speed(&self, mm_per_s: f64) -> Result<()> {
        if !(mm_per_s > 0.0 && mm_per_s <= self.max_speed) {
            bail!("Speed must be between 0 and {} mm/s", self.max_speed);
        }
        self.state.lock().speed = mm_per_s;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.emergency_stop = true;
        state.moving = false;
        tracing::warn!("MockStage: Emergency stop");
        Ok(())
    }

    async fn reset_emergency_stop(&self) -> Result<()> {
        self.state.lock().emergency_stop = false;
        tracing::info!("MockStage: Emergency stop reset");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockStage with fluent API
pub struct MockStageBuilder {
    limits: TravelLimits,
    home: Position,
    max_speed: f64,
    velocity_profile: VelocityProfile,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    connected: bool,
    homed: bool,
}

impl MockStageBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        let defaults = MockStageConfig::default();
        Self {
            limits: TravelLimits::from_origin(defaults.x_max_mm, defaults.y_max_mm),
            home: defaults.home,
            max_speed: defaults.max_speed_mm_per_sec,
            velocity_profile: VelocityProfile::default(),
            mode: defaults.mode,
            timing: TimingConfig::stage(),
            error_config: ErrorConfig::none(),
            connected: false,
            homed: false,
        }
    }

    /// Set travel limits
    pub fn limits(mut self, limits: TravelLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set X and Y limits individually
    pub fn axis_limits(mut self, x: AxisLimits, y: AxisLimits) -> Self {
        self.limits = TravelLimits::new(x, y);
        self
    }

    /// Set the home position
    pub fn home(mut self, home: Position) -> Self {
        self.home = home;
        self
    }

    /// Set maximum (and initial) speed in mm/s
    pub fn max_speed(mut self, mm_per_s: f64) -> Self {
        self.max_speed = mm_per_s;
        self
    }

    /// Set velocity profile
    pub fn velocity_profile(mut self, profile: VelocityProfile) -> Self {
        self.velocity_profile = profile;
        self
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set realistic-mode timing
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Set error configuration
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Start connected (skips `connect()` in tests)
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Start connected and homed at the home position
    pub fn ready(mut self) -> Self {
        self.connected = true;
        self.homed = true;
        self
    }

    /// Build the MockStage
    pub fn build(self) -> MockStage {
        let state = StageState {
            position: self.home,
            speed: self.max_speed,
            connected: self.connected,
            homed: self.homed,
            emergency_stop: false,
            moving: false,
        };

        MockStage {
            state: Arc::new(Mutex::new(state)),
            limits: self.limits,
            home: self.home,
            max_speed: self.max_speed,
            velocity_profile: self.velocity_profile,
            mode: self.mode,
            timing: self.timing,
            error_config: self.error_config,
        }
    }
}

impl Default for MockStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    #[tokio::test]
    async fn test_motion_requires_connection_and_homing() {
        let stage = MockStage::new();

        let err = stage.move_abs(Position::new(1.0, 1.0), true).await.unwrap_err();
        assert_eq!(err.to_string(), "Stage not connected");

        stage.connect().await.unwrap();
        let err = stage.move_abs(Position::new(1.0, 1.0), true).await.unwrap_err();
        assert_eq!(err.to_string(), "Stage not homed - call home() first");

        assert_eq!(stage.home().await.unwrap(), Position::ORIGIN);
        assert!(stage.is_homed());
        let reached = stage.move_abs(Position::new(1.0, 1.0), true).await.unwrap();
        assert_eq!(reached, Position::new(1.0, 1.0));
    }

    #[tokio::test]
    async fn test_absolute_and_relative_moves() {
        let stage = MockStage::builder().ready().build();

        stage.move_abs(Position::new(10.0, 20.0), true).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), Position::new(10.0, 20.0));

        stage.move_rel(5.0, -3.0, true).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), Position::new(15.0, 17.0));
    }

    #[tokio::test]
    async fn test_limits_hard_stop() {
        let stage = MockStage::builder()
            .limits(TravelLimits::from_origin(100.0, 10.0))
            .ready()
            .build();

        stage.move_abs(Position::new(50.0, 10.0), true).await.unwrap();

        let err = stage.move_abs(Position::new(-1.0, 0.0), true).await.unwrap_err();
        assert!(err.to_string().starts_with("X position -1.000 outside limits"));

        let err = stage.move_abs(Position::new(0.0, 10.5), true).await.unwrap_err();
        assert!(err.to_string().starts_with("Y position 10.500 outside limits"));

        // A rejected move does not change the position.
        assert_eq!(stage.position().await.unwrap(), Position::new(50.0, 10.0));
        assert_eq!(stage.limits().await.unwrap().x.max, 100.0);
    }

    #[tokio::test]
    async fn test_emergency_stop_latches() {
        let stage = MockStage::builder().ready().build();

        stage.stop().await.unwrap();
        assert!(stage.emergency_stop_active());

        let err = stage.move_abs(Position::new(1.0, 0.0), true).await.unwrap_err();
        assert_eq!(err.to_string(), "Emergency stop active");
        assert!(stage.home().await.is_err());

        stage.reset_emergency_stop().await.unwrap();
        assert!(!stage.emergency_stop_active());
        stage.move_abs(Position::new(1.0, 0.0), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_emergency_stop_interrupts_move() {
        let stage = MockStage::builder()
            .mode(MockMode::Realistic)
            .max_speed(10.0)
            .ready()
            .build();

        let mover = stage.clone();
        let handle = tokio::spawn(async move { mover.move_abs(Position::new(5.0, 0.0), true).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stage.is_moving());
        stage.stop().await.unwrap();
        assert!(!stage.is_moving());

        let result = handle.await.unwrap();
        assert!(result.is_err());
        assert_eq!(stage.position().await.unwrap(), Position::ORIGIN);
    }

    #[tokio::test]
    async fn test_abandoned_move_clears_moving() {
        let stage = MockStage::builder()
            .mode(MockMode::Realistic)
            .max_speed(10.0)
            .ready()
            .build();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            stage.move_abs(Position::new(10.0, 0.0), true),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!stage.is_moving());
        assert_eq!(stage.position().await.unwrap(), Position::ORIGIN);
    }

    #[tokio::test]
    async fn test_set_speed_bounds() {
        let stage = MockStage::builder().max_speed(10.0).build();

        stage.set_speed(2.5).await.unwrap();
        assert_eq!(stage.speed(), 2.5);
        assert!(stage.set_speed(0.0).await.is_err());
        assert!(stage.set_speed(10.5).await.is_err());
        assert_eq!(stage.speed(), 2.5);
    }

    #[tokio::test]
    async fn test_realistic_mode_has_timing() {
        let stage = MockStage::builder()
            .mode(MockMode::Realistic)
            .max_speed(10.0)
            .ready()
            .build();

        let start = tokio::time::Instant::now();
        stage.move_abs(Position::new(3.0, 4.0), true).await.unwrap();
        let duration = start.elapsed();

        // 5 mm at 10 mm/s with acceleration ramps
        assert!(duration.as_millis() >= 500, "Motion too fast: {:?}", duration);
    }

    #[tokio::test]
    async fn test_instant_mode_is_fast() {
        let stage = MockStage::builder().ready().build();

        let start = tokio::time::Instant::now();
        stage.move_abs(Position::new(50.0, 50.0), true).await.unwrap();
        assert!(start.elapsed().as_millis() < 10);
    }

    #[tokio::test]
    async fn test_error_injection_fail_after_n() {
        let stage = MockStage::builder()
            .ready()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "move",
                count: 2,
            }))
            .build();

        assert!(stage.move_abs(Position::new(1.0, 0.0), true).await.is_ok());
        assert!(stage.move_abs(Position::new(2.0, 0.0), true).await.is_ok());
        assert!(stage.move_abs(Position::new(3.0, 0.0), true).await.is_err());
    }

    #[test]
    fn test_velocity_profile() {
        let profile = VelocityProfile { acceleration: 20.0 };

        // Long move: 0.5 s ramps each side, cruise for the rest.
        let long = profile.motion_time(20.0, 10.0).as_secs_f64();
        assert!((long - 2.5).abs() < 1e-9, "{long}");

        // Short move never reaches cruise speed.
        let short = profile.motion_time(1.0, 10.0).as_secs_f64();
        assert!((short - 2.0 * (1.0f64 / 20.0).sqrt()).abs() < 1e-9);

        assert_eq!(profile.motion_time(0.0, 10.0), Duration::ZERO);
    }

    #[test]
    fn test_config_defaults() {
        let config: MockStageConfig = toml::from_str("x_max_mm = 25.0").unwrap();
        assert_eq!(config.x_max_mm, 25.0);
        assert_eq!(config.y_max_mm, 50.0);
        assert_eq!(config.max_speed_mm_per_sec, 10.0);

        let stage = MockStage::with_config(&config);
        assert_eq!(stage.limits.x, AxisLimits::new(0.0, 25.0));
    }
}
