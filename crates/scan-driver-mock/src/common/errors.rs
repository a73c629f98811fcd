//! Fault injection for mock devices.
//!
//! Every mock operation calls [`ErrorConfig::check_operation`] with its
//! operation name (`connect`, `home`, `move`, `read_spectrum`, `predict`,
//! `predict_batch`) before doing any work. Injected faults surface as
//! `scan_core::DriverError`, the same type a real driver would raise, so the
//! orchestrator cannot tell a simulated fault from a real one.
//!
//! ```rust,ignore
//! // The third spectrum of a scan fails, every other acquisition succeeds.
//! let faults = ErrorConfig::scenario(ErrorScenario::FailNth {
//!     operation: "read_spectrum",
//!     n: 3,
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use scan_core::{DriverError, DriverErrorKind};

use super::rng::MockRng;

/// A deterministic fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorScenario {
    /// Every call of `operation` after the first `count` fails.
    FailAfterN {
        /// Operation name, e.g. `move`.
        operation: &'static str,
        /// Calls that succeed first.
        count: u32,
    },
    /// Only the `n`-th call (1-based) of `operation` fails.
    FailNth {
        /// Operation name.
        operation: &'static str,
        /// Failing call, 1-based.
        n: u32,
    },
    /// Every call of `operation` reports a timeout.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// The link drops on the first checked call; all later calls fail.
    CommunicationLoss,
    /// The device latches a fault code on the first checked call.
    HardwareFault {
        /// Fault code reported by the device.
        code: u32,
    },
}

impl ErrorScenario {
    fn counts(&self, operation: &str) -> bool {
        matches!(
            self,
            ErrorScenario::FailAfterN { operation: op, .. }
                | ErrorScenario::FailNth { operation: op, .. } if *op == operation
        )
    }

    /// Fault raised by this scenario on the `call`-th call of `operation`.
    fn fault(&self, operation: &str, call: u32) -> Option<Fault> {
        match *self {
            ErrorScenario::FailAfterN { operation: op, count } if op == operation && call > count => {
                Some(Fault::Once(
                    DriverErrorKind::Hardware,
                    format!("Injected failure on '{operation}' after {count} calls"),
                ))
            }
            ErrorScenario::FailNth { operation: op, n } if op == operation && call == n => {
                Some(Fault::Once(
                    DriverErrorKind::Hardware,
                    format!("Injected failure on call {n} of '{operation}'"),
                ))
            }
            ErrorScenario::Timeout { operation: op } if op == operation => Some(Fault::Once(
                DriverErrorKind::Timeout,
                format!("Operation '{operation}' timed out"),
            )),
            ErrorScenario::CommunicationLoss => Some(Fault::Latch(Latched::LinkDown)),
            ErrorScenario::HardwareFault { code } => Some(Fault::Latch(Latched::Fault(code))),
            _ => None,
        }
    }
}

enum Fault {
    Once(DriverErrorKind, String),
    Latch(Latched),
}

/// Conditions that persist until [`ErrorConfig::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latched {
    LinkDown,
    Fault(u32),
}

impl Latched {
    fn to_error(self, driver: &str) -> DriverError {
        match self {
            Latched::LinkDown => {
                DriverError::new(driver, DriverErrorKind::Communication, "Communication lost")
            }
            Latched::Fault(code) => DriverError::new(
                driver,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {code}"),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    calls: HashMap<&'static str, u32>,
    latched: Option<Latched>,
}

/// Fault injection settings shared by clones of one device.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    scenarios: Arc<[ErrorScenario]>,
    /// Random failure probability per operation name.
    rates: Arc<HashMap<&'static str, f64>>,
    /// Probability applied to operations without their own rate.
    default_rate: f64,
    rng: Arc<MockRng>,
    state: Arc<Mutex<FaultState>>,
}

impl ErrorConfig {
    /// No injected faults.
    pub fn none() -> Self {
        Self::new(Vec::new(), HashMap::new(), 0.0, None)
    }

    /// Inject a single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Inject several scenarios; the first matching one wins.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::new(scenarios, HashMap::new(), 0.0, None)
    }

    /// Every operation fails with probability `rate`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::new(Vec::new(), HashMap::new(), rate, seed)
    }

    /// Per-operation failure probabilities; unlisted operations never fail.
    pub fn with_rates(rates: HashMap<&'static str, f64>, seed: Option<u64>) -> Self {
        Self::new(Vec::new(), rates, 0.0, seed)
    }

    fn new(
        scenarios: Vec<ErrorScenario>,
        rates: HashMap<&'static str, f64>,
        default_rate: f64,
        seed: Option<u64>,
    ) -> Self {
        Self {
            scenarios: scenarios.into(),
            rates: Arc::new(rates),
            default_rate,
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Record one call of `operation` and decide whether it fails.
    pub fn check_operation(&self, driver: &str, operation: &'static str) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(latched) = state.latched {
            return Err(latched.to_error(driver));
        }

        let call = if self.scenarios.iter().any(|s| s.counts(operation)) {
            let calls = state.calls.entry(operation).or_insert(0);
            *calls += 1;
            *calls
        } else {
            0
        };

        if let Some(fault) = self.scenarios.iter().find_map(|s| s.fault(operation, call)) {
            return Err(match fault {
                Fault::Once(kind, message) => DriverError::new(driver, kind, message),
                Fault::Latch(latched) => {
                    state.latched = Some(latched);
                    latched.to_error(driver)
                }
            });
        }
        drop(state);

        let rate = self.rates.get(operation).copied().unwrap_or(self.default_rate);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver,
                DriverErrorKind::Hardware,
                format!("Random failure on '{operation}'"),
            ));
        }
        Ok(())
    }

    /// Clear call counters and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
