//! EVU relay actuation
//!
//! The relay is wired to the heat pump's EVU input: energizing it lowers the
//! target temperature. A `Reduced` verdict therefore switches the relay on and
//! a `Normal` verdict switches it off.

pub mod shelly;

pub use shelly::ShellyRelay;

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::policy::Verdict;
use std::sync::Arc;

/// Verdict to relay state. Reduced energizes the relay.
pub const RELAY_POLARITY: [(Verdict, bool); 2] = [(Verdict::Normal, false), (Verdict::Reduced, true)];

/// Relay state implied by `verdict`
pub fn relay_energized(verdict: Verdict) -> bool {
    RELAY_POLARITY
        .iter()
        .any(|(v, energized)| *v == verdict && *energized)
}

/// Reported relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub energized: bool,
}

/// Network relay
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    async fn status(&self) -> Result<RelayStatus>;
    async fn set_energized(&self, energized: bool) -> Result<()>;
}

/// What `apply` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The relay already matched the verdict
    AlreadyInState,
    /// The relay was switched
    Switched,
    /// A switch was needed but suppressed
    DryRun,
}

impl ApplyOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyInState => "already_in_state",
            Self::Switched => "switched",
            Self::DryRun => "dry_run",
        }
    }
}

/// Drives the relay towards a verdict, switching only when needed
pub struct RelayController {
    relay: Arc<dyn Relay>,
    dry_run: bool,
    logger: StructuredLogger,
}

impl RelayController {
    pub fn new(relay: Arc<dyn Relay>, dry_run: bool) -> Self {
        Self {
            relay,
            dry_run,
            logger: get_logger("relay"),
        }
    }

    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Read the relay state and switch it when it differs from `verdict`.
    /// Errors are returned once; the next tick tries again.
    pub async fn apply(&self, verdict: Verdict) -> Result<ApplyOutcome> {
        let wanted = relay_energized(verdict);
        let current = self.relay.status().await?;
        if current.energized == wanted {
            self.logger.debug(&format!(
                "Relay already {} for {verdict} operation",
                if wanted { "on" } else { "off" }
            ));
            return Ok(ApplyOutcome::AlreadyInState);
        }

        let action = if wanted {
            "Switch is off, turning it on (EVU ON / LOWERED TEMPERATURE)"
        } else {
            "Switch is on, turning it off (NORMAL OPERATION)"
        };
        if self.dry_run {
            self.logger.info(&format!("DRY RUN -- {action} -- DRY RUN"));
            return Ok(ApplyOutcome::DryRun);
        }

        self.logger.info(action);
        self.relay.set_energized(wanted).await?;
        Ok(ApplyOutcome::Switched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThermiaError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRelay {
        energized: Mutex<bool>,
        set_calls: Mutex<Vec<bool>>,
        offline: bool,
    }

    #[async_trait::async_trait]
    impl Relay for FakeRelay {
        async fn status(&self) -> Result<RelayStatus> {
            if self.offline {
                return Err(ThermiaError::relay("no route to host"));
            }
            Ok(RelayStatus {
                energized: *self.energized.lock().unwrap(),
            })
        }

        async fn set_energized(&self, energized: bool) -> Result<()> {
            self.set_calls.lock().unwrap().push(energized);
            *self.energized.lock().unwrap() = energized;
            Ok(())
        }
    }

    #[test]
    fn polarity_is_inverted() {
        assert!(relay_energized(Verdict::Reduced));
        assert!(!relay_energized(Verdict::Normal));
    }

    #[tokio::test]
    async fn repeated_apply_switches_once() {
        let relay = Arc::new(FakeRelay::default());
        let controller = RelayController::new(relay.clone(), false);

        assert_eq!(
            controller.apply(Verdict::Reduced).await.unwrap(),
            ApplyOutcome::Switched
        );
        assert_eq!(
            controller.apply(Verdict::Reduced).await.unwrap(),
            ApplyOutcome::AlreadyInState
        );
        assert_eq!(*relay.set_calls.lock().unwrap(), vec![true]);

        controller.apply(Verdict::Normal).await.unwrap();
        assert_eq!(*relay.set_calls.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn dry_run_never_commands() {
        let relay = Arc::new(FakeRelay::default());
        let controller = RelayController::new(relay.clone(), true);

        assert_eq!(
            controller.apply(Verdict::Reduced).await.unwrap(),
            ApplyOutcome::DryRun
        );
        assert_eq!(
            controller.apply(Verdict::Normal).await.unwrap(),
            ApplyOutcome::AlreadyInState
        );
        assert!(relay.set_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_failure_is_reported() {
        let relay = Arc::new(FakeRelay {
            offline: true,
            ..FakeRelay::default()
        });
        let controller = RelayController::new(relay.clone(), false);

        assert!(matches!(
            controller.apply(Verdict::Normal).await,
            Err(ThermiaError::Relay { .. })
        ));
        assert!(relay.set_calls.lock().unwrap().is_empty());
    }
}
