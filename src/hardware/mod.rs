//! Servo claw actuator.
//!
//! One PWM-capable pin drives the gripper servo. When the PWM line cannot be
//! acquired (no sysfs PWM chip, missing permissions, non-SBC host) the claw
//! runs in mock mode: commands still walk the state machine, the physical
//! pulse is skipped. Mode is selected once at startup, never re-probed.

use std::fmt;
use std::time::Duration;

use rppal::pwm::{Channel, Polarity, Pwm};
use tokio::sync::Mutex;

use crate::config::ClawConfig;
use crate::error::HardwareError;

/// Servo PWM base frequency.
const SERVO_HZ: f64 = 50.0;
/// Duty-cycle factors; calibrated for the stock gripper servo.
const OPEN_DUTY: f64 = 0.075;
const CLOSE_DUTY: f64 = 0.025;
/// How long the pulse is held before zeroing the line to stop jitter.
const PULSE_HOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClawState {
    Unknown,
    Open,
    Closed,
}

impl fmt::Display for ClawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClawState::Unknown => "UNKNOWN",
            ClawState::Open => "OPEN",
            ClawState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Capability-probe result: either a live PWM handle or a simulated servo.
enum ServoLink {
    Real(Pwm),
    Mock,
    /// Line released by `shutdown()`; behaves like mock from then on.
    Released,
}

struct Inner {
    state: ClawState,
    servo: ServoLink,
}

/// The claw actuator. Shared by every frontend; an internal mutex serializes
/// commands so at most one pulse is in flight at a time.
pub struct Claw {
    inner: Mutex<Inner>,
}

fn servo_channel(index: u8) -> Result<Channel, HardwareError> {
    match index {
        0 => Ok(Channel::Pwm0),
        1 => Ok(Channel::Pwm1),
        other => Err(HardwareError::Pwm(format!(
            "no PWM channel {other} on this header"
        ))),
    }
}

fn acquire_servo(config: &ClawConfig) -> Result<Pwm, HardwareError> {
    let channel = servo_channel(config.pwm_channel)?;
    Pwm::with_frequency(channel, SERVO_HZ, 0.0, Polarity::Normal, true)
        .map_err(|e| HardwareError::Pwm(e.to_string()))
}

impl Claw {
    /// Probe the PWM line once and pick the operating mode. Missing hardware
    /// is degraded operation, not an error.
    pub fn connect(config: &ClawConfig) -> Self {
        let servo = if config.force_mock {
            tracing::info!("Hardware initialized (MOCK, forced)");
            ServoLink::Mock
        } else {
            match acquire_servo(config) {
                Ok(pwm) => {
                    tracing::info!(
                        channel = config.pwm_channel,
                        "Hardware initialized (PWM)"
                    );
                    ServoLink::Real(pwm)
                }
                Err(e) => {
                    tracing::warn!("PWM line unavailable ({e}), running in MOCK mode");
                    ServoLink::Mock
                }
            }
        };

        Self {
            inner: Mutex::new(Inner {
                state: ClawState::Unknown,
                servo,
            }),
        }
    }

    pub async fn open(&self) -> String {
        tracing::info!("Opening claw...");
        self.actuate(OPEN_DUTY, ClawState::Open).await
    }

    pub async fn close(&self) -> String {
        tracing::info!("Closing claw...");
        self.actuate(CLOSE_DUTY, ClawState::Closed).await
    }

    pub async fn status(&self) -> ClawState {
        self.inner.lock().await.state
    }

    pub async fn is_mock(&self) -> bool {
        !matches!(self.inner.lock().await.servo, ServoLink::Real(_))
    }

    /// Release the PWM line. Safe to call any number of times; later
    /// commands keep updating state without touching hardware.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let ServoLink::Real(pwm) = std::mem::replace(&mut inner.servo, ServoLink::Released) {
            if let Err(e) = pwm.disable() {
                tracing::warn!("failed to disable PWM on shutdown: {e}");
            }
            tracing::info!("Hardware released");
        }
    }

    /// Emit one calibrated pulse (real mode only) and land in `target`.
    /// PWM write failures are logged; the state transition always happens so
    /// every command call yields a deterministic terminal state.
    async fn actuate(&self, duty: f64, target: ClawState) -> String {
        let mut inner = self.inner.lock().await;

        if let ServoLink::Real(pwm) = &inner.servo {
            if let Err(e) = Self::pulse(pwm, duty).await {
                tracing::error!("servo pulse failed: {e}");
            }
        }

        inner.state = target;
        format!("Claw is now {target}")
    }

    async fn pulse(pwm: &Pwm, duty: f64) -> Result<(), HardwareError> {
        pwm.set_duty_cycle(duty)
            .map_err(|e| HardwareError::Pwm(e.to_string()))?;
        tokio::time::sleep(PULSE_HOLD).await;
        // Zero the line so the servo stops hunting between periods.
        pwm.set_duty_cycle(0.0)
            .map_err(|e| HardwareError::Pwm(e.to_string()))
    }
}
