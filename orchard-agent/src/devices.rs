//! Simulated devices of a node and their actions
//!
//! - LED: on, off, toggle, blink, pulse, with an auto-off timer armed on every switch-on
//! - PWM output: set (0.0 to 1.0)
//! - Button: read
//!
//! All device state, pending timers and running effects live in one table
//! behind one lock. Arming, cancelling and the state change they guard happen
//! under the same lock hold, so a timer can never fire against a state it was
//! not armed for.

use crate::config::DeviceCounts;
use crate::settings::RuntimeSettings;
use crate::state::Shared;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const DEFAULT_BLINK_SECS: f64 = 1.0;
const BLINK_REPEATS: usize = 3;
const DEFAULT_PULSE_SECS: f64 = 2.0;
const PULSE_STEPS: usize = 10;
/// Longest blink or pulse accepted, in seconds
const MAX_EFFECT_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Led,
    Pwm,
    Button,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DeviceError {
    #[error("Device {0} not found")]
    NotFound(String),
    #[error("No LED devices available")]
    NoLed,
    #[error("Action {action} not supported for {device}")]
    UnsupportedAction { device: String, action: String },
    #[error("Invalid value for {device}: {reason}")]
    InvalidValue { device: String, reason: String },
}

/// Result of one device action, as answered to the caller
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressed: Option<bool>,
    pub message: String,
}

impl ActionOutcome {
    fn led(device: &str, state: &str, message: String) -> Self {
        Self {
            success: true,
            device: device.to_string(),
            state: Some(state.to_string()),
            value: None,
            pressed: None,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceStatus {
    Led {
        available: bool,
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        effect: Option<String>,
        auto_off_armed: bool,
    },
    Pwm {
        available: bool,
        value: f64,
    },
    Button {
        available: bool,
        pressed: bool,
    },
}

/// Spawned task owned by a device slot; `generation` tells a firing task
/// whether it is still the one the slot is waiting for.
struct ScheduledTask {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Blink,
    Pulse,
}

impl Effect {
    fn label(self) -> &'static str {
        match self {
            Effect::Blink => "blinking",
            Effect::Pulse => "pulsing",
        }
    }

    /// (level, hold) steps; every effect ends dark
    fn steps(self, duration: f64) -> Vec<(f64, Duration)> {
        match self {
            Effect::Blink => {
                let half = Duration::from_secs_f64(duration / 2.0);
                (0..BLINK_REPEATS).flat_map(|_| [(1.0, half), (0.0, half)]).collect()
            }
            Effect::Pulse => {
                let hold = Duration::from_secs_f64(duration / (2 * PULSE_STEPS) as f64);
                let fade_in = (1..=PULSE_STEPS).map(|i| i as f64 / PULSE_STEPS as f64);
                let fade_out = (1..=PULSE_STEPS).map(|i| (PULSE_STEPS - i) as f64 / PULSE_STEPS as f64);
                fade_in.chain(fade_out).map(|level| (level, hold)).collect()
            }
        }
    }
}

struct RunningEffect {
    effect: Effect,
    task: ScheduledTask,
}

struct DeviceSlot {
    kind: DeviceKind,
    lit: bool,
    /// PWM duty cycle, or LED brightness during a pulse
    level: f64,
    pressed: bool,
    auto_off: Option<ScheduledTask>,
    effect: Option<RunningEffect>,
}

impl DeviceSlot {
    fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            lit: false,
            level: 0.0,
            pressed: false,
            auto_off: None,
            effect: None,
        }
    }

    fn cancel_effect(&mut self) {
        if let Some(running) = self.effect.take() {
            running.task.cancel();
        }
    }

    fn cancel_auto_off(&mut self) {
        if let Some(task) = self.auto_off.take() {
            task.cancel();
        }
    }

    fn owns_effect(&self, generation: u64) -> bool {
        self.effect.as_ref().is_some_and(|e| e.task.generation == generation)
    }

    fn status(&self) -> DeviceStatus {
        match self.kind {
            DeviceKind::Led => DeviceStatus::Led {
                available: true,
                state: if self.lit { "on" } else { "off" }.to_string(),
                effect: self.effect.as_ref().map(|e| e.effect.label().to_string()),
                auto_off_armed: self.auto_off.is_some(),
            },
            DeviceKind::Pwm => DeviceStatus::Pwm {
                available: true,
                value: self.level,
            },
            DeviceKind::Button => DeviceStatus::Button {
                available: true,
                pressed: self.pressed,
            },
        }
    }
}

/// The one way an LED goes dark, used by requests and by the auto-off timer
fn turn_off(slot: &mut DeviceSlot) {
    slot.cancel_effect();
    slot.cancel_auto_off();
    slot.lit = false;
    slot.level = 0.0;
}

struct DeviceTable {
    slots: BTreeMap<String, DeviceSlot>,
    last_generation: u64,
}

impl DeviceTable {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut DeviceSlot, DeviceError> {
        self.slots
            .get_mut(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }
}

#[derive(Clone)]
pub struct DeviceManager {
    table: Arc<Mutex<DeviceTable>>,
    settings: Shared<RuntimeSettings>,
}

impl DeviceManager {
    pub fn new(counts: &DeviceCounts, settings: Shared<RuntimeSettings>) -> Self {
        let mut slots = BTreeMap::new();
        for (prefix, kind, count) in [
            ("led", DeviceKind::Led, counts.leds),
            ("pwm", DeviceKind::Pwm, counts.pwms),
            ("button", DeviceKind::Button, counts.buttons),
        ] {
            for i in 1..=count {
                slots.insert(format!("{prefix}_{i}"), DeviceSlot::new(kind));
            }
        }
        info!("Initialized {} simulated devices", slots.len());

        Self {
            table: Arc::new(Mutex::new(DeviceTable {
                slots,
                last_generation: 0,
            })),
            settings,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.table.lock().slots.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.table.lock().slots.len()
    }

    pub fn status(&self, name: &str) -> Result<DeviceStatus, DeviceError> {
        self.table
            .lock()
            .slots
            .get(name)
            .map(DeviceSlot::status)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    pub fn status_all(&self) -> BTreeMap<String, DeviceStatus> {
        self.table
            .lock()
            .slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.status()))
            .collect()
    }

    pub fn pressed_buttons(&self) -> Vec<String> {
        self.table
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| slot.kind == DeviceKind::Button && slot.pressed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn execute(&self, name: &str, action: &str, value: Option<&Value>) -> Result<ActionOutcome, DeviceError> {
        let mut table = self.table.lock();
        let kind = table.slot_mut(name)?.kind;
        debug!(device = %name, action, "device action");

        match (kind, action) {
            (DeviceKind::Led, _) => self.control_led(&mut table, name, action, value),
            (DeviceKind::Pwm, "set") => {
                let level = pwm_level(name, value)?;
                let slot = table.slot_mut(name)?;
                slot.level = level;
                Ok(ActionOutcome {
                    success: true,
                    device: name.to_string(),
                    state: None,
                    value: Some(level),
                    pressed: None,
                    message: format!("PWM {name} set to {level:.2}"),
                })
            }
            (DeviceKind::Button, "read") => {
                let pressed = table.slot_mut(name)?.pressed;
                Ok(ActionOutcome {
                    success: true,
                    device: name.to_string(),
                    state: None,
                    value: None,
                    pressed: Some(pressed),
                    message: format!("Button {name} {}", if pressed { "pressed" } else { "released" }),
                })
            }
            _ => Err(DeviceError::UnsupportedAction {
                device: name.to_string(),
                action: action.to_string(),
            }),
        }
    }

    /// Legacy endpoint: acts on the first LED
    pub fn control_primary_led(&self, state: &str) -> Result<ActionOutcome, DeviceError> {
        let primary = self
            .table
            .lock()
            .slots
            .iter()
            .find(|(_, slot)| slot.kind == DeviceKind::Led)
            .map(|(name, _)| name.clone())
            .ok_or(DeviceError::NoLed)?;
        self.execute(&primary, state, None)
    }

    fn control_led(
        &self,
        table: &mut DeviceTable,
        name: &str,
        action: &str,
        value: Option<&Value>,
    ) -> Result<ActionOutcome, DeviceError> {
        match action {
            "on" => {
                self.switch_on(table, name)?;
                Ok(ActionOutcome::led(name, "on", format!("LED {name} turned on")))
            }
            "off" => {
                turn_off(table.slot_mut(name)?);
                Ok(ActionOutcome::led(name, "off", format!("LED {name} turned off")))
            }
            "toggle" => {
                let new_state = if table.slot_mut(name)?.lit {
                    turn_off(table.slot_mut(name)?);
                    "off"
                } else {
                    self.switch_on(table, name)?;
                    "on"
                };
                Ok(ActionOutcome::led(
                    name,
                    new_state,
                    format!("LED {name} toggled {new_state}"),
                ))
            }
            "blink" => {
                let duration = effect_duration(name, value, DEFAULT_BLINK_SECS)?;
                self.start_effect(table, name, Effect::Blink, duration)?;
                Ok(ActionOutcome::led(
                    name,
                    "blinking",
                    format!("LED {name} blinking for {duration}s"),
                ))
            }
            "pulse" => {
                let duration = effect_duration(name, value, DEFAULT_PULSE_SECS)?;
                self.start_effect(table, name, Effect::Pulse, duration)?;
                Ok(ActionOutcome::led(name, "pulsing", format!("LED {name} pulsing")))
            }
            _ => Err(DeviceError::UnsupportedAction {
                device: name.to_string(),
                action: action.to_string(),
            }),
        }
    }

    fn switch_on(&self, table: &mut DeviceTable, name: &str) -> Result<(), DeviceError> {
        let generation = table.next_generation();
        let slot = table.slot_mut(name)?;
        slot.cancel_effect();
        slot.lit = true;
        slot.level = 1.0;
        self.arm_auto_off(name, slot, generation);
        Ok(())
    }

    /// Replaces any pending auto-off of the slot with a fresh one
    fn arm_auto_off(&self, name: &str, slot: &mut DeviceSlot, generation: u64) {
        slot.cancel_auto_off();
        let secs = self.settings.lock().led_auto_off_time;
        if secs == 0 {
            return;
        }

        let table = self.table.clone();
        let device = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let mut table = table.lock();
            if let Some(slot) = table.slots.get_mut(&device) {
                if slot.auto_off.as_ref().is_some_and(|t| t.generation == generation) {
                    // detach our own handle rather than abort it
                    slot.auto_off = None;
                    turn_off(slot);
                    info!(device = %device, "LED auto-off after {}s", secs);
                }
            }
        });
        slot.auto_off = Some(ScheduledTask { generation, handle });
    }

    fn start_effect(
        &self,
        table: &mut DeviceTable,
        name: &str,
        effect: Effect,
        duration: f64,
    ) -> Result<(), DeviceError> {
        let generation = table.next_generation();
        let slot = table.slot_mut(name)?;
        slot.cancel_effect();
        slot.cancel_auto_off();

        let steps = effect.steps(duration);
        let table = self.table.clone();
        let device = name.to_string();
        let handle = tokio::spawn(async move {
            for (level, hold) in steps {
                {
                    let mut table = table.lock();
                    match table.slots.get_mut(&device) {
                        Some(slot) if slot.owns_effect(generation) => {
                            slot.level = level;
                            slot.lit = level > 0.0;
                        }
                        _ => return,
                    }
                }
                tokio::time::sleep(hold).await;
            }
            let mut table = table.lock();
            if let Some(slot) = table.slots.get_mut(&device) {
                if slot.owns_effect(generation) {
                    slot.effect = None;
                    slot.lit = false;
                    slot.level = 0.0;
                    debug!(device = %device, "{} finished", effect.label());
                }
            }
        });
        slot.effect = Some(RunningEffect {
            effect,
            task: ScheduledTask { generation, handle },
        });
        Ok(())
    }

    /// Device config update. Buttons take `pressed` to simulate a press or
    /// release; other keys and other device kinds are acknowledged unchanged.
    pub fn configure(&self, name: &str, config: &Map<String, Value>) -> Result<DeviceStatus, DeviceError> {
        let kind = self.kind_of(name)?;
        if kind == DeviceKind::Button {
            if let Some(value) = config.get("pressed") {
                let pressed = value.as_bool().ok_or_else(|| DeviceError::InvalidValue {
                    device: name.to_string(),
                    reason: format!("pressed must be a boolean, got {value}"),
                })?;
                self.set_pressed(name, pressed);
                info!(device = %name, pressed, "button state simulated");
            }
        }
        self.status(name)
    }

    fn kind_of(&self, name: &str) -> Result<DeviceKind, DeviceError> {
        self.table.lock().slot_mut(name).map(|slot| slot.kind)
    }

    pub fn set_pressed(&self, name: &str, pressed: bool) {
        if let Some(slot) = self.table.lock().slots.get_mut(name) {
            slot.pressed = pressed;
        }
    }
}

/// Effect length in seconds; absent or zero means the default
fn effect_duration(device: &str, value: Option<&Value>, default: f64) -> Result<f64, DeviceError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(secs) if secs == 0.0 => Ok(default),
            Some(secs) if secs > 0.0 && secs <= MAX_EFFECT_SECS => Ok(secs),
            _ => Err(DeviceError::InvalidValue {
                device: device.to_string(),
                reason: format!("duration must be between 0 and {MAX_EFFECT_SECS}s, got {n}"),
            }),
        },
        Some(other) => Err(DeviceError::InvalidValue {
            device: device.to_string(),
            reason: format!("duration must be a number, got {other}"),
        }),
    }
}

/// Duty cycle clamped to [0.0, 1.0]; absent means 0
fn pwm_level(device: &str, value: Option<&Value>) -> Result<f64, DeviceError> {
    let raw = match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match raw {
        Some(level) if level.is_finite() => Ok(level.clamp(0.0, 1.0)),
        _ => Err(DeviceError::InvalidValue {
            device: device.to_string(),
            reason: "value must be a number between 0.0 and 1.0".to_string(),
        }),
    }
}
