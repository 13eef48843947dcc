//! Optimistic device control.
//!
//! Every device carries a `desired` value (what the user asked for) and a
//! `confirmed` value (what the store last acknowledged). Writes update
//! `desired` immediately and reconcile when the store answers.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use integrations::DeviceStateStore;
use shared::{
    domain::{DeviceId, PowerState},
    protocol::VoiceCommandResponse,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_PULSE_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub desired: PowerState,
    pub confirmed: PowerState,
}

impl DeviceState {
    fn off(device_id: DeviceId) -> Self {
        Self {
            device_id,
            desired: PowerState::Off,
            confirmed: PowerState::Off,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.desired == self.confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Desired {
        device: DeviceId,
        state: PowerState,
    },
    Confirmed {
        device: DeviceId,
        state: PowerState,
    },
    RolledBack {
        device: DeviceId,
        state: PowerState,
        error: String,
    },
}

/// Known devices plus the spoken aliases that resolve to them.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceId>,
    aliases: HashMap<String, DeviceId>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(["fan", "lights", "party", "buzzer", "servo"]).with_alias("light", "lights")
    }
}

impl DeviceRegistry {
    pub fn new<'a>(devices: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            devices: devices.into_iter().map(DeviceId::from).collect(),
            aliases: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str, device: &str) -> Self {
        self.aliases
            .insert(alias.to_ascii_lowercase(), DeviceId::from(device));
        self
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn resolve(&self, name: &str) -> Option<DeviceId> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(device) = self.devices.iter().find(|d| d.as_str() == name) {
            return Some(device.clone());
        }
        self.aliases
            .get(&name)
            .filter(|target| self.devices.contains(target))
            .cloned()
    }
}

#[derive(Debug)]
struct Slot {
    state: DeviceState,
    latest_write: u64,
    in_flight: Arc<AtomicUsize>,
}

impl Slot {
    fn new(device: DeviceId) -> Self {
        Self {
            state: DeviceState::off(device),
            latest_write: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    /// With nothing outstanding the last arrival wins outright. Returns the
    /// new `desired` when it moved.
    fn settle_if_idle(&mut self) -> Option<PowerState> {
        if self.is_idle() && !self.state.is_settled() {
            self.state.desired = self.state.confirmed;
            Some(self.state.desired)
        } else {
            None
        }
    }
}

/// One outstanding store write. Dropping it without [`PendingWrite::finish`]
/// (the `set_device` future was abandoned) still releases the slot.
struct PendingWrite<'a> {
    dispatcher: &'a DeviceDispatcher,
    device: &'a DeviceId,
    counter: Arc<AtomicUsize>,
    finished: bool,
}

impl PendingWrite<'_> {
    fn finish(mut self) {
        self.finished = true;
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.counter.fetch_sub(1, Ordering::AcqRel);
        debug!(device = %self.device, "device write abandoned");
        // Best effort; load_states or the next write settles the slot otherwise.
        if let Ok(mut slots) = self.dispatcher.slots.try_lock() {
            if let Some(state) = slots.get_mut(self.device).and_then(Slot::settle_if_idle) {
                self.dispatcher.emit(DeviceEvent::Desired {
                    device: self.device.clone(),
                    state,
                });
            }
        }
    }
}

pub struct DeviceDispatcher {
    store: Arc<dyn DeviceStateStore>,
    registry: DeviceRegistry,
    slots: Mutex<HashMap<DeviceId, Slot>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceDispatcher {
    pub fn new(store: Arc<dyn DeviceStateStore>, registry: DeviceRegistry) -> Self {
        let slots = registry
            .devices()
            .iter()
            .map(|device| (device.clone(), Slot::new(device.clone())))
            .collect();
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            registry,
            slots: Mutex::new(slots),
            events,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self, device: &DeviceId) -> Option<DeviceState> {
        self.slots
            .lock()
            .await
            .get(device)
            .map(|slot| slot.state.clone())
    }

    /// States in registry order.
    pub async fn snapshot(&self) -> Vec<DeviceState> {
        let slots = self.slots.lock().await;
        self.registry
            .devices()
            .iter()
            .filter_map(|device| slots.get(device).map(|slot| slot.state.clone()))
            .collect()
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Sets `desired` now, writes remotely, then commits or rolls back.
    pub async fn set_device(
        &self,
        device: &DeviceId,
        desired: PowerState,
    ) -> ClientResult<PowerState> {
        let (write_id, pending) = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(device)
                .ok_or_else(|| ClientError::UnknownDevice(device.to_string()))?;
            slot.latest_write += 1;
            slot.in_flight.fetch_add(1, Ordering::AcqRel);
            slot.state.desired = desired;
            let pending = PendingWrite {
                dispatcher: self,
                device,
                counter: slot.in_flight.clone(),
                finished: false,
            };
            (slot.latest_write, pending)
        };
        self.emit(DeviceEvent::Desired {
            device: device.clone(),
            state: desired,
        });
        debug!(%device, %desired, write_id, "issuing device write");

        let result = self.store.write_state(device, desired).await;

        let mut slots = self.slots.lock().await;
        pending.finish();
        let slot = slots
            .get_mut(device)
            .ok_or_else(|| ClientError::UnknownDevice(device.to_string()))?;

        let outcome = match result {
            Ok(()) => {
                slot.state.confirmed = desired;
                self.emit(DeviceEvent::Confirmed {
                    device: device.clone(),
                    state: desired,
                });
                Ok(desired)
            }
            Err(error) => {
                if write_id == slot.latest_write {
                    slot.state.desired = slot.state.confirmed;
                    warn!(%device, %error, restored = %slot.state.confirmed, "device write failed; rolled back");
                    self.emit(DeviceEvent::RolledBack {
                        device: device.clone(),
                        state: slot.state.confirmed,
                        error: error.to_string(),
                    });
                } else {
                    warn!(%device, %error, "device write failed behind a newer write");
                }
                Err(ClientError::RemoteWriteFailed {
                    device: device.clone(),
                    source: error,
                })
            }
        };

        if let Some(state) = slot.settle_if_idle() {
            self.emit(DeviceEvent::Desired {
                device: device.clone(),
                state,
            });
        }
        outcome
    }

    pub async fn toggle(&self, device: &DeviceId) -> ClientResult<PowerState> {
        let current = self
            .state(device)
            .await
            .ok_or_else(|| ClientError::UnknownDevice(device.to_string()))?;
        self.set_device(device, current.desired.toggled()).await
    }

    /// Seeds every registered device from the store. Devices with writes in
    /// flight, or whose read fails, keep their current state.
    pub async fn load_states(&self) -> Vec<DeviceState> {
        let reads = self.registry.devices().iter().map(|device| async move {
            (device.clone(), self.store.read_state(device).await)
        });
        let results = join_all(reads).await;

        {
            let mut slots = self.slots.lock().await;
            for (device, result) in results {
                match result {
                    Ok(state) => {
                        if let Some(slot) = slots.get_mut(&device) {
                            if slot.is_idle() {
                                slot.state.desired = state;
                                slot.state.confirmed = state;
                            }
                        }
                    }
                    Err(error) => warn!(%device, %error, "failed to load device state"),
                }
            }
        }
        self.snapshot().await
    }

    /// Folds interpreter actions into device state. Unknown devices and
    /// commands other than on/off are skipped.
    pub async fn apply_command_result(
        &self,
        result: &VoiceCommandResponse,
    ) -> Vec<(DeviceId, ClientResult<PowerState>)> {
        if !result.success {
            return Vec::new();
        }
        let updates: Vec<(DeviceId, PowerState)> = result
            .actions()
            .iter()
            .filter_map(|action| {
                let Some(device) = self.registry.resolve(action.device.as_str()) else {
                    debug!(device = %action.device, "ignoring action for unknown device");
                    return None;
                };
                match action.command.parse::<PowerState>() {
                    Ok(state) => Some((device, state)),
                    Err(error) => {
                        debug!(%device, %error, "ignoring non power action");
                        None
                    }
                }
            })
            .collect();

        join_all(updates.into_iter().map(|(device, state)| async move {
            let outcome = self.set_device(&device, state).await;
            (device, outcome)
        }))
        .await
    }

    /// Turns `device` on, then off again after `duration` regardless of what
    /// happened in between. The returned handle resolves after the off write.
    pub async fn pulse(
        self: &Arc<Self>,
        device: &DeviceId,
        duration: Duration,
    ) -> ClientResult<JoinHandle<()>> {
        self.set_device(device, PowerState::On).await?;
        info!(%device, seconds = duration.as_secs_f32(), "pulse started");

        let dispatcher = Arc::clone(self);
        let device = device.clone();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(error) = dispatcher.set_device(&device, PowerState::Off).await {
                warn!(%device, %error, "pulse shutoff failed");
            }
        }))
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
