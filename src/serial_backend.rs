//! Controller backed by real servos on a serial bus.

use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    controller::{check_rename, checked_target, plan_positions, Controller, DisplayMode},
    error::ControlError,
    execution::{transmit, ProtocolTiming, Reply, Transaction},
    model::{check_speed, ServoKind, ServoStatus},
    protocol::{self, reg, Instruction, BROADCAST_ID, RESPONSE_BYTES},
    registry::{Access, DeviceRegistry},
    servo::ServoState,
    transport::BusTransport,
    transport_serial::{SerialConfig, SerialTransport},
};

pub struct SerialController<T: BusTransport> {
    bus: T,
    registry: DeviceRegistry,
    mode: DisplayMode,
    timing: ProtocolTiming,
    expected_model: Option<u16>,
}

impl SerialController<SerialTransport> {
    pub fn open(cfg: &SerialConfig) -> Result<Self, ControlError> {
        Ok(Self::new(SerialTransport::open(cfg)?))
    }
}

impl<T: BusTransport> SerialController<T> {
    pub fn new(bus: T) -> Self {
        Self {
            bus,
            registry: DeviceRegistry::new(),
            mode: DisplayMode::default(),
            timing: ProtocolTiming::default(),
            expected_model: None,
        }
    }

    pub fn with_timing(mut self, timing: ProtocolTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reject servos reporting another model number during the handshake.
    pub fn with_expected_model(mut self, model: u16) -> Self {
        self.expected_model = Some(model);
        self
    }

    pub fn transport(&self) -> &T {
        &self.bus
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    /// Load a goal position that only takes effect on the next [`action`].
    ///
    /// [`action`]: SerialController::action
    pub fn set_position_deferred(&mut self, id: u8, position: i32) -> Result<bool, ControlError> {
        let outcome = checked_target(&self.registry, id, position)
            .and_then(|pos| self.write_goal(id, pos, true));
        self.mode.settle("set_position_deferred", outcome)
    }

    /// Release every pending deferred write at once.
    pub fn action(&mut self) -> Result<bool, ControlError> {
        let outcome = self.broadcast(Instruction::ExecDeferred, &[]);
        self.mode.settle("action", outcome)
    }

    fn read<A>(&mut self, id: u8, addr: u8, count: u8, apply: A) -> Result<(), ControlError>
    where
        A: FnOnce(&mut ServoState, &[u8]) -> Result<(), ControlError>,
    {
        self.read_with(Transaction::new(id, &self.timing), addr, count, apply)
    }

    fn read_with<A>(&mut self, tx: Transaction, addr: u8, count: u8, apply: A) -> Result<(), ControlError>
    where
        A: FnOnce(&mut ServoState, &[u8]) -> Result<(), ControlError>,
    {
        tx.run(
            &mut self.registry,
            &mut self.bus,
            |servo, bus| {
                transmit(bus, &protocol::read_request(servo.id, addr, count))?;
                Ok(Reply::Expect(RESPONSE_BYTES + usize::from(count)))
            },
            apply,
        )
    }

    fn write<A>(&mut self, id: u8, addr: u8, values: &[u8], deferred: bool, apply: A) -> Result<(), ControlError>
    where
        A: FnOnce(&mut ServoState, &[u8]) -> Result<(), ControlError>,
    {
        Transaction::new(id, &self.timing).run(
            &mut self.registry,
            &mut self.bus,
            |servo, bus| {
                transmit(bus, &protocol::write_request(servo.id, addr, values, deferred))?;
                Ok(Reply::Expect(RESPONSE_BYTES))
            },
            apply,
        )
    }

    fn write_goal(&mut self, id: u8, position: u16, deferred: bool) -> Result<(), ControlError> {
        self.write(id, reg::GOAL_POSITION, &protocol::split_word(position), deferred, |s, _| {
            s.target_position = position;
            Ok(())
        })
    }

    /// Load a deferred goal without touching the recorded target.
    fn load_goal(&mut self, id: u8, position: u16) -> Result<(), ControlError> {
        self.write(id, reg::GOAL_POSITION, &protocol::split_word(position), true, |_, _| Ok(()))
    }

    /// Load every goal of `plan`, release them together and only then
    /// record the new targets.
    fn release_pose(&mut self, plan: &[(u8, u16)]) -> Result<(), ControlError> {
        for (n, &(id, pos)) in plan.iter().enumerate() {
            if let Err(e) = self.load_goal(id, pos) {
                // a rejected ack does not prove the servo ignored the write
                self.cancel_pose(&plan[..=n]);
                return Err(e);
            }
        }
        self.broadcast(Instruction::ExecDeferred, &[])?;
        for &(id, pos) in plan {
            if let Some(servo) = self.registry.get_mut(id) {
                servo.target_position = pos;
            }
        }
        Ok(())
    }

    /// Overwrite the goals loaded so far with each servo's current target,
    /// then release them so no stale write stays pending. If one of the
    /// overwrites is not acknowledged nothing is released.
    fn cancel_pose(&mut self, loaded: &[(u8, u16)]) {
        let mut restored = true;
        for &(id, _) in loaded {
            let Some(current) = self.registry.get(id).map(|s| s.target_position) else {
                continue;
            };
            if let Err(e) = self.load_goal(id, current) {
                warn!(id, "could not restore goal after an aborted pose: {e}");
                restored = false;
            }
        }
        if !restored {
            warn!("aborted pose left deferred writes pending");
            return;
        }
        if let Err(e) = self.broadcast(Instruction::ExecDeferred, &[]) {
            warn!("could not release restored goals: {e}");
        }
    }

    fn broadcast(&mut self, inst: Instruction, payload: &[u8]) -> Result<(), ControlError> {
        transmit(&mut self.bus, &protocol::encode(BROADCAST_ID, inst, payload))
    }

    /// Ask one servo who it is; on a matching answer mark it connected and
    /// pick up its torque state.
    fn probe(&mut self, id: u8) -> Result<(), ControlError> {
        let expected_model = self.expected_model;
        let tx = Transaction::new(id, &self.timing)
            .access(Access::Registered)
            .timeout(self.timing.probe_timeout);
        self.read_with(tx, reg::MODEL_NUMBER, reg::IDENTITY_LEN, |servo, p| {
            let model = protocol::word(p[0], p[1]);
            let firmware = p[usize::from(reg::FIRMWARE_VERSION)];
            let reported_id = p[usize::from(reg::ID)];
            if reported_id != servo.id || expected_model.is_some_and(|m| m != model) {
                return Err(ControlError::Protocol { id: servo.id, bytes: p.to_vec() });
            }
            servo.model_number = Some(model);
            servo.firmware_version = Some(firmware);
            servo.status = ServoStatus::Connected;
            Ok(())
        })?;

        // the goal already loaded on the servo becomes its recorded target
        if let Err(e) = self.read(id, reg::STATUS_BLOCK_START, reg::STATUS_BLOCK_LEN, |s, p| {
            apply_status_block(s, p);
            let at = usize::from(reg::GOAL_POSITION - reg::STATUS_BLOCK_START);
            s.target_position = protocol::word(p[at], p[at + 1]);
            Ok(())
        }) {
            debug!(id, "state unknown after handshake: {e}");
        }
        Ok(())
    }

    fn offline_ids(&self) -> Vec<u8> {
        self.registry.iter().filter(|s| !s.is_online()).map(|s| s.id).collect()
    }

    fn online_count(&self) -> usize {
        self.registry.iter().filter(|s| s.is_online()).count()
    }
}

/// Decode the block read by a telemetry refresh, which starts at the
/// torque register.
fn apply_status_block(servo: &mut ServoState, p: &[u8]) {
    let at = |addr: u8| usize::from(addr - reg::STATUS_BLOCK_START);
    let word_at = |addr: u8| protocol::word(p[at(addr)], p[at(addr) + 1]);

    servo.position = word_at(reg::PRESENT_POSITION);
    servo.speed = word_at(reg::PRESENT_SPEED);
    servo.load = word_at(reg::PRESENT_LOAD);
    servo.voltage = p[at(reg::PRESENT_VOLTAGE)];
    servo.temperature = p[at(reg::PRESENT_TEMPERATURE)];
    servo.instruction_registered = p[at(reg::REGISTERED)] != 0;
    servo.in_movement = p[at(reg::MOVING)] != 0;
    servo.apply_torque(p[at(reg::TORQUE_ENABLE)] != 0);
    servo.last_update = Instant::now();
}

impl<T: BusTransport> Controller for SerialController<T> {
    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    fn set_display_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    fn feedback_interval(&self) -> Duration {
        self.timing.feedback_interval
    }

    fn connect(&mut self) -> Result<usize, ControlError> {
        if self.registry.is_empty() {
            return Err(ControlError::ConnectionFailed);
        }

        let deadline = Instant::now().checked_add(self.timing.handshake_timeout);
        let mut pending = self.offline_ids();
        while !pending.is_empty() {
            let round = Instant::now();
            self.bus.clear_input()?;
            self.broadcast(Instruction::Ping, &[])?;
            for id in pending {
                if let Err(e) = self.probe(id) {
                    debug!(id, "no identity yet: {e}");
                }
            }

            pending = self.offline_ids();
            let now = Instant::now();
            if pending.is_empty() || deadline.is_some_and(|d| now >= d) {
                break;
            }
            let next = round.checked_add(self.timing.handshake_interval);
            let next = match (next, deadline) {
                (Some(n), Some(d)) => n.min(d),
                (Some(t), None) | (None, Some(t)) => t,
                (None, None) => now,
            };
            thread::sleep(next.saturating_duration_since(now));
        }

        let online = self.online_count();
        if online == 0 {
            warn!("handshake timed out, no servo answered");
            return Err(ControlError::ConnectionFailed);
        }
        for id in self.offline_ids() {
            warn!(id, "servo did not answer the handshake");
        }
        info!(online, total = self.registry.len(), "servo bus connected");
        Ok(online)
    }

    fn ping(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = Transaction::new(id, &self.timing).access(Access::Registered).run(
            &mut self.registry,
            &mut self.bus,
            |servo, bus| {
                transmit(bus, &protocol::encode(servo.id, Instruction::Ping, &[]))?;
                Ok(Reply::Expect(RESPONSE_BYTES))
            },
            |_, _| Ok(()),
        );
        self.mode.settle("ping", outcome)
    }

    fn add_motor(&mut self, id: u8, name: &str, kind: ServoKind) -> Result<bool, ControlError> {
        let outcome = self.registry.insert(ServoState::new(id, name, kind, Instant::now()));
        self.mode.settle("add_motor", outcome)
    }

    fn remove_motor(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.registry.remove(id).map(|_| ());
        self.mode.settle("remove_motor", outcome)
    }

    fn change_id(&mut self, old: u8, new: u8) -> Result<bool, ControlError> {
        let outcome = check_rename(&self.registry, old, new)
            .and_then(|()| {
                // the acknowledgment already comes from the new id
                Transaction::new(old, &self.timing).run(
                    &mut self.registry,
                    &mut self.bus,
                    |servo, bus| {
                        transmit(bus, &protocol::write_request(servo.id, reg::ID, &[new], false))?;
                        Ok(Reply::ExpectFrom(RESPONSE_BYTES, new))
                    },
                    |_, _| Ok(()),
                )
            })
            .and_then(|()| self.registry.rename(old, new));
        self.mode.settle("change_id", outcome)
    }

    fn turn_led(&mut self, id: u8, on: bool) -> Result<bool, ControlError> {
        if self.registry.get(id).is_some_and(|s| s.is_online() && s.active_led == on) {
            return Ok(true);
        }
        let outcome = self.write(id, reg::LED, &[u8::from(on)], false, |s, _| {
            s.active_led = on;
            Ok(())
        });
        self.mode.settle("turn_led", outcome)
    }

    fn toggle_led(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = match self.registry.get(id) {
            Some(s) => {
                let on = !s.active_led;
                self.write(id, reg::LED, &[u8::from(on)], false, |s, _| {
                    s.active_led = on;
                    Ok(())
                })
            }
            None => Err(ControlError::UnknownId(id)),
        };
        self.mode.settle("toggle_led", outcome)
    }

    fn change_speed(&mut self, id: u8, speed: u16) -> Result<bool, ControlError> {
        let outcome = check_speed(id, speed).and_then(|()| {
            self.write(id, reg::MOVING_SPEED, &protocol::split_word(speed), false, |s, _| {
                s.target_speed = speed;
                Ok(())
            })
        });
        self.mode.settle("change_speed", outcome)
    }

    fn set_position(&mut self, id: u8, position: i32) -> Result<bool, ControlError> {
        let outcome = checked_target(&self.registry, id, position)
            .and_then(|pos| self.write_goal(id, pos, false));
        self.mode.settle("set_position", outcome)
    }

    /// Loads every goal as a deferred write, then releases them together
    /// so the joints start moving at the same time.
    fn set_positions(&mut self, positions: &[i32]) -> Result<bool, ControlError> {
        let outcome = plan_positions(&self.registry, positions).and_then(|plan| self.release_pose(&plan));
        self.mode.settle("set_positions", outcome)
    }

    fn enable_torque(&mut self, id: u8, enable: bool) -> Result<bool, ControlError> {
        let outcome = self.write(id, reg::TORQUE_ENABLE, &[u8::from(enable)], false, |s, _| {
            s.apply_torque(enable);
            Ok(())
        });
        self.mode.settle("enable_torque", outcome)
    }

    fn torque_enabled(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self
            .read(id, reg::TORQUE_ENABLE, 1, |s, p| {
                s.apply_torque(p[0] != 0);
                Ok(())
            })
            .map(|()| self.registry.get(id).is_some_and(|s| s.torque_enabled));
        self.mode.settle_or("torque_enabled", outcome, false)
    }

    fn update_infos(&mut self, id: u8) -> Result<bool, ControlError> {
        let outcome = self.read(id, reg::STATUS_BLOCK_START, reg::STATUS_BLOCK_LEN, |s, p| {
            apply_status_block(s, p);
            Ok(())
        });
        self.mode.settle("update_infos", outcome)
    }
}
