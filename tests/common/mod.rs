#![allow(dead_code)]

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use dxl_arm_controller::{
    protocol::{self, idx, reg, Instruction, BROADCAST_ID},
    BusTransport, ControlError, ProtocolTiming,
};

pub const MODEL: u16 = 0x001D;
pub const FIRMWARE: u8 = 0x24;

/// One emulated servo: a control table plus fault switches.
#[derive(Debug, Clone)]
pub struct FakeServo {
    pub table: [u8; 0x32],
    /// Never answers.
    pub silent: bool,
    /// Flip the checksum of the next reply.
    pub corrupt_next: bool,
    /// Answer with only this many bytes of the next reply.
    pub truncate_next: Option<usize>,
    pending: Option<(u8, Vec<u8>)>,
}

impl FakeServo {
    pub fn new(id: u8) -> Self {
        let mut table = [0u8; 0x32];
        table[0..2].copy_from_slice(&protocol::split_word(MODEL));
        table[usize::from(reg::FIRMWARE_VERSION)] = FIRMWARE;
        table[usize::from(reg::ID)] = id;
        table[usize::from(reg::PRESENT_VOLTAGE)] = 118;
        table[usize::from(reg::PRESENT_TEMPERATURE)] = 31;
        Self { table, silent: false, corrupt_next: false, truncate_next: None, pending: None }
    }

    pub fn torque_on(mut self) -> Self {
        self.table[usize::from(reg::TORQUE_ENABLE)] = 1;
        self
    }

    pub fn word(&self, addr: u8) -> u16 {
        protocol::word(self.table[usize::from(addr)], self.table[usize::from(addr) + 1])
    }

    fn write(&mut self, addr: u8, values: &[u8]) {
        let start = usize::from(addr);
        self.table[start..start + values.len()].copy_from_slice(values);
        if addr == reg::GOAL_POSITION {
            // moves instantly
            self.table[usize::from(reg::PRESENT_POSITION)..usize::from(reg::PRESENT_POSITION) + 2]
                .copy_from_slice(values);
            self.table[usize::from(reg::MOVING)] = 0;
        }
    }
}

/// In-memory bus answering like a chain of servos.
#[derive(Debug, Default)]
pub struct FakeBus {
    pub servos: BTreeMap<u8, FakeServo>,
    pub sent: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
}

impl FakeBus {
    pub fn with(servos: impl IntoIterator<Item = FakeServo>) -> Self {
        let servos = servos
            .into_iter()
            .map(|s| (s.table[usize::from(reg::ID)], s))
            .collect();
        Self { servos, ..Self::default() }
    }

    pub fn servo(&mut self, id: u8) -> &mut FakeServo {
        self.servos.get_mut(&id).expect("no such fake servo")
    }

    pub fn sent_instructions(&self) -> Vec<(u8, u8)> {
        self.sent.iter().map(|f| (f[idx::ID], f[idx::INSTRUCTION])).collect()
    }

    pub fn clear_log(&mut self) {
        self.sent.clear();
    }

    fn handle(&mut self, frame: &[u8]) {
        let id = frame[idx::ID];
        let inst = frame[idx::INSTRUCTION];
        let params = &frame[idx::PARAM_0..frame.len() - 1];

        if id == BROADCAST_ID {
            if inst == Instruction::ExecDeferred as u8 {
                for servo in self.servos.values_mut() {
                    if let Some((addr, values)) = servo.pending.take() {
                        servo.write(addr, &values);
                        servo.table[usize::from(reg::REGISTERED)] = 0;
                    }
                }
            }
            return;
        }

        let Some(mut servo) = self.servos.remove(&id) else { return };
        let mut reply_id = id;
        let reply = if servo.silent {
            None
        } else if inst == Instruction::Ping as u8 {
            Some(vec![])
        } else if inst == Instruction::Read as u8 {
            let (addr, count) = (usize::from(params[0]), usize::from(params[1]));
            Some(servo.table[addr..addr + count].to_vec())
        } else if inst == Instruction::Write as u8 {
            servo.write(params[0], &params[1..]);
            if params[0] == reg::ID {
                reply_id = params[1];
            }
            Some(vec![])
        } else if inst == Instruction::WriteDeferred as u8 {
            servo.pending = Some((params[0], params[1..].to_vec()));
            servo.table[usize::from(reg::REGISTERED)] = 1;
            Some(vec![])
        } else {
            None
        };

        if let Some(params) = reply {
            let mut bytes = protocol::encode_status(reply_id, 0, &params);
            if std::mem::take(&mut servo.corrupt_next) {
                let last = bytes.len() - 1;
                bytes[last] ^= 0x5A;
            }
            if let Some(n) = servo.truncate_next.take() {
                bytes.truncate(n);
            }
            self.rx.extend(bytes);
        }
        self.servos.insert(reply_id, servo);
    }
}

impl BusTransport for FakeBus {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ControlError> {
        self.sent.push(bytes.to_vec());
        if protocol::checksum(&bytes[idx::ID..bytes.len() - 1]) == bytes[bytes.len() - 1] {
            self.handle(bytes);
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, ControlError> {
        Ok(self.rx.len())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ControlError> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

pub fn fast_timing() -> ProtocolTiming {
    ProtocolTiming {
        response_timeout: Duration::from_millis(5),
        poll_interval: Duration::from_millis(1),
        handshake_timeout: Duration::from_millis(40),
        handshake_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(3),
        feedback_interval: Duration::from_millis(1),
    }
}
