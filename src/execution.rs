//! The send / await / validate / apply transaction every hardware
//! operation goes through.
//!
//! A [`ServoState`] is only touched by the `apply` step, which runs after a
//! frame passed full validation, or right after a fire-and-forget send.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::ControlError,
    protocol::{self, Depth, Verdict},
    registry::{Access, DeviceRegistry},
    servo::ServoState,
    transport::BusTransport,
};

/// Timing knobs of the serial protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTiming {
    pub response_timeout: Duration,
    pub poll_interval: Duration,
    /// Overall budget of the connection handshake.
    pub handshake_timeout: Duration,
    /// Gap between two broadcast connection requests.
    pub handshake_interval: Duration,
    /// How long a single servo gets to answer its identity probe.
    pub probe_timeout: Duration,
    /// Sleep between telemetry refreshes while waiting for a goal.
    pub feedback_interval: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            handshake_timeout: Duration::from_secs(5),
            handshake_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(20),
            feedback_interval: Duration::from_millis(20),
        }
    }
}

/// What the send step expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Nothing; the send itself counts as success.
    None,
    /// A status frame of exactly this many bytes from the addressed servo.
    Expect(usize),
    /// A status frame of this size coming from another id.
    ExpectFrom(usize, u8),
}

#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    pub id: u8,
    pub access: Access,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Transaction {
    pub fn new(id: u8, timing: &ProtocolTiming) -> Self {
        Self {
            id,
            access: Access::Connected,
            timeout: timing.response_timeout,
            poll_interval: timing.poll_interval,
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the servo, run `send`, await and validate the reply, then
    /// hand the reply's parameter bytes to `apply`.
    pub fn run<T, S, A>(
        self,
        registry: &mut DeviceRegistry,
        bus: &mut T,
        send: S,
        apply: A,
    ) -> Result<(), ControlError>
    where
        T: BusTransport + ?Sized,
        S: FnOnce(&ServoState, &mut T) -> Result<Reply, ControlError>,
        A: FnOnce(&mut ServoState, &[u8]) -> Result<(), ControlError>,
    {
        let servo = registry.resolve(self.id, self.access)?;

        bus.clear_input()?;
        let (expected, reply_id) = match send(servo, &mut *bus)? {
            Reply::None => return apply(servo, &[]),
            Reply::Expect(n) => (n, servo.id),
            Reply::ExpectFrom(n, id) => (n, id),
        };

        let frame = receive(bus, expected, self.timeout, self.poll_interval)?;
        let verdict = if frame.len() == expected {
            protocol::inspect(&frame, Depth::FULL)
        } else {
            Verdict::Failed(Depth::MinLength)
        };

        match verdict {
            Verdict::Valid if frame[protocol::idx::ID] == reply_id => {
                apply(servo, protocol::payload(&frame))
            }
            verdict => {
                debug!(id = servo.id, ?verdict, expected, got = frame.len(), "rejected reply");
                Err(ControlError::Protocol { id: servo.id, bytes: frame })
            }
        }
    }
}

/// Write a request frame.
pub fn transmit<T: BusTransport + ?Sized>(bus: &mut T, pkt: &[u8]) -> Result<(), ControlError> {
    bus.write_all(pkt)
}

/// Poll the bus until `expected` bytes are buffered or `timeout` passes,
/// then read whatever is there (never more than `expected`). A timeout
/// beyond what the clock can represent waits indefinitely.
pub fn receive<T: BusTransport + ?Sized>(
    bus: &mut T,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<u8>, ControlError> {
    let deadline = Instant::now().checked_add(timeout);
    while bus.bytes_available()? < expected && deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(poll_interval);
    }

    let mut buf = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
        let n = bus.read_available(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Instant};

    use super::*;
    use crate::model::{ServoKind, ServoStatus};

    /// Answers every write with the next canned reply.
    #[derive(Default)]
    struct Canned {
        replies: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        sent: Vec<Vec<u8>>,
    }

    impl BusTransport for Canned {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), ControlError> {
            self.sent.push(bytes.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(())
        }

        fn bytes_available(&mut self) -> Result<usize, ControlError> {
            Ok(self.rx.len())
        }

        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ControlError> {
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    fn registry_with(id: u8, status: ServoStatus) -> DeviceRegistry {
        let mut reg = DeviceRegistry::new();
        let mut s = ServoState::new(id, "j", ServoKind::Elbow, Instant::now());
        s.status = status;
        reg.insert(s).unwrap();
        reg
    }

    fn quick(id: u8) -> Transaction {
        Transaction::new(id, &ProtocolTiming::default()).timeout(Duration::from_millis(5))
    }

    fn send_read(count: u8) -> impl FnOnce(&ServoState, &mut Canned) -> Result<Reply, ControlError> {
        move |servo: &ServoState, bus: &mut Canned| {
            transmit(bus, &protocol::read_request(servo.id, 0x24, count))?;
            Ok(Reply::Expect(protocol::RESPONSE_BYTES + count as usize))
        }
    }

    #[test]
    fn applies_valid_reply() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        bus.replies.push_back(protocol::encode_status(4, 0, &[0x07, 0xD0]));

        quick(4)
            .run(&mut reg, &mut bus, send_read(2), |s, p| {
                s.position = protocol::word(p[0], p[1]);
                Ok(())
            })
            .unwrap();

        assert_eq!(reg.get(4).unwrap().position, 2000);
        assert_eq!(bus.sent.len(), 1);
    }

    #[test]
    fn truncated_reply_is_protocol_error_and_state_untouched() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        let full = protocol::encode_status(4, 0, &[0x07, 0xD0]);
        bus.replies.push_back(full[..5].to_vec());

        let err = quick(4)
            .run(&mut reg, &mut bus, send_read(2), |s, _| {
                s.position = 1;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err, ControlError::Protocol { id: 4, bytes: full[..5].to_vec() });
        assert_eq!(reg.get(4).unwrap().position, 0);
    }

    #[test]
    fn unbounded_timeout_still_returns_buffered_reply() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        bus.replies.push_back(protocol::encode_status(4, 0, &[0x01, 0x00]));

        quick(4)
            .timeout(Duration::MAX)
            .run(&mut reg, &mut bus, send_read(2), |s, p| {
                s.position = protocol::word(p[0], p[1]);
                Ok(())
            })
            .unwrap();
        assert_eq!(reg.get(4).unwrap().position, 256);
    }

    #[test]
    fn reply_from_wrong_id_is_rejected() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        bus.replies.push_back(protocol::encode_status(5, 0, &[0x00, 0x01]));

        let err = quick(4).run(&mut reg, &mut bus, send_read(2), |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ControlError::Protocol { id: 4, .. }));
    }

    #[test]
    fn offline_servo_is_not_contacted() {
        let mut reg = registry_with(4, ServoStatus::Offline);
        let mut bus = Canned::default();
        let err = quick(4).run(&mut reg, &mut bus, send_read(2), |_, _| Ok(())).unwrap_err();
        assert_eq!(err, ControlError::NotConnected(4));
        assert!(bus.sent.is_empty());

        let err = quick(9).run(&mut reg, &mut bus, send_read(2), |_, _| Ok(())).unwrap_err();
        assert_eq!(err, ControlError::UnknownId(9));
    }

    #[test]
    fn fire_and_forget_applies_immediately() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        quick(4)
            .run(
                &mut reg,
                &mut bus,
                |_, bus| {
                    transmit(bus, &[0xFF])?;
                    Ok(Reply::None)
                },
                |s, p| {
                    assert!(p.is_empty());
                    s.target_position = 42;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(reg.get(4).unwrap().target_position, 42);
    }

    #[test]
    fn failed_send_aborts() {
        let mut reg = registry_with(4, ServoStatus::Connected);
        let mut bus = Canned::default();
        let err = quick(4)
            .run(
                &mut reg,
                &mut bus,
                |_, _| Err(ControlError::Communication("port gone".into())),
                |s, _| {
                    s.target_position = 42;
                    Ok(())
                },
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::Communication(_)));
        assert_eq!(reg.get(4).unwrap().target_position, 0);
    }
}
