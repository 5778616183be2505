//! Dynamixel-style packet codec.
//!
//! ```text
//! Outbound: [0xFF][0xFF][id][length][instruction][param...][checksum]
//! Inbound:  [0xFF][0xFF][id][length][error][param...][checksum]
//! ```
//!
//! The codec never fails: it builds frames and returns verdicts. Turning a
//! verdict into an error is up to the caller.

pub const HDR_BYTE: u8 = 0xFF;
pub const HEADER: [u8; 2] = [HDR_BYTE, HDR_BYTE];
pub const BROADCAST_ID: u8 = 0xFE;

/// Size of a status packet with no parameters.
pub const RESPONSE_BYTES: usize = 6;

/// Byte offsets inside every frame.
pub mod idx {
    pub const ID: usize = 2;
    pub const LENGTH: usize = 3;
    pub const INSTRUCTION: usize = 4;
    pub const ERROR: usize = 4;
    pub const PARAM_0: usize = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    WriteDeferred = 0x04,
    ExecDeferred = 0x05,
}

/// Control table addresses.
pub mod reg {
    pub const MODEL_NUMBER: u8 = 0x00;
    pub const FIRMWARE_VERSION: u8 = 0x02;
    pub const ID: u8 = 0x03;
    /// Model (2) + firmware (1) + id (1).
    pub const IDENTITY_LEN: u8 = 4;

    pub const TORQUE_ENABLE: u8 = 0x18;
    pub const LED: u8 = 0x19;
    pub const GOAL_POSITION: u8 = 0x1E;
    pub const MOVING_SPEED: u8 = 0x20;

    pub const PRESENT_POSITION: u8 = 0x24;
    pub const PRESENT_SPEED: u8 = 0x26;
    pub const PRESENT_LOAD: u8 = 0x28;
    pub const PRESENT_VOLTAGE: u8 = 0x2A;
    pub const PRESENT_TEMPERATURE: u8 = 0x2B;
    pub const REGISTERED: u8 = 0x2C;
    pub const MOVING: u8 = 0x2E;

    /// A telemetry refresh reads from the torque register through the
    /// moving flag in one request.
    pub const STATUS_BLOCK_START: u8 = TORQUE_ENABLE;
    pub const STATUS_BLOCK_LEN: u8 = MOVING - TORQUE_ENABLE + 1;
}

/// Validation stages. Each stage implies every stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Depth {
    MinLength = 0,
    FirstHeader = 1,
    SecondHeader = 2,
    Length = 3,
    ErrorByte = 4,
    Checksum = 5,
}

impl Depth {
    pub const FULL: Depth = Depth::Checksum;
}

/// Outcome of [`inspect`]: either valid, or the first stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Failed(Depth),
}

pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |a, &b| a.wrapping_add(b));
    255 - sum
}

/// Build a frame: headers, id, length, instruction, payload, checksum.
pub fn encode(id: u8, instruction: Instruction, payload: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(RESPONSE_BYTES + payload.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push((payload.len() + 2) as u8);
    pkt.push(instruction as u8);
    pkt.extend_from_slice(payload);
    pkt.push(checksum(&pkt[idx::ID..]));
    pkt
}

/// Build a status frame as a servo would send it.
pub fn encode_status(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(RESPONSE_BYTES + params.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push((params.len() + 2) as u8);
    pkt.push(error);
    pkt.extend_from_slice(params);
    pkt.push(checksum(&pkt[idx::ID..]));
    pkt
}

pub fn read_request(id: u8, addr: u8, count: u8) -> Vec<u8> {
    encode(id, Instruction::Read, &[addr, count])
}

pub fn write_request(id: u8, addr: u8, values: &[u8], deferred: bool) -> Vec<u8> {
    let mut payload = Vec::with_capacity(values.len() + 1);
    payload.push(addr);
    payload.extend_from_slice(values);
    let inst = if deferred { Instruction::WriteDeferred } else { Instruction::Write };
    encode(id, inst, &payload)
}

/// Run validation stages `0..=depth` and report the first failure.
pub fn inspect(bytes: &[u8], depth: Depth) -> Verdict {
    let stages = [
        Depth::MinLength,
        Depth::FirstHeader,
        Depth::SecondHeader,
        Depth::Length,
        Depth::ErrorByte,
        Depth::Checksum,
    ];
    for stage in stages.into_iter().take_while(|s| *s <= depth) {
        let ok = match stage {
            Depth::MinLength => bytes.len() >= RESPONSE_BYTES,
            Depth::FirstHeader => bytes[0] == HDR_BYTE,
            Depth::SecondHeader => bytes[1] == HDR_BYTE,
            Depth::Length => usize::from(bytes[idx::LENGTH]) == bytes.len() - idx::LENGTH - 1,
            Depth::ErrorByte => bytes[idx::ERROR] == 0,
            Depth::Checksum => {
                let last = bytes.len() - 1;
                checksum(&bytes[idx::ID..last]) == bytes[last]
            }
        };
        if !ok {
            return Verdict::Failed(stage);
        }
    }
    Verdict::Valid
}

pub fn is_valid_response(bytes: &[u8], depth: Depth) -> bool {
    inspect(bytes, depth) == Verdict::Valid
}

/// Parameter bytes of a status frame. Only meaningful on a frame that
/// passed [`Depth::Length`].
pub fn payload(bytes: &[u8]) -> &[u8] {
    if bytes.len() < RESPONSE_BYTES {
        return &[];
    }
    &bytes[idx::PARAM_0..bytes.len() - 1]
}

#[inline]
pub fn split_word(w: u16) -> [u8; 2] {
    w.to_be_bytes()
}

#[inline]
pub fn word(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_hand_computed_value() {
        // id 1, len 4, READ, addr 0x2B, count 1 -> 0xCC
        assert_eq!(checksum(&[0x01, 0x04, 0x02, 0x2B, 0x01]), 0xCC);
        assert_eq!(checksum(&[]), 0xFF);
        assert_eq!(checksum(&[0xFF, 0x01]), 0xFF);
    }

    #[test]
    fn encodes_read_request() {
        let pkt = read_request(1, 0x2B, 1);
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x2B, 0x01, 0xCC]);
    }

    #[test]
    fn encodes_write_with_length_covering_params() {
        let pkt = write_request(3, reg::GOAL_POSITION, &split_word(0x0800), false);
        assert_eq!(pkt[idx::LENGTH], 5);
        assert_eq!(pkt[idx::INSTRUCTION], Instruction::Write as u8);
        assert_eq!(&pkt[idx::PARAM_0..pkt.len() - 1], &[0x1E, 0x08, 0x00]);
        let deferred = write_request(3, reg::GOAL_POSITION, &[0, 1], true);
        assert_eq!(deferred[idx::INSTRUCTION], Instruction::WriteDeferred as u8);
    }

    #[test]
    fn encoded_status_is_valid_at_every_depth() {
        for params in [&[][..], &[0x10][..], &[1, 2, 3, 4, 5, 6, 7, 8][..]] {
            let frame = encode_status(7, 0, params);
            for depth in [Depth::MinLength, Depth::Length, Depth::FULL] {
                assert!(is_valid_response(&frame, depth));
            }
            assert_eq!(payload(&frame), params);
        }
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let frame = encode_status(4, 0, &[0x08, 0x00, 0x12]);
        for i in 0..frame.len() {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut bad = frame.clone();
                bad[i] ^= flip;
                assert!(!is_valid_response(&bad, Depth::FULL), "byte {i} flip {flip:#x}");
            }
        }
    }

    #[test]
    fn reports_first_failing_stage() {
        let frame = encode_status(1, 0, &[0xAA]);
        assert_eq!(inspect(&frame[..4], Depth::FULL), Verdict::Failed(Depth::MinLength));

        let mut bad = frame.clone();
        bad[0] = 0x00;
        assert_eq!(inspect(&bad, Depth::FULL), Verdict::Failed(Depth::FirstHeader));

        let mut bad = frame.clone();
        bad[idx::LENGTH] = 9;
        assert_eq!(inspect(&bad, Depth::FULL), Verdict::Failed(Depth::Length));

        let erred = encode_status(1, 0x20, &[]);
        assert_eq!(inspect(&erred, Depth::FULL), Verdict::Failed(Depth::ErrorByte));

        let mut bad = frame.clone();
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);
        assert_eq!(inspect(&bad, Depth::FULL), Verdict::Failed(Depth::Checksum));
    }

    #[test]
    fn shallow_depth_skips_later_stages() {
        let mut frame = encode_status(2, 0, &[1, 2]);
        let last = frame.len() - 1;
        frame[last] ^= 0x55;
        assert!(is_valid_response(&frame, Depth::ErrorByte));
        assert!(!is_valid_response(&frame, Depth::Checksum));
    }

    #[test]
    fn words_are_big_endian() {
        assert_eq!(split_word(0x0102), [0x01, 0x02]);
        assert_eq!(word(0x0F, 0xFF), 4095);
    }
}
