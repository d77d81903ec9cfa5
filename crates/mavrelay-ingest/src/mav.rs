use mavlink::{
    ardupilotmega::MavMessage,
    error::ParserError,
    read_v1_raw_message, read_v2_raw_message, MAVLinkV1MessageRaw, MAVLinkV2MessageRaw, MavlinkVersion,
    Message, MAV_STX, MAV_STX_V2,
};
use mavrelay_proto::Payload;
use tracing::debug;

use crate::upstream::RawRecord;

/// A frame whose checksum the dialect vouched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    V1(MAVLinkV1MessageRaw),
    V2(MAVLinkV2MessageRaw),
}

impl Frame {
    pub fn version(&self) -> MavlinkVersion {
        match self {
            Frame::V1(_) => MavlinkVersion::V1,
            Frame::V2(_) => MavlinkVersion::V2,
        }
    }

    pub fn msg_id(&self) -> u32 {
        match self {
            Frame::V1(raw) => raw.message_id() as u32,
            Frame::V2(raw) => raw.message_id(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::V1(raw) => raw.payload(),
            Frame::V2(raw) => raw.payload(),
        }
    }

    fn has_valid_crc(&self) -> bool {
        match self {
            Frame::V1(raw) => raw.has_valid_crc::<MavMessage>(),
            Frame::V2(raw) => raw.has_valid_crc::<MavMessage>(),
        }
    }

    fn wire_len(&self) -> usize {
        match self {
            Frame::V1(raw) => raw.raw_bytes().len(),
            Frame::V2(raw) => raw.raw_bytes().len(),
        }
    }
}

/// What a start byte in a datagram turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scanned {
    Frame(Frame),
    /// Header naming an id the dialect has no checksum seed for. Its length
    /// is not trusted, so whatever follows is still scanned.
    Unknown(u32),
}

/// Walks one datagram start byte by start byte. A header that fails the
/// checksum only costs its start byte: the scan resumes right after it.
pub struct FrameScanner<'a> {
    buf: &'a [u8],
    pos: usize,
    crc_errors: u64,
}

impl<'a> FrameScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, crc_errors: 0 }
    }

    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }
}

impl Iterator for FrameScanner<'_> {
    type Item = Scanned;

    fn next(&mut self) -> Option<Scanned> {
        while self.pos < self.buf.len() {
            let start = self.pos;
            let mut rest = &self.buf[start..];
            let read = match rest[0] {
                MAV_STX_V2 => read_v2_raw_message(&mut rest).map(Frame::V2),
                MAV_STX => read_v1_raw_message(&mut rest).map(Frame::V1),
                _ => {
                    self.pos += 1;
                    continue;
                }
            };
            self.pos = start + 1;
            // truncated: not a frame
            let Ok(frame) = read else { continue };

            if frame.has_valid_crc() {
                self.pos = start + frame.wire_len();
                return Some(Scanned::Frame(frame));
            }
            let msg_id = frame.msg_id();
            if MavMessage::extra_crc(msg_id) == 0 {
                return Some(Scanned::Unknown(msg_id));
            }
            self.crc_errors += 1;
            let end = (start + 32).min(self.buf.len());
            debug!(msg_id, frame = %hex::encode(&self.buf[start..end]), "mavlink crc mismatch");
        }
        None
    }
}

/// Every record in one datagram, in wire order.
pub fn decode_datagram(datagram: &[u8]) -> Vec<RawRecord> {
    let mut scanner = FrameScanner::new(datagram);
    let records = scanner
        .by_ref()
        .filter_map(|scanned| match scanned {
            Scanned::Frame(frame) => decode(&frame),
            Scanned::Unknown(msg_id) => Some(RawRecord { msg_id, payload: Payload::new() }),
        })
        .collect();
    if scanner.crc_errors() > 0 {
        debug!(crc_errors = scanner.crc_errors(), "mavlink: datagram had corrupt frames");
    }
    records
}

/// Decodes a checked frame with the ardupilotmega dialect. Ids the dialect
/// does not know still produce a record (with an empty payload) so the
/// codec can report them.
pub fn decode(frame: &Frame) -> Option<RawRecord> {
    match MavMessage::parse(frame.version(), frame.msg_id(), frame.payload()) {
        Ok(msg) => Some(RawRecord { msg_id: msg.message_id(), payload: flatten(&msg) }),
        Err(ParserError::UnknownMessage { id }) => {
            Some(RawRecord { msg_id: id, payload: Payload::new() })
        }
        Err(e) => {
            debug!(msg_id = frame.msg_id(), "undecodable mavlink payload: {}", e);
            None
        }
    }
}

/// Flat numeric view of the messages viewers care about, in wire field names.
/// Messages without a mapping flatten to an empty payload.
pub fn flatten(msg: &MavMessage) -> Payload {
    match msg {
        MavMessage::GLOBAL_POSITION_INT(d) => Payload::new()
            .with("timeBootMs", d.time_boot_ms)
            .with("lat", d.lat)                 // degE7
            .with("lon", d.lon)                 // degE7
            .with("alt", d.alt)                 // mm MSL
            .with("relativeAlt", d.relative_alt) // mm above home
            .with("vx", d.vx)
            .with("vy", d.vy)
            .with("vz", d.vz)
            .with("hdg", d.hdg),                // cdeg, u16::MAX if unknown
        MavMessage::SIMSTATE(d) => Payload::new()
            .with("roll", d.roll)
            .with("pitch", d.pitch)
            .with("yaw", d.yaw)
            .with("xacc", d.xacc)
            .with("yacc", d.yacc)
            .with("zacc", d.zacc)
            .with("xgyro", d.xgyro)
            .with("ygyro", d.ygyro)
            .with("zgyro", d.zgyro)
            .with("lat", d.lat)
            .with("lng", d.lng),
        MavMessage::ATTITUDE(d) => Payload::new()
            .with("timeBootMs", d.time_boot_ms)
            .with("roll", d.roll)
            .with("pitch", d.pitch)
            .with("yaw", d.yaw)
            .with("rollspeed", d.rollspeed)
            .with("pitchspeed", d.pitchspeed)
            .with("yawspeed", d.yawspeed),
        MavMessage::SYSTEM_TIME(d) => Payload::new()
            .with("timeUnixUsec", d.time_unix_usec)
            .with("timeBootMs", d.time_boot_ms),
        MavMessage::VFR_HUD(d) => Payload::new()
            .with("airspeed", d.airspeed)
            .with("groundspeed", d.groundspeed)
            .with("heading", d.heading)
            .with("throttle", d.throttle)
            .with("alt", d.alt)
            .with("climb", d.climb),
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::ardupilotmega::{GLOBAL_POSITION_INT_DATA, SIMSTATE_DATA};
    use mavlink::MavHeader;
    use mavrelay_proto::Field;

    fn header() -> MavHeader {
        MavHeader { system_id: 1, component_id: 1, sequence: 7 }
    }

    fn simstate() -> MavMessage {
        MavMessage::SIMSTATE(SIMSTATE_DATA {
            lat: -353635360,
            lng: 1491649330,
            ..Default::default()
        })
    }

    fn v2_bytes(msg: &MavMessage) -> Vec<u8> {
        let mut out = Vec::new();
        mavlink::write_v2_msg(&mut out, header(), msg).unwrap();
        out
    }

    fn ids(datagram: &[u8]) -> Vec<u32> {
        decode_datagram(datagram).iter().map(|r| r.msg_id).collect()
    }

    #[test]
    fn reads_v2_frame_written_by_mavlink() {
        let recs = decode_datagram(&v2_bytes(&simstate()));
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].msg_id, 164);
        assert_eq!(recs[0].payload.get("lat"), Some(Field::Int(-353635360)));
        assert_eq!(recs[0].payload.get("lng"), Some(Field::Int(1491649330)));
    }

    #[test]
    fn reads_v1_frame_written_by_mavlink() {
        let msg = MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            relative_alt: 50_000,
            hdg: 9000,
            ..Default::default()
        });
        let mut out = Vec::new();
        mavlink::write_v1_msg(&mut out, header(), &msg).unwrap();

        let mut scanner = FrameScanner::new(&out);
        let Some(Scanned::Frame(frame)) = scanner.next() else { panic!("no frame") };
        assert_eq!(frame.version(), MavlinkVersion::V1);
        assert!(scanner.next().is_none());

        let rec = decode(&frame).unwrap();
        assert_eq!(rec.msg_id, 33);
        assert_eq!(rec.payload.get("relativeAlt"), Some(Field::Int(50_000)));
        assert_eq!(rec.payload.get("hdg"), Some(Field::Int(9000)));
    }

    #[test]
    fn skips_garbage_between_frames() {
        let frame = v2_bytes(&simstate());
        let datagram = [&[0x00, 0x42, 0x13][..], &frame, &[0x07], &frame, &frame[..5]].concat();
        assert_eq!(ids(&datagram), vec![164, 164]);
    }

    #[test]
    fn corrupted_frame_is_dropped() {
        let mut bytes = v2_bytes(&simstate());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut scanner = FrameScanner::new(&bytes);
        while let Some(scanned) = scanner.next() {
            if let Scanned::Frame(frame) = scanned {
                assert_ne!(frame.msg_id(), 164, "corrupted SIMSTATE accepted");
            }
        }
        assert!(scanner.crc_errors() >= 1);
    }

    #[test]
    fn unknown_id_header_does_not_hide_the_next_frame() {
        // v2 header claiming 5 payload bytes for an id no dialect defines,
        // directly followed by a real frame
        let stray = [MAV_STX_V2, 5, 0, 0, 0, 1, 1, 0x7F, 0x7F, 0x7F];
        let datagram = [&stray[..], &v2_bytes(&simstate())].concat();
        assert_eq!(ids(&datagram), vec![0x7F7F7F, 164]);
    }

    #[test]
    fn unknown_ids_reach_the_codec() {
        let frame = [MAV_STX_V2, 0, 0, 0, 1, 1, 1, 0x7F, 0x7F, 0x7F, 0x00, 0x00];
        let recs = decode_datagram(&frame);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].msg_id, 0x7F7F7F);
        assert!(recs[0].payload.is_empty());
    }
}
