use serde::{Serialize, Serializer};

/// MAVLink messages the relay knows by id. Anything else is `Lookup::Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat,
    SysStatus,
    SystemTime,
    GpsRawInt,
    Attitude,
    GlobalPositionInt,
    VfrHud,
    SimState,
    Ahrs2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Known(MessageType),
    Unknown(u32),
}

const ALL: [MessageType; 9] = [
    MessageType::Heartbeat,
    MessageType::SysStatus,
    MessageType::SystemTime,
    MessageType::GpsRawInt,
    MessageType::Attitude,
    MessageType::GlobalPositionInt,
    MessageType::VfrHud,
    MessageType::SimState,
    MessageType::Ahrs2,
];

/// Types relayed to viewers; everything else is dropped at the codec.
pub const FORWARDED: [MessageType; 2] = [MessageType::GlobalPositionInt, MessageType::SimState];

pub fn lookup(id: u32) -> Lookup {
    ALL.iter()
        .copied()
        .find(|t| t.id() == id)
        .map(Lookup::Known)
        .unwrap_or(Lookup::Unknown(id))
}

impl MessageType {
    pub fn id(self) -> u32 {
        match self {
            MessageType::Heartbeat => 0,
            MessageType::SysStatus => 1,
            MessageType::SystemTime => 2,
            MessageType::GpsRawInt => 24,
            MessageType::Attitude => 30,
            MessageType::GlobalPositionInt => 33,
            MessageType::VfrHud => 74,
            MessageType::SimState => 164,
            MessageType::Ahrs2 => 178,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::SysStatus => "SYS_STATUS",
            MessageType::SystemTime => "SYSTEM_TIME",
            MessageType::GpsRawInt => "GPS_RAW_INT",
            MessageType::Attitude => "ATTITUDE",
            MessageType::GlobalPositionInt => "GLOBAL_POSITION_INT",
            MessageType::VfrHud => "VFR_HUD",
            MessageType::SimState => "SIMSTATE",
            MessageType::Ahrs2 => "AHRS2",
        }
    }

    /// Wire field names, camelCase as the viewers expect them.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            MessageType::Heartbeat => &["type", "autopilot", "baseMode", "customMode", "systemStatus", "mavlinkVersion"],
            MessageType::SysStatus => &["voltageBattery", "currentBattery", "batteryRemaining", "load", "dropRateComm", "errorsComm"],
            MessageType::SystemTime => &["timeUnixUsec", "timeBootMs"],
            MessageType::GpsRawInt => &["timeUsec", "fixType", "lat", "lon", "alt", "eph", "epv", "vel", "cog", "satellitesVisible"],
            MessageType::Attitude => &["timeBootMs", "roll", "pitch", "yaw", "rollspeed", "pitchspeed", "yawspeed"],
            MessageType::GlobalPositionInt => &["timeBootMs", "lat", "lon", "alt", "relativeAlt", "vx", "vy", "vz", "hdg"],
            MessageType::VfrHud => &["airspeed", "groundspeed", "heading", "throttle", "alt", "climb"],
            MessageType::SimState => &["roll", "pitch", "yaw", "xacc", "yacc", "zacc", "xgyro", "ygyro", "zgyro", "lat", "lng"],
            MessageType::Ahrs2 => &["roll", "pitch", "yaw", "altitude", "lat", "lng"],
        }
    }

    pub fn is_forwarded(self) -> bool {
        FORWARDED.contains(&self)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter().copied().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}
