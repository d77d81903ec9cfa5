use serde::{Deserialize, Serialize};

/// Outcome of the most recent attempt to listen on the MAVLink port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PortStatus {
    /// No attempt finished yet, or one is in flight.
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

impl PortStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PortStatus::Unset => "",
            PortStatus::Ok => "ok",
            PortStatus::Error => "error",
        }
    }
}

/// Body of `GET /api/config` and of a successful `POST /api/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
    pub mavlink_port: u16,
    #[serde(default)]
    pub mavlink_status: PortStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mavlink_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let r = ConfigReport { mavlink_port: 14550, mavlink_status: PortStatus::Unset, mavlink_error: None };
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"mavlinkPort":14550,"mavlinkStatus":""}"#);

        let r: ConfigReport = serde_json::from_str(r#"{"mavlinkPort":14551,"mavlinkStatus":"error","mavlinkError":"x"}"#).unwrap();
        assert_eq!(r.mavlink_status, PortStatus::Error);
        assert_eq!(r.mavlink_error.as_deref(), Some("x"));
    }
}
