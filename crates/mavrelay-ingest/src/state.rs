use mavrelay_proto::ConfigReport;
pub use mavrelay_proto::PortStatus;

/// Port the listener was last asked to use, and how that went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub port: u16,
    pub status: PortStatus,
    pub error: Option<String>,
}

impl PortConfig {
    pub fn new(port: u16) -> Self {
        Self { port, status: PortStatus::Unset, error: None }
    }

    pub fn report(&self) -> ConfigReport {
        ConfigReport {
            mavlink_port: self.port,
            mavlink_status: self.status,
            mavlink_error: self.error.clone(),
        }
    }
}
