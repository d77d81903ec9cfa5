use futures::future::BoxFuture;
use futures::stream::BoxStream;
use mavrelay_proto::Payload;

use crate::IngestError;

/// A decoded MAVLink record before it passes the codec.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub msg_id: u32,
    pub payload: Payload,
}

pub type RecordStream = BoxStream<'static, RawRecord>;

/// Source of telemetry records for one port. Dropping the returned stream
/// releases whatever it holds (socket, timer).
pub trait Upstream: Send + Sync + 'static {
    fn open(&self, port: u16) -> BoxFuture<'static, Result<RecordStream, IngestError>>;
}
