use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use mavrelay_proto::{MessageType, Payload};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::upstream::{RawRecord, RecordStream, Upstream};
use crate::IngestError;

// Start of the synthetic track, degE7 (ArduPilot SITL default home, Canberra).
const START_LAT: f64 = -353635360.0;
const START_LNG: f64 = 1491649330.0;
// degE7 per second; latitude drifts at half this rate
const VELOCITY: f64 = 1e3;
// mm
const ALTITUDE: i32 = 50_000;

/// Synthesizes alternating SIMSTATE / GLOBAL_POSITION_INT records instead of
/// listening on the network. Opening never fails, whatever the port.
#[derive(Debug, Clone)]
pub struct DemoUpstream {
    tick: Duration,
}

impl DemoUpstream {
    pub fn new(tick: Duration) -> Self {
        Self { tick: tick.max(Duration::from_millis(1)) }
    }
}

impl Default for DemoUpstream {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Upstream for DemoUpstream {
    fn open(&self, port: u16) -> BoxFuture<'static, Result<RecordStream, IngestError>> {
        let tick = self.tick;
        async move {
            info!("demo: synthesizing telemetry every {:?} (port {} not bound)", tick, port);
            Ok(synthetic(tick))
        }
        .boxed()
    }
}

fn synthetic(tick: Duration) -> RecordStream {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = Instant::now();

    stream::unfold((interval, 0u64), move |(mut interval, cycle)| async move {
        interval.tick().await;
        let cycle = cycle + 1;
        let rec = synth_record(cycle, start.elapsed().as_secs_f64());
        Some((rec, (interval, cycle)))
    })
    .boxed()
}

/// Record number `cycle` (1-based) at `elapsed_s` seconds into the run.
/// Odd cycles carry position, even cycles altitude/heading.
pub fn synth_record(cycle: u64, elapsed_s: f64) -> RawRecord {
    let lat = (START_LAT - elapsed_s * VELOCITY / 2.0).round() as i32;
    let lng = (START_LNG - elapsed_s * VELOCITY).round() as i32;

    if cycle % 2 == 1 {
        RawRecord {
            msg_id: MessageType::SimState.id(),
            payload: Payload::new().with("lat", lat).with("lng", lng),
        }
    } else {
        RawRecord {
            msg_id: MessageType::GlobalPositionInt.id(),
            payload: Payload::new()
                .with("alt", ALTITUDE)
                .with("hdg", 0u16)
                .with("lat", lat)
                .with("lon", lng)
                .with("relativeAlt", ALTITUDE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavrelay_proto::Field;

    #[test]
    fn cycles_alternate_position_and_attitude() {
        let first = synth_record(1, 0.0);
        assert_eq!(first.msg_id, 164);
        assert_eq!(first.payload.get("lat"), Some(Field::Int(-353635360)));
        assert_eq!(first.payload.get("lng"), Some(Field::Int(1491649330)));

        let second = synth_record(2, 0.0);
        assert_eq!(second.msg_id, 33);
        assert_eq!(second.payload.get("relativeAlt"), Some(Field::Int(50_000)));
        assert_eq!(second.payload.get("hdg"), Some(Field::Int(0)));
    }

    #[test]
    fn track_drifts_with_time() {
        let rec = synth_record(1, 2.0);
        assert_eq!(rec.payload.get("lat"), Some(Field::Int(-353636360)));
        assert_eq!(rec.payload.get("lng"), Some(Field::Int(1491647330)));
    }

    #[tokio::test]
    async fn stream_ticks() {
        let up = DemoUpstream::new(Duration::from_millis(1));
        let recs: Vec<_> = up.open(14550).await.unwrap().take(4).collect().await;
        let ids: Vec<u32> = recs.iter().map(|r| r.msg_id).collect();
        assert_eq!(ids, vec![164, 33, 164, 33]);
    }
}
