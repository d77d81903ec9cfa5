use std::collections::VecDeque;
use std::net::IpAddr;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::mav::decode_datagram;
use crate::upstream::{RawRecord, RecordStream, Upstream};
use crate::IngestError;

// Largest MAVLink v2 frame is 280 bytes; datagrams may pack several.
const RECV_BUF: usize = 2048;

/// Listens for MAVLink datagrams (MAVProxy `--out udp:host:port`, SITL).
#[derive(Debug, Clone)]
pub struct UdpUpstream {
    bind: IpAddr,
}

impl UdpUpstream {
    pub fn new(bind: IpAddr) -> Self {
        Self { bind }
    }
}

impl Upstream for UdpUpstream {
    fn open(&self, port: u16) -> BoxFuture<'static, Result<RecordStream, IngestError>> {
        let bind = self.bind;
        async move {
            let sock = UdpSocket::bind((bind, port))
                .await
                .map_err(|source| IngestError::Bind { port, source })?;
            info!("mavlink: listening on udp {}:{}", bind, port);
            Ok(records(sock))
        }
        .boxed()
    }
}

struct ReadState {
    sock: UdpSocket,
    pending: VecDeque<RawRecord>,
    buf: Vec<u8>,
}

fn records(sock: UdpSocket) -> RecordStream {
    let st = ReadState {
        sock,
        pending: VecDeque::new(),
        buf: vec![0u8; RECV_BUF],
    };
    stream::unfold(st, |mut st| async move {
        loop {
            if let Some(rec) = st.pending.pop_front() {
                return Some((rec, st));
            }
            match st.sock.recv_from(&mut st.buf).await {
                Ok((n, from)) => {
                    st.pending.extend(decode_datagram(&st.buf[..n]));
                    if st.pending.is_empty() {
                        debug!("mavlink: {} bytes from {} held no complete frame", n, from);
                    }
                }
                // ICMP port-unreachable and friends surface here; the socket stays usable
                Err(e) => warn!("mavlink: udp recv failed: {}", e),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::ardupilotmega::{MavMessage, SIMSTATE_DATA};
    use mavlink::MavHeader;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let up = UdpUpstream::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        match up.open(port).await {
            Err(IngestError::Bind { port: p, .. }) => assert_eq!(p, port),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("bound a port already in use"),
        }
    }

    #[tokio::test]
    async fn datagrams_become_records() {
        let spare = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        let up = UdpUpstream::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut recs = up.open(port).await.unwrap();

        let msg = MavMessage::SIMSTATE(SIMSTATE_DATA { lat: 1, lng: 2, ..Default::default() });
        let mut frame = Vec::new();
        mavlink::write_v2_msg(&mut frame, MavHeader { system_id: 1, component_id: 1, sequence: 0 }, &msg)
            .unwrap();
        // two frames in one datagram
        let datagram = [frame.clone(), frame].concat();

        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        tx.send_to(&datagram, (Ipv4Addr::LOCALHOST, port)).await.unwrap();

        for _ in 0..2 {
            let rec = tokio::time::timeout(Duration::from_secs(2), recs.next())
                .await
                .expect("record in time")
                .expect("stream open");
            assert_eq!(rec.msg_id, 164);
            assert_eq!(rec.payload.number("lng"), Some(2.0));
        }
    }
}
