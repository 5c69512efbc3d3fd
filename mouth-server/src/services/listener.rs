use std::io;
use std::net::SocketAddr;

use mouth_common::UnixTimestamp;
use mouth_log::LogError;
use mouth_metrics::{Aggregator, InsertSamples, MetricSample};
use mouth_system::{Addr, Controller, Receiver, Service, ShutdownHandle};
use tokio::net::UdpSocket;

use crate::ServerError;
use crate::statsd::ServerCounters;

/// The largest payload of a UDP datagram.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Receives metric datagrams and forwards the parsed samples to the aggregator.
///
/// Every datagram is parsed as a batch of newline-separated samples, all stamped with the time
/// the datagram arrived. Lines that fail to parse are dropped.
pub struct UdpListener {
    socket: std::net::UdpSocket,
    aggregator: Addr<Aggregator>,
    shutdown: Option<ShutdownHandle>,
}

impl UdpListener {
    /// Binds the socket on `host` and `port`.
    ///
    /// Binding happens immediately so that errors surface before any service is started. Port `0`
    /// picks a free port, see [`local_addr`](Self::local_addr).
    pub fn bind(host: &str, port: u16, aggregator: Addr<Aggregator>) -> Result<Self, ServerError> {
        let socket = std::net::UdpSocket::bind((host, port)).map_err(ServerError::BindFailed)?;
        socket
            .set_nonblocking(true)
            .map_err(ServerError::BindFailed)?;

        Ok(Self {
            socket,
            aggregator,
            shutdown: None,
        })
    }

    /// Listens to the given handle for shutdown instead of the global [`Controller`].
    pub fn with_shutdown_handle(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn handle_datagram(aggregator: &Addr<Aggregator>, payload: &[u8]) {
    let received_at = UnixTimestamp::now();
    let mut rejected = 0usize;
    let samples: Vec<MetricSample> = MetricSample::parse_all(payload)
        .filter_map(|result| match result {
            Ok(sample) => Some(sample),
            Err(_) => {
                rejected += 1;
                None
            }
        })
        .collect();

    if rejected > 0 {
        mouth_log::trace!(rejected, "dropped invalid metric lines");
    }

    if !samples.is_empty() {
        mouth_statsd::metric!(counter(ServerCounters::DatagramsAccepted) += 1);
        aggregator.send(InsertSamples {
            samples,
            received_at,
        });
    }
}

impl Service for UdpListener {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let Self {
            socket,
            aggregator,
            shutdown,
        } = self;

        let socket = match UdpSocket::from_std(socket) {
            Ok(socket) => socket,
            Err(error) => {
                mouth_log::error!("failed to register udp socket: {}", LogError(&error));
                return;
            }
        };

        if let Ok(addr) = socket.local_addr() {
            mouth_log::info!("  listening on udp://{addr}/");
        }

        let mut shutdown = shutdown.unwrap_or_else(Controller::shutdown_handle);
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, _peer)) => handle_datagram(&aggregator, &buf[..len]),
                    Err(error) => mouth_log::warn!("failed to receive datagram: {}", LogError(&error)),
                },
            }
        }

        mouth_log::info!("udp listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mouth_system::{ServiceRunner, Shutdown};
    use tokio::sync::watch;

    use super::*;

    fn expect_samples(message: Option<Aggregator>) -> Vec<MetricSample> {
        match message {
            Some(Aggregator::InsertSamples(message)) => message.samples,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forward_samples() {
        mouth_log::init_test!();

        let (aggregator, mut rx) = mouth_system::channel("aggregator");
        let (tx, handle) = watch::channel(None);

        let listener = UdpListener::bind("127.0.0.1", 0, aggregator)
            .unwrap()
            .with_shutdown_handle(ShutdownHandle::from_receiver(handle));
        let addr = listener.local_addr().unwrap();

        let mut runner = ServiceRunner::new();
        runner.start(listener);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"app.signups:1|c\ngarbage\napp.render:320|ms\n", addr)
            .await
            .unwrap();

        let samples = expect_samples(rx.recv().await);
        let keys: Vec<_> = samples.iter().map(|s| s.key.to_string()).collect();
        assert_eq!(keys, vec!["app.signups", "app.render"]);

        // Datagrams without valid lines are not forwarded.
        client.send_to(b"garbage\n|c", addr).await.unwrap();
        client.send_to(b"gorets:7|g", addr).await.unwrap();

        let samples = expect_samples(rx.recv().await);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].key.to_string(), "default.gorets");

        tx.send_replace(Some(Shutdown {
            timeout: Some(Duration::from_secs(1)),
        }));
        runner.join().await;

        // The listener dropped its address on shutdown.
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_rejected_datagram_not_counted() {
        let (aggregator, mut rx) = mouth_system::channel("aggregator");

        let captures = mouth_statsd::with_capturing_test_client(|| {
            handle_datagram(&aggregator, b"garbage");
            handle_datagram(&aggregator, b"garbage\n|c");
        });
        assert!(captures.is_empty());
        assert!(rx.try_recv().is_none());

        let captures = mouth_statsd::with_capturing_test_client(|| {
            handle_datagram(&aggregator, b"app.signups:1|c\ngarbage");
        });
        assert_eq!(captures, ["server.datagrams.accepted:1|c"]);
        assert_eq!(expect_samples(rx.try_recv()).len(), 1);
    }

    #[test]
    fn test_bind_failed() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (aggregator, _rx) = mouth_system::channel("aggregator");
        let result = UdpListener::bind("127.0.0.1", port, aggregator);
        assert!(matches!(result, Err(ServerError::BindFailed(_))));
    }
}
