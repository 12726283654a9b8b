//! High-throughput UDP server
//!
//! Every simulated port is bound `socket_count` times with SO_REUSEPORT so
//! the kernel spreads ingress across receive tasks. Packets flow through a
//! bounded drop-oldest queue into a worker pool; each worker decodes,
//! routes to the device actor, encodes and replies on the socket the packet
//! arrived on.
//!
//! Malformed packets, unknown communities and SNMPv3 messages are dropped
//! without a response so the simulator cannot be used for probing or
//! amplification.

use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SimulatorConfig;
use crate::devices::DevicePool;
use crate::protocol::{ErrorStatus, Pdu, SnmpMessage, SnmpVersion};
use crate::services::telemetry::{TelemetryEvent, TelemetryHandle};
use crate::{Error, Result};

const MAX_DATAGRAM: usize = 65_535;

struct Packet {
    data: Bytes,
    peer: SocketAddr,
    local_port: u16,
    socket: Arc<UdpSocket>,
    received_at: Instant,
}

/// Bounded queue decoupling socket reads from the worker pool.
///
/// Overflow drops the oldest packet: under burst the freshest requests are
/// the ones the client has not yet retransmitted.
struct PacketQueue {
    inner: Mutex<VecDeque<Packet>>,
    notify: Notify,
    capacity: usize,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Pushes a packet, returning how many old packets were dropped.
    fn push(&self, packet: Packet) -> usize {
        let dropped = {
            let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut dropped = 0;
            while queue.len() >= self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(packet);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    async fn pop(&self) -> Packet {
        loop {
            {
                let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(packet) = queue.pop_front() {
                    return packet;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Multi-socket SNMP UDP server
pub struct UdpServer {
    config: Arc<SimulatorConfig>,
    pool: Arc<DevicePool>,
    telemetry: TelemetryHandle,
    queue: Arc<PacketQueue>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    is_running: bool,
}

impl UdpServer {
    pub fn new(
        config: Arc<SimulatorConfig>,
        pool: Arc<DevicePool>,
        telemetry: TelemetryHandle,
    ) -> Self {
        let queue = Arc::new(PacketQueue::new(config.server.queue_depth));
        Self {
            config,
            pool,
            telemetry,
            queue,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            is_running: false,
        }
    }

    /// Binds every simulated port and starts the worker pool.
    ///
    /// Bind failures are fatal: a simulator that silently misses ports
    /// would corrupt test runs.
    pub async fn start(&mut self) -> Result<()> {
        let bind_ip: IpAddr = self
            .config
            .server
            .bind_address
            .parse()
            .map_err(|e| Error::network(format!("bad bind address: {}", e)))?;

        let mut ports: BTreeSet<u16> =
            (self.config.devices.port_start..=self.config.devices.port_end).collect();
        ports.extend(self.config.devices.port_map.iter().map(|entry| entry.port));

        let sockets_per_port = if cfg!(unix) {
            self.config.server.socket_count.max(1)
        } else {
            // No SO_REUSEPORT: one socket per port
            if self.config.server.socket_count > 1 {
                warn!("SO_REUSEPORT unavailable on this platform, using one socket per port");
            }
            1
        };

        info!(
            ports = ports.len(),
            sockets_per_port,
            workers = self.config.server.worker_pool_size,
            "Starting UDP server"
        );

        for port in ports {
            for _ in 0..sockets_per_port {
                let addr = SocketAddr::new(bind_ip, port);
                let socket = Arc::new(bind_udp_socket(
                    addr,
                    self.config.server.buffer_bytes,
                    sockets_per_port > 1,
                )?);

                let queue = Arc::clone(&self.queue);
                let telemetry = self.telemetry.clone();
                let shutdown = self.shutdown.clone();
                self.tasks.push(tokio::spawn(async move {
                    tokio::select! {
                        _ = receive_loop(socket, port, queue, telemetry) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }));
            }
        }

        for worker_id in 0..self.config.server.worker_pool_size {
            let queue = Arc::clone(&self.queue);
            let pool = Arc::clone(&self.pool);
            let config = Arc::clone(&self.config);
            let shutdown = self.shutdown.clone();
            self.tasks.push(tokio::spawn(async move {
                tokio::select! {
                    _ = worker_loop(worker_id, queue, pool, config) => {}
                    _ = shutdown.cancelled() => {}
                }
            }));
        }

        self.is_running = true;
        info!("UDP server started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping UDP server");
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.is_running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn bind_udp_socket(addr: SocketAddr, buffer_bytes: usize, reuse_port: bool) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::network(format!("socket creation failed: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::network(format!("SO_REUSEADDR failed: {}", e)))?;
    #[cfg(unix)]
    if reuse_port {
        socket
            .set_reuse_port(true)
            .map_err(|e| Error::network(format!("SO_REUSEPORT failed: {}", e)))?;
    }
    #[cfg(not(unix))]
    let _ = reuse_port;

    if let Err(e) = socket.set_recv_buffer_size(buffer_bytes) {
        debug!(error = %e, "could not grow receive buffer");
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_bytes) {
        debug!(error = %e, "could not grow send buffer");
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| Error::network(format!("set_nonblocking failed: {}", e)))?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::network(format!("failed to bind {}: {}", addr, e)))?;

    UdpSocket::from_std(socket.into())
        .map_err(|e| Error::network(format!("tokio socket wrap failed: {}", e)))
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    local_port: u16,
    queue: Arc<PacketQueue>,
    telemetry: TelemetryHandle,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, peer)) => {
                let dropped = queue.push(Packet {
                    data: Bytes::copy_from_slice(&buffer[..len]),
                    peer,
                    local_port,
                    socket: Arc::clone(&socket),
                    received_at: Instant::now(),
                });
                if dropped > 0 {
                    warn!(dropped, local_port, "rx queue overflow, dropped oldest packets");
                    telemetry.emit(TelemetryEvent::PacketsDropped {
                        count: dropped as u64,
                    });
                }
            }
            Err(e) => {
                error!(local_port, error = %e, "UDP receive error");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<PacketQueue>,
    pool: Arc<DevicePool>,
    config: Arc<SimulatorConfig>,
) {
    trace!(worker_id, "worker started");
    loop {
        let packet = queue.pop().await;
        handle_packet(packet, &pool, &config).await;
    }
}

async fn handle_packet(packet: Packet, pool: &DevicePool, config: &SimulatorConfig) {
    // Malformed or unsupported-version packets get no response
    let request = match SnmpMessage::decode(&packet.data) {
        Ok(request) => request,
        Err(e) => {
            trace!(peer = %packet.peer, error = %e, "dropping undecodable packet");
            return;
        }
    };

    // Authenticate before any device is created: a wrong community must not
    // consume an admission slot. Existing devices carry their own community;
    // for uncreated ports the resolver knows the expected one.
    let expected_community = match pool.get(packet.local_port) {
        Some(handle) => handle.community().as_bytes().to_vec(),
        None => match config.resolve_port(packet.local_port) {
            Some((_, community)) => community.into_bytes(),
            None => {
                trace!(port = packet.local_port, "no device for port, dropping");
                return;
            }
        },
    };
    if request.community != expected_community {
        trace!(peer = %packet.peer, "community mismatch, dropping");
        return;
    }

    let handle = match pool.get_or_create(packet.local_port) {
        Ok(Some(handle)) => handle,
        Ok(None) => {
            trace!(port = packet.local_port, "no device for port, dropping");
            return;
        }
        Err(Error::ResourceLimit(reason)) => {
            debug!(port = packet.local_port, %reason, "admission refused");
            // Always a v2c envelope: resourceUnavailable(13) does not exist
            // in the v1 error-status range
            let response = SnmpMessage::new(
                SnmpVersion::V2c,
                request.community.clone(),
                Pdu::error_response(
                    request.pdu.request_id,
                    ErrorStatus::ResourceUnavailable,
                    0,
                    request.pdu.varbinds.clone(),
                ),
            );
            send_response(&packet, &response, config).await;
            return;
        }
        Err(e) => {
            warn!(port = packet.local_port, error = %e, "device lookup failed");
            return;
        }
    };

    // Whatever queueing delay the packet saw counts against its deadline
    let deadline = config
        .server
        .request_timeout()
        .saturating_sub(packet.received_at.elapsed());
    if deadline.is_zero() {
        trace!(peer = %packet.peer, "deadline expired in queue, dropping");
        return;
    }

    match handle.handle_pdu(request, deadline).await {
        Ok(response) => send_response(&packet, &response, config).await,
        Err(Error::Timeout(_)) => {
            trace!(peer = %packet.peer, "device reply missed deadline, dropping");
        }
        Err(e) => {
            debug!(peer = %packet.peer, error = %e, "device call failed");
        }
    }
}

async fn send_response(packet: &Packet, response: &SnmpMessage, config: &SimulatorConfig) {
    let encoded = match response.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(error = %e, "response encode failed");
            return;
        }
    };

    // Responses that cannot fit the configured buffer degrade to tooBig
    let encoded = if encoded.len() > config.server.buffer_bytes {
        let too_big = response.response_with(Pdu::error_response(
            response.pdu.request_id,
            ErrorStatus::TooBig,
            0,
            Vec::new(),
        ));
        match too_big.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "tooBig encode failed");
                return;
            }
        }
    } else {
        encoded
    };

    if let Err(e) = packet.socket.send_to(&encoded, packet.peer).await {
        debug!(peer = %packet.peer, error = %e, "response send failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::engine::PduProcessor;
    use crate::mib::{DeviceType, ManualValue, Oid, ProfileRegistry, SnmpValue, VarBind};
    use crate::protocol::{PduType, SnmpVersion};
    use crate::services::resources::ResourceManager;
    use crate::services::telemetry::TelemetryService;
    use std::collections::HashMap;
    use std::time::Duration;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    async fn started_server(port_start: u16, port_end: u16) -> (UdpServer, Arc<DevicePool>) {
        let registry = ProfileRegistry::new();
        let mut spec = HashMap::new();
        spec.insert(
            "1.3.6.1.2.1.1.1.0".to_string(),
            ManualValue::Text("Motorola SB6141".to_string()),
        );
        registry
            .load_manual(DeviceType::CableModem, &spec)
            .unwrap();

        let mut config = SimulatorConfig::default_config();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.socket_count = 2;
        config.server.worker_pool_size = 4;
        config.devices.port_start = port_start;
        config.devices.port_end = port_end;
        let config = Arc::new(config);

        let telemetry = TelemetryService::new(TelemetryConfig::default())
            .unwrap()
            .handle();
        let resources = Arc::new(ResourceManager::new(
            config.resources.clone(),
            telemetry.clone(),
        ));
        let processor = Arc::new(PduProcessor::new(Arc::new(registry), 50));
        let pool = Arc::new(DevicePool::new(
            Arc::clone(&config),
            processor,
            resources,
            telemetry.clone(),
        ));

        let mut server = UdpServer::new(config, Arc::clone(&pool), telemetry);
        server.start().await.unwrap();
        (server, pool)
    }

    fn get_request_bytes(request_id: i32) -> Vec<u8> {
        SnmpMessage::new(
            SnmpVersion::V2c,
            b"public".to_vec(),
            Pdu::request(
                PduType::GetRequest,
                request_id,
                vec![VarBind::null(oid("1.3.6.1.2.1.1.1.0"))],
            ),
        )
        .encode()
        .unwrap()
        .to_vec()
    }

    #[tokio::test]
    async fn test_get_over_real_udp() {
        let (mut server, _pool) = started_server(34100, 34101).await;

        let response = tokio::task::spawn_blocking(|| {
            let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            client
                .send_to(&get_request_bytes(77), "127.0.0.1:34100")
                .unwrap();

            let mut buf = [0u8; 1500];
            let (len, _) = client.recv_from(&mut buf).unwrap();
            SnmpMessage::decode(&buf[..len]).unwrap()
        })
        .await
        .unwrap();

        assert_eq!(response.pdu.request_id, 77);
        assert_eq!(response.pdu.error_status, ErrorStatus::NoError);
        assert_eq!(
            response.pdu.varbinds[0].value,
            SnmpValue::OctetString(b"Motorola SB6141".to_vec())
        );

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_community_and_garbage_are_silently_dropped() {
        let (mut server, pool) = started_server(34110, 34110).await;

        let got_any = tokio::task::spawn_blocking(|| {
            let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            client
                .set_read_timeout(Some(Duration::from_millis(300)))
                .unwrap();

            let wrong_community = SnmpMessage::new(
                SnmpVersion::V2c,
                b"letmein".to_vec(),
                Pdu::request(
                    PduType::GetRequest,
                    5,
                    vec![VarBind::null(oid("1.3.6.1.2.1.1.1.0"))],
                ),
            )
            .encode()
            .unwrap();
            client.send_to(&wrong_community, "127.0.0.1:34110").unwrap();
            client.send_to(&[0xDE, 0xAD, 0xBE, 0xEF], "127.0.0.1:34110").unwrap();

            let mut buf = [0u8; 1500];
            client.recv_from(&mut buf).is_ok()
        })
        .await
        .unwrap();

        assert!(!got_any, "agent must not answer bad community or garbage");
        // Unauthenticated traffic must not consume admission slots either
        assert!(pool.is_empty(), "bad community must not create a device");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_drop_oldest() {
        let queue = PacketQueue::new(2);
        let socket = Arc::new(
            bind_udp_socket("127.0.0.1:0".parse().unwrap(), 65536, false).unwrap(),
        );

        let packet = |id: u8| Packet {
            data: Bytes::from(vec![id]),
            peer: "127.0.0.1:9".parse().unwrap(),
            local_port: 0,
            socket: Arc::clone(&socket),
            received_at: Instant::now(),
        };

        assert_eq!(queue.push(packet(1)), 0);
        assert_eq!(queue.push(packet(2)), 0);
        assert_eq!(queue.push(packet(3)), 1);

        // Oldest (1) was dropped
        assert_eq!(queue.pop().await.data[0], 2);
        assert_eq!(queue.pop().await.data[0], 3);
    }
}
