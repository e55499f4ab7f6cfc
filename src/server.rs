use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

use crate::resolver::Resolver;
use crate::validation::is_valid_packet_length;

const MAX_PACKET_LEN: usize = 512;
/// Upper bound on datagrams being resolved concurrently; protects against a
/// burst of slow upstream calls exhausting memory/file descriptors.
const MAX_IN_FLIGHT: usize = 4096;

/// UDP front end: binds one socket, spawns one task per datagram bounded by
/// a semaphore, and resolves each independently of the others.
pub struct Server {
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    admission: Arc<Semaphore>,
}

impl Server {
    pub async fn bind(port: u16, resolver: Arc<Resolver>) -> std::io::Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, "dns front end listening");
        Ok(Self {
            socket: Arc::new(socket),
            resolver,
            admission: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the receive loop until `shutdown` fires. Each accepted datagram
    /// is handled on its own task so one slow upstream call never blocks
    /// the next client's reply.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_PACKET_LEN];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown signal received, draining in-flight queries");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => self.dispatch(&buf[..len], peer),
                        Err(err) => {
                            error!(error = %err, "udp recv failed");
                        }
                    }
                }
            }
        }

        // Wait for all in-flight tasks to release their permit before returning.
        let _ = self
            .admission
            .acquire_many(MAX_IN_FLIGHT as u32)
            .await;
    }

    fn dispatch(&self, packet: &[u8], peer: SocketAddr) {
        if !is_valid_packet_length(packet.len()) {
            warn!(%peer, len = packet.len(), "dropping out-of-bounds packet");
            return;
        }

        let permit = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%peer, "dropping query, too many in-flight queries");
                return;
            }
        };

        let socket = Arc::clone(&self.socket);
        let resolver = Arc::clone(&self.resolver);
        let packet = packet.to_vec();

        tokio::spawn(async move {
            let _permit = permit;
            match resolver.resolve(&packet, peer.ip()).await {
                Ok(resolution) => {
                    if let Err(err) = socket.send_to(&resolution.reply, peer).await {
                        error!(%peer, error = %err, "failed to send reply");
                    }
                }
                Err(err) => {
                    // Too malformed to address a reply to; drop silently per policy.
                    warn!(%peer, error = %err, "dropped unanswerable query");
                }
            }
        });
    }
}
