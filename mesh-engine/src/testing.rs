//! Hand-written fakes standing in for the engine's external collaborators,
//! shared between this crate's unit tests and its end-to-end scenario tests.
#![cfg(test)]

use std::net::IpAddr;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use mesh_proto::{DnsConfig, Message, Route, SyncResponse};
use tokio::sync::mpsc;
use tun_iface::{TunnelDriver, TunnelError, TunnelPeer};

use crate::collaborators::{CollaboratorError, CoordinatorStream, SignalingReceiver, SignalingSender};

/// A coordinator stream fed by the test, one [`SyncResponse`] at a time.
pub struct FakeCoordinatorStream {
    rx: mpsc::UnboundedReceiver<Result<SyncResponse, CollaboratorError>>,
}

impl FakeCoordinatorStream {
    pub fn new() -> (mpsc::UnboundedSender<Result<SyncResponse, CollaboratorError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl CoordinatorStream for FakeCoordinatorStream {
    async fn recv(&mut self) -> Option<Result<SyncResponse, CollaboratorError>> {
        self.rx.recv().await
    }
}

/// The read half of a fake signaling channel.
pub struct FakeSignalingReceiver {
    rx: mpsc::UnboundedReceiver<Result<Message, CollaboratorError>>,
}

impl FakeSignalingReceiver {
    pub fn new() -> (mpsc::UnboundedSender<Result<Message, CollaboratorError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalingReceiver for FakeSignalingReceiver {
    async fn recv(&mut self) -> Option<Result<Message, CollaboratorError>> {
        self.rx.recv().await
    }
}

/// The write half of a fake signaling channel. Records every message sent so
/// tests can assert on negotiation traffic.
#[derive(Default)]
pub struct FakeSignalingSender {
    sent: StdMutex<Vec<Message>>,
    ready: std::sync::atomic::AtomicBool,
}

impl FakeSignalingSender {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("fake sender mutex poisoned").clone()
    }
}

#[async_trait]
impl SignalingSender for FakeSignalingSender {
    async fn send(&self, msg: Message) -> Result<(), CollaboratorError> {
        self.sent.lock().expect("fake sender mutex poisoned").push(msg);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Records every call the engine makes against the kernel tunnel interface.
#[derive(Default)]
pub struct FakeTunnelDriver {
    pub peers: StdMutex<Vec<TunnelPeer>>,
    pub removed: StdMutex<Vec<String>>,
    pub addresses: StdMutex<Vec<IpAddr>>,
}

#[async_trait]
impl TunnelDriver for FakeTunnelDriver {
    async fn create(&self, _name: &str) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn configure(&self, _private_key: &str, _port: u16) -> Result<(), TunnelError> {
        Ok(())
    }

    async fn update_addr(&self, address: IpAddr) -> Result<(), TunnelError> {
        self.addresses.lock().expect("mutex poisoned").push(address);
        Ok(())
    }

    async fn update_peer(&self, peer: TunnelPeer) -> Result<(), TunnelError> {
        self.peers.lock().expect("mutex poisoned").push(peer);
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<(), TunnelError> {
        self.removed
            .lock()
            .expect("mutex poisoned")
            .push(public_key.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), TunnelError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeShellServer {
    pub started: std::sync::atomic::AtomicBool,
    pub authorized_keys: StdMutex<Vec<(String, String)>>,
}

#[async_trait]
impl crate::collaborators::ShellServer for FakeShellServer {
    async fn start(&self) -> Result<(), CollaboratorError> {
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        self.started.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn add_authorized_key(&self, peer_key: &str, pub_key: &str) -> Result<(), CollaboratorError> {
        self.authorized_keys
            .lock()
            .expect("mutex poisoned")
            .push((peer_key.to_string(), pub_key.to_string()));
        Ok(())
    }

    async fn remove_authorized_key(&self, peer_key: &str) -> Result<(), CollaboratorError> {
        self.authorized_keys
            .lock()
            .expect("mutex poisoned")
            .retain(|(k, _)| k != peer_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRouteSink {
    pub updates: StdMutex<Vec<(u64, Vec<Route>)>>,
}

#[async_trait]
impl crate::collaborators::RouteSink for FakeRouteSink {
    async fn update_routes(&self, serial: u64, routes: Vec<Route>) {
        self.updates.lock().expect("mutex poisoned").push((serial, routes));
    }
}

#[derive(Default)]
pub struct FakeDnsSink {
    pub updates: StdMutex<Vec<(u64, DnsConfig)>>,
}

#[async_trait]
impl crate::collaborators::DnsSink for FakeDnsSink {
    async fn update_dns(&self, serial: u64, dns: DnsConfig) {
        self.updates.lock().expect("mutex poisoned").push((serial, dns));
    }
}
