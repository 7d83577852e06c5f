// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery node: socket binding, receive/classify thread, send queue.
//!
//! Send and receive are separated. The receive thread classifies inbound
//! datagrams by `wsa:Action` and either updates the known-remotes table,
//! answers Probe/Resolve (after the standard random reply delay), or routes
//! match responses to the pending collector. The send thread serializes all
//! outbound traffic and implements the SOAP-over-UDP repeat schedule; on
//! shutdown it drains the queue with one final send per message so a queued
//! `Bye` is actually transmitted before the socket closes.

use super::messages;
use super::{matcher, ServiceEntry};
use crate::config::{
    APP_MAX_DELAY, DISCOVERY_MULTICAST_IP, DISCOVERY_MULTICAST_PORT, DISCOVERY_MULTICAST_TTL,
    DISCOVERY_RECV_TIMEOUT, MATCH_TIMEOUT, MULTICAST_UDP_REPEAT, UDP_MAX_DELAY, UDP_MIN_DELAY,
    UDP_UPPER_DELAY, UNICAST_UDP_REPEAT,
};
use crate::error::Result;
use crate::names::{actions, QName, DISCOVERY_URN};
use crate::soap::envelope::{build_envelope, AppSequence, HeaderInfo, ReceivedEnvelope};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Remote lifecycle events delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// New or updated remote (Hello or match with newer metadata).
    Hello(ServiceEntry),
    /// Remote said goodbye; payload is its endpoint reference.
    Bye(String),
}

/// Transmission schedule of one outbound message.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Schedule {
    /// 4 transmissions, initial jitter up to `APP_MAX_DELAY`.
    Multicast,
    /// 2 transmissions, initial jitter up to `APP_MAX_DELAY`.
    Unicast,
    /// Single transmission after the given delay (Probe/Resolve answers).
    Reply { delay: Duration },
}

pub(crate) struct Outgoing {
    pub envelope: String,
    pub dest: SocketAddr,
    pub schedule: Schedule,
}

struct RemoteRecord {
    entry: ServiceEntry,
    last_seen: Instant,
}

type EventObserver = Box<dyn Fn(&DiscoveryEvent) + Send + Sync>;

/// Shared node state; everything the receive path needs without the socket.
pub(crate) struct NodeInner {
    local: RwLock<Vec<ServiceEntry>>,
    remotes: RwLock<HashMap<String, RemoteRecord>>,
    observers: RwLock<Vec<EventObserver>>,
    /// Pending Probe/Resolve collectors keyed by request MessageID.
    collectors: Mutex<HashMap<String, Sender<ServiceEntry>>>,
    send_tx: Sender<Outgoing>,
    instance_id: u64,
    message_number: AtomicU64,
}

impl NodeInner {
    pub(crate) fn new(send_tx: Sender<Outgoing>) -> Self {
        Self {
            local: RwLock::new(Vec::new()),
            remotes: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            collectors: Mutex::new(HashMap::new()),
            send_tx,
            instance_id: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            message_number: AtomicU64::new(1),
        }
    }

    fn next_app_sequence(&self) -> AppSequence {
        AppSequence {
            instance_id: self.instance_id,
            message_number: self.message_number.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        for observer in self.observers.read().iter() {
            observer(&event);
        }
    }

    /// Insert/update a remote. MetadataVersion is monotonic: stale
    /// announcements never downgrade the table.
    fn upsert_remote(&self, entry: ServiceEntry, announce: bool) {
        let mut remotes = self.remotes.write();
        let newer = match remotes.get(&entry.epr) {
            Some(existing) => entry.metadata_version >= existing.entry.metadata_version,
            None => true,
        };
        if newer {
            remotes.insert(
                entry.epr.clone(),
                RemoteRecord {
                    entry: entry.clone(),
                    last_seen: Instant::now(),
                },
            );
            drop(remotes);
            if announce {
                self.emit(DiscoveryEvent::Hello(entry));
            }
        } else {
            log::debug!(
                "[discovery] ignoring stale metadata version {} for {}",
                entry.metadata_version,
                entry.epr
            );
        }
    }

    /// Classify one inbound datagram and act on it.
    pub(crate) fn process_datagram(&self, raw: &str, src: SocketAddr) {
        let envelope = match ReceivedEnvelope::parse(raw, false) {
            Ok(e) => e,
            Err(err) => {
                log::debug!("[discovery] dropping malformed datagram from {}: {}", src, err);
                return;
            }
        };
        match envelope.action.as_str() {
            actions::HELLO => {
                if let Some(entry) =
                    envelope.with_body(|b, _| b.and_then(|n| messages::decode_hello(&n).ok()))
                {
                    log::debug!("[discovery] Hello from {} ({})", entry.epr, src);
                    self.upsert_remote(entry, true);
                }
            }
            actions::BYE => {
                if let Some(epr) =
                    envelope.with_body(|b, _| b.and_then(|n| messages::decode_bye(&n).ok()))
                {
                    log::debug!("[discovery] Bye from {}", epr);
                    self.remotes.write().remove(&epr);
                    self.emit(DiscoveryEvent::Bye(epr));
                }
            }
            actions::PROBE => {
                let Some((types, scopes, rule)) =
                    envelope.with_body(|b, _| b.and_then(|n| messages::decode_probe(&n).ok()))
                else {
                    return;
                };
                let matches: Vec<ServiceEntry> = self
                    .local
                    .read()
                    .iter()
                    .filter(|entry| {
                        matcher::matches_filter(entry, &types, &scopes, rule.as_deref())
                    })
                    .cloned()
                    .collect();
                if matches.is_empty() {
                    // Unmatched probes are answered with silence.
                    return;
                }
                log::debug!(
                    "[discovery] answering Probe from {} with {} match(es)",
                    src,
                    matches.len()
                );
                let header = HeaderInfo {
                    action: actions::PROBE_MATCHES.to_string(),
                    relates_to: envelope.message_id.clone(),
                    app_sequence: Some(self.next_app_sequence()),
                    ..HeaderInfo::default()
                };
                self.enqueue_reply(build_envelope(&header, &messages::encode_probe_matches(&matches)), src);
            }
            actions::RESOLVE => {
                let Some(epr) =
                    envelope.with_body(|b, _| b.and_then(|n| messages::decode_resolve(&n).ok()))
                else {
                    return;
                };
                let matched = self.local.read().iter().find(|e| e.epr == epr).cloned();
                if let Some(entry) = matched {
                    let header = HeaderInfo {
                        action: actions::RESOLVE_MATCHES.to_string(),
                        relates_to: envelope.message_id.clone(),
                        app_sequence: Some(self.next_app_sequence()),
                        ..HeaderInfo::default()
                    };
                    self.enqueue_reply(
                        build_envelope(&header, &messages::encode_resolve_matches(&entry)),
                        src,
                    );
                }
            }
            actions::PROBE_MATCHES => {
                let entries = envelope
                    .with_body(|b, _| b.and_then(|n| messages::decode_probe_matches(&n).ok()))
                    .unwrap_or_default();
                self.route_matches(&envelope, entries);
            }
            actions::RESOLVE_MATCHES => {
                let entries = envelope
                    .with_body(|b, _| {
                        b.and_then(|n| messages::decode_resolve_matches(&n).ok()).flatten()
                    })
                    .map(|e| vec![e])
                    .unwrap_or_default();
                self.route_matches(&envelope, entries);
            }
            other => {
                log::debug!("[discovery] ignoring datagram with action {}", other);
            }
        }
    }

    fn route_matches(&self, envelope: &ReceivedEnvelope, entries: Vec<ServiceEntry>) {
        let collector = envelope
            .relates_to
            .as_ref()
            .and_then(|r| self.collectors.lock().get(r).cloned());
        for entry in entries {
            self.upsert_remote(entry.clone(), false);
            if let Some(collector) = &collector {
                let _ = collector.send(entry);
            }
        }
    }

    fn enqueue_reply(&self, envelope: String, dest: SocketAddr) {
        let delay = Duration::from_millis(
            rand::thread_rng().gen_range(0..=APP_MAX_DELAY.as_millis() as u64),
        );
        let _ = self.send_tx.send(Outgoing {
            envelope,
            dest,
            schedule: Schedule::Reply { delay },
        });
    }
}

fn multicast_dest() -> SocketAddr {
    SocketAddr::from((DISCOVERY_MULTICAST_IP, DISCOVERY_MULTICAST_PORT))
}

/// UDP multicast discovery node bound to one adapter.
pub struct DiscoveryNode {
    inner: Arc<NodeInner>,
    stop: Arc<AtomicBool>,
    recv_handle: Option<JoinHandle<()>>,
    send_handle: Option<JoinHandle<()>>,
}

impl DiscoveryNode {
    /// Bind the multicast socket on `adapter` and start the worker threads.
    pub fn bind(adapter: Ipv4Addr) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        let bind_addr =
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_MULTICAST_PORT));
        socket2.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket2.into();
        let group = Ipv4Addr::from(DISCOVERY_MULTICAST_IP);
        socket.join_multicast_v4(&group, &adapter)?;
        socket.set_multicast_ttl_v4(DISCOVERY_MULTICAST_TTL)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_read_timeout(Some(DISCOVERY_RECV_TIMEOUT))?;
        log::info!(
            "[discovery] bound {}:{} on adapter {}",
            crate::config::DISCOVERY_MULTICAST_GROUP,
            DISCOVERY_MULTICAST_PORT,
            adapter
        );

        let (send_tx, send_rx) = unbounded::<Outgoing>();
        let inner = Arc::new(NodeInner::new(send_tx));
        let stop = Arc::new(AtomicBool::new(false));

        let recv_socket = socket.try_clone()?;
        let recv_inner = Arc::clone(&inner);
        let recv_stop = Arc::clone(&stop);
        let recv_handle = thread::Builder::new()
            .name("rsdc-disc-rx".to_string())
            .spawn(move || receive_loop(&recv_socket, &recv_inner, &recv_stop))?;

        let send_stop = Arc::clone(&stop);
        let send_handle = thread::Builder::new()
            .name("rsdc-disc-tx".to_string())
            .spawn(move || send_loop(&socket, &send_rx, &send_stop))?;

        Ok(Self {
            inner,
            stop,
            recv_handle: Some(recv_handle),
            send_handle: Some(send_handle),
        })
    }

    /// Advertise a local service: store it and multicast Hello.
    pub fn publish(&self, entry: ServiceEntry) {
        let header = HeaderInfo {
            action: actions::HELLO.to_string(),
            to: Some(DISCOVERY_URN.to_string()),
            app_sequence: Some(self.inner.next_app_sequence()),
            ..HeaderInfo::default()
        };
        let envelope = build_envelope(&header, &messages::encode_hello(&entry));
        self.inner.local.write().push(entry);
        let _ = self.inner.send_tx.send(Outgoing {
            envelope,
            dest: multicast_dest(),
            schedule: Schedule::Multicast,
        });
    }

    /// Multicast Bye for every published service and forget them.
    pub fn unpublish_all(&self) {
        let entries: Vec<ServiceEntry> = std::mem::take(&mut *self.inner.local.write());
        for entry in entries {
            log::debug!("[discovery] sending Bye for {}", entry.epr);
            let header = HeaderInfo {
                action: actions::BYE.to_string(),
                to: Some(DISCOVERY_URN.to_string()),
                app_sequence: Some(self.inner.next_app_sequence()),
                ..HeaderInfo::default()
            };
            let envelope = build_envelope(&header, &messages::encode_bye(&entry.epr));
            let _ = self.inner.send_tx.send(Outgoing {
                envelope,
                dest: multicast_dest(),
                schedule: Schedule::Multicast,
            });
        }
    }

    /// Active probe: multicast, then collect ProbeMatches for `timeout`
    /// (defaults to `MATCH_TIMEOUT`). Results are deduplicated by endpoint
    /// reference.
    pub fn probe(
        &self,
        types: &[QName],
        scopes: &[String],
        rule: Option<&str>,
        timeout: Option<Duration>,
    ) -> Vec<ServiceEntry> {
        self.probe_inner(multicast_dest(), Schedule::Multicast, types, scopes, rule, timeout)
    }

    /// Directed probe to one known address (discovery-proxy style), sent
    /// with the unicast repeat schedule.
    pub fn probe_directed(
        &self,
        dest: SocketAddr,
        types: &[QName],
        scopes: &[String],
        rule: Option<&str>,
        timeout: Option<Duration>,
    ) -> Vec<ServiceEntry> {
        self.probe_inner(dest, Schedule::Unicast, types, scopes, rule, timeout)
    }

    fn probe_inner(
        &self,
        dest: SocketAddr,
        schedule: Schedule,
        types: &[QName],
        scopes: &[String],
        rule: Option<&str>,
        timeout: Option<Duration>,
    ) -> Vec<ServiceEntry> {
        let message_id = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        let (tx, rx) = unbounded();
        self.inner.collectors.lock().insert(message_id.clone(), tx);
        let header = HeaderInfo {
            action: actions::PROBE.to_string(),
            to: Some(DISCOVERY_URN.to_string()),
            message_id: Some(message_id.clone()),
            ..HeaderInfo::default()
        };
        let envelope = build_envelope(&header, &messages::encode_probe(types, scopes, rule));
        let _ = self.inner.send_tx.send(Outgoing {
            envelope,
            dest,
            schedule,
        });
        let results = collect_window(&rx, timeout.unwrap_or(MATCH_TIMEOUT));
        self.inner.collectors.lock().remove(&message_id);
        results
    }

    /// Active resolve: multicast, first ResolveMatch within the window.
    pub fn resolve(&self, epr: &str, timeout: Option<Duration>) -> Option<ServiceEntry> {
        let message_id = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        let (tx, rx) = unbounded();
        self.inner.collectors.lock().insert(message_id.clone(), tx);
        let header = HeaderInfo {
            action: actions::RESOLVE.to_string(),
            to: Some(DISCOVERY_URN.to_string()),
            message_id: Some(message_id.clone()),
            ..HeaderInfo::default()
        };
        let envelope = build_envelope(&header, &messages::encode_resolve(epr));
        let _ = self.inner.send_tx.send(Outgoing {
            envelope,
            dest: multicast_dest(),
            schedule: Schedule::Multicast,
        });
        let result = rx.recv_timeout(timeout.unwrap_or(MATCH_TIMEOUT)).ok();
        self.inner.collectors.lock().remove(&message_id);
        result
    }

    /// Snapshot of the known remotes.
    pub fn remotes(&self) -> Vec<ServiceEntry> {
        self.inner
            .remotes
            .read()
            .values()
            .map(|r| r.entry.clone())
            .collect()
    }

    /// How long ago the given remote was last heard from.
    pub fn last_seen(&self, epr: &str) -> Option<Duration> {
        self.inner
            .remotes
            .read()
            .get(epr)
            .map(|r| r.last_seen.elapsed())
    }

    /// Register a Hello/Bye observer.
    pub fn on_event(&self, observer: impl Fn(&DiscoveryEvent) + Send + Sync + 'static) {
        self.inner.observers.write().push(Box::new(observer));
    }

    /// Stop both threads. The send queue drains (one final transmission per
    /// queued message) before the socket closes.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.send_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.recv_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.send_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.recv_handle.take() {
            let _ = handle.join();
        }
    }
}

fn collect_window(rx: &Receiver<ServiceEntry>, window: Duration) -> Vec<ServiceEntry> {
    let deadline = Instant::now() + window;
    let mut results: Vec<ServiceEntry> = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(entry) => {
                if !results.iter().any(|e| e.epr == entry.epr) {
                    results.push(entry);
                }
            }
            Err(_) => break,
        }
    }
    results
}

fn receive_loop(socket: &UdpSocket, inner: &Arc<NodeInner>, stop: &Arc<AtomicBool>) {
    let mut buf = vec![0u8; 0xffff];
    loop {
        if stop.load(Ordering::Relaxed) {
            log::debug!("[discovery] receive loop stopping");
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let raw = String::from_utf8_lossy(&buf[..len]).into_owned();
                inner.process_datagram(&raw, src);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Read timeout: loop to re-check the stop flag.
            }
            Err(e) => {
                log::warn!("[discovery] recv error (continuing): {}", e);
            }
        }
    }
}

struct Pending {
    envelope: String,
    dest: SocketAddr,
    next_at: Instant,
    remaining: u32,
    gap: Duration,
}

fn schedule_pending(out: Outgoing) -> Pending {
    let mut rng = rand::thread_rng();
    let (initial_delay, remaining) = match out.schedule {
        Schedule::Multicast => (
            Duration::from_millis(rng.gen_range(0..=APP_MAX_DELAY.as_millis() as u64)),
            MULTICAST_UDP_REPEAT,
        ),
        Schedule::Unicast => (
            Duration::from_millis(rng.gen_range(0..=APP_MAX_DELAY.as_millis() as u64)),
            UNICAST_UDP_REPEAT,
        ),
        Schedule::Reply { delay } => (delay, 1),
    };
    let gap = Duration::from_millis(
        rng.gen_range(UDP_MIN_DELAY.as_millis() as u64..=UDP_MAX_DELAY.as_millis() as u64),
    );
    Pending {
        envelope: out.envelope,
        dest: out.dest,
        next_at: Instant::now() + initial_delay,
        remaining,
        gap,
    }
}

fn send_loop(socket: &UdpSocket, rx: &Receiver<Outgoing>, stop: &Arc<AtomicBool>) {
    let mut pending: Vec<Pending> = Vec::new();
    loop {
        while let Ok(out) = rx.try_recv() {
            pending.push(schedule_pending(out));
        }

        if stop.load(Ordering::Relaxed) {
            // Drain: one final transmission for everything still queued so
            // Bye goes out before the socket closes.
            while let Ok(out) = rx.try_recv() {
                pending.push(schedule_pending(out));
            }
            for p in &pending {
                if let Err(e) = socket.send_to(p.envelope.as_bytes(), p.dest) {
                    log::debug!("[discovery] drain send to {} failed: {}", p.dest, e);
                }
            }
            log::debug!("[discovery] send loop drained {} message(s), stopping", pending.len());
            break;
        }

        let now = Instant::now();
        for p in pending.iter_mut() {
            if p.next_at <= now && p.remaining > 0 {
                if let Err(e) = socket.send_to(p.envelope.as_bytes(), p.dest) {
                    log::debug!("[discovery] send to {} failed: {}", p.dest, e);
                }
                p.remaining -= 1;
                p.next_at = now + p.gap;
                // Exponential growth of the inter-send gap, capped.
                p.gap = (p.gap * 2).min(UDP_UPPER_DELAY);
            }
        }
        pending.retain(|p| p.remaining > 0);

        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod send_loop_tests {
    use super::*;

    #[test]
    fn test_stop_drains_queue_before_exit() {
        // A Bye queued right before shutdown must still hit the wire.
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        let dest = receiver.local_addr().expect("addr");

        let (tx, rx) = unbounded::<Outgoing>();
        let stop = Arc::new(AtomicBool::new(false));
        tx.send(Outgoing {
            envelope: "<bye/>".to_string(),
            dest,
            schedule: Schedule::Multicast,
        })
        .expect("enqueue");
        // Stop is already set when the loop starts: drain-only path.
        stop.store(true, Ordering::Relaxed);
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || send_loop(&sender, &rx, &stop_clone));
        handle.join().expect("send loop exits");

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).expect("drained datagram arrives");
        assert_eq!(&buf[..len], b"<bye/>");
    }
}
