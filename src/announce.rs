//! mDNS service announcer: advertises the bridge as `_matter._tcp` and
//! answers incoming queries with PTR/SRV/TXT/A/AAAA records.
//!
//! Sends on ipv4 and per-interface ipv6 multicast sockets. Unregistering a
//! service multicasts a goodbye (TTL 0) for its records.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use anyhow::Result;
use byteorder::{BigEndian, WriteBytesExt};
use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::mdns;

const MDNS_ADDR_V4: &str = "224.0.0.251:5353";
const MDNS_ADDR_V6: &str = "[ff02::fb]:5353";
const DEFAULT_TTL: u32 = 4500;

/// Description of a local service to advertise.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub service_type: String,
    pub instance_name: String,
    pub port: u16,
    pub hostname: String,
    pub txt_records: Vec<(String, String)>,
    pub ttl: u32,
}

/// The `_matter._tcp` registration with commissioning TXT records.
pub fn matter_service_registration(
    device_id: &str,
    device_name: &str,
    port: u16,
    vendor_id: u16,
    product_id: u16,
    discriminator: u16,
    commissioned: bool,
) -> ServiceRegistration {
    ServiceRegistration {
        service_type: "_matter._tcp.local".to_owned(),
        instance_name: device_name.to_owned(),
        port,
        hostname: format!("{}.local", device_id),
        txt_records: vec![
            ("D".to_owned(), discriminator.to_string()),
            ("VP".to_owned(), format!("{}+{}", vendor_id, product_id)),
            (
                "CM".to_owned(),
                if commissioned { "0" } else { "1" }.to_owned(),
            ),
            ("DT".to_owned(), "65535".to_owned()), // bridge device type
            ("DN".to_owned(), device_name.to_owned()),
            ("SII".to_owned(), "5000".to_owned()),
            ("SAI".to_owned(), "300".to_owned()),
        ],
        ttl: DEFAULT_TTL,
    }
}

/// Build the record set for one registration.
fn build_service_records(
    reg: &ServiceRegistration,
    ips_v4: &[Ipv4Addr],
    ips_v6: &[Ipv6Addr],
) -> Vec<mdns::RR> {
    let mut records = Vec::new();
    let svc_type = reg.service_type.trim_end_matches('.');
    let hostname = reg.hostname.trim_end_matches('.');
    let instance_full = format!("{}.{}", reg.instance_name, svc_type);

    // PTR
    records.push(mdns::RR {
        name: format!("{}.", svc_type),
        typ: mdns::TYPE_PTR,
        class: 1,
        ttl: reg.ttl,
        rdata: {
            let mut buf = Vec::new();
            let _ = mdns::encode_label(&instance_full, &mut buf);
            buf
        },
    });

    // SRV
    let mut srv_rdata = Vec::new();
    let _ = srv_rdata.write_u16::<BigEndian>(0); // priority
    let _ = srv_rdata.write_u16::<BigEndian>(0); // weight
    let _ = srv_rdata.write_u16::<BigEndian>(reg.port);
    let _ = mdns::encode_label(hostname, &mut srv_rdata);
    records.push(mdns::RR {
        name: format!("{}.", instance_full),
        typ: mdns::TYPE_SRV,
        class: 1,
        ttl: reg.ttl,
        rdata: srv_rdata,
    });

    // TXT
    let mut txt_rdata = Vec::new();
    for (k, v) in &reg.txt_records {
        let entry = format!("{}={}", k, v);
        let _ = txt_rdata.write_u8(entry.len() as u8);
        txt_rdata.extend_from_slice(entry.as_bytes());
    }
    if txt_rdata.is_empty() {
        txt_rdata.push(0); // RFC 6763: empty TXT record has single zero-length byte
    }
    records.push(mdns::RR {
        name: format!("{}.", instance_full),
        typ: mdns::TYPE_TXT,
        class: 1,
        ttl: reg.ttl,
        rdata: txt_rdata,
    });

    for ip in ips_v4 {
        records.push(mdns::RR {
            name: format!("{}.", hostname),
            typ: mdns::TYPE_A,
            class: 1,
            ttl: reg.ttl,
            rdata: ip.octets().to_vec(),
        });
    }
    for ip in ips_v6 {
        records.push(mdns::RR {
            name: format!("{}.", hostname),
            typ: mdns::TYPE_AAAA,
            class: 1,
            ttl: reg.ttl,
            rdata: ip.octets().to_vec(),
        });
    }

    records
}

/// Record set for a service leaving the network: same records, TTL 0.
fn goodbye_records(
    reg: &ServiceRegistration,
    ips_v4: &[Ipv4Addr],
    ips_v6: &[Ipv6Addr],
) -> Vec<mdns::RR> {
    let mut records = build_service_records(reg, ips_v4, ips_v6);
    for rr in &mut records {
        rr.ttl = 0;
    }
    records
}

/// Match an incoming query against registered services and split the
/// resulting records into answer and additional sections.
fn find_matching_services(
    query_name: &str,
    query_type: u16,
    services: &[ServiceRegistration],
    ips_v4: &[Ipv4Addr],
    ips_v6: &[Ipv6Addr],
) -> (Vec<mdns::RR>, Vec<mdns::RR>) {
    let mut answers = Vec::new();
    let mut additional = Vec::new();

    let qname = query_name.to_lowercase();
    let qname = qname.trim_end_matches('.');

    for reg in services {
        let svc_type = reg.service_type.trim_end_matches('.').to_lowercase();
        let instance_full = format!("{}.{}", reg.instance_name.to_lowercase(), svc_type);
        let hostname = reg.hostname.trim_end_matches('.').to_lowercase();

        let all_records = build_service_records(reg, ips_v4, ips_v6);
        let is_any = query_type == mdns::QTYPE_ANY;

        // Query for service type - PTR as answer, rest as additional
        if qname == svc_type {
            for r in all_records {
                let rname = r.name.trim_end_matches('.').to_lowercase();
                if rname == svc_type && (is_any || r.typ == mdns::TYPE_PTR || r.typ == query_type) {
                    answers.push(r);
                } else {
                    additional.push(r);
                }
            }
        }
        // Query for specific instance - SRV/TXT as answer, A/AAAA as additional
        else if qname == instance_full {
            for r in all_records {
                let rname = r.name.trim_end_matches('.').to_lowercase();
                if rname == instance_full && (is_any || r.typ == query_type) {
                    answers.push(r);
                } else if r.typ == mdns::TYPE_A || r.typ == mdns::TYPE_AAAA {
                    additional.push(r);
                }
            }
        }
        // Query for hostname - A/AAAA as answer
        else if qname == hostname {
            for r in all_records {
                if (r.typ == mdns::TYPE_A || r.typ == mdns::TYPE_AAAA)
                    && (is_any || r.typ == query_type)
                {
                    answers.push(r);
                }
            }
        }
    }

    (answers, additional)
}

fn create_multicast_socket_v4() -> Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    sock.set_reuse_port(true)?;
    let addr: SocketAddrV4 = "0.0.0.0:5353".parse()?;
    sock.bind(&socket2::SockAddr::from(addr))?;
    let maddr: Ipv4Addr = "224.0.0.251".parse()?;
    sock.join_multicast_v4(&maddr, &Ipv4Addr::UNSPECIFIED)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

fn create_multicast_socket_v6(interface: u32) -> Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    sock.set_reuse_port(true)?;
    let addr: SocketAddrV6 = "[::]:5353".parse()?;
    sock.bind(&socket2::SockAddr::from(addr))?;
    let maddr: Ipv6Addr = "ff02::fb".parse()?;
    sock.join_multicast_v6(&maddr, interface)?;
    sock.set_multicast_if_v6(interface)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

fn get_local_ips() -> (Vec<Ipv4Addr>, Vec<Ipv6Addr>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    if let Ok(ifaces) = if_addrs::get_if_addrs() {
        for iface in ifaces {
            match iface.ip() {
                std::net::IpAddr::V4(ip) if !ip.is_loopback() => v4.push(ip),
                std::net::IpAddr::V6(ip) if !ip.is_loopback() => v6.push(ip),
                _ => {}
            }
        }
    }
    (v4, v6)
}

struct McastSocket {
    sock: Arc<UdpSocket>,
    multicast_addr: &'static str,
}

struct AnnouncerInner {
    services: Vec<ServiceRegistration>,
    local_ips_v4: Vec<Ipv4Addr>,
    local_ips_v6: Vec<Ipv6Addr>,
}

/// Long-running mDNS responder for the bridge's service registrations.
pub struct Announcer {
    inner: Arc<Mutex<AnnouncerInner>>,
    sockets: Arc<Vec<McastSocket>>,
    send_tx: UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    inner: Arc<Mutex<AnnouncerInner>>,
    send_tx: UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 9000];
    loop {
        let (n, addr) = tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        log::debug!("mdns recv error: {}", e);
                        continue;
                    }
                }
            }
            _ = cancel.cancelled() => return,
        };

        let msg = match mdns::parse_dns(&buf[..n], addr) {
            Ok(m) => m,
            Err(e) => {
                log::trace!("failed to parse mdns packet from {}: {:?}", addr, e);
                continue;
            }
        };
        if msg.is_response() {
            continue;
        }

        let state = inner.lock().await;
        if state.services.is_empty() {
            continue;
        }
        let mut all_answers = Vec::new();
        let mut all_additional = Vec::new();
        for q in &msg.queries {
            let (ans, add) = find_matching_services(
                &q.name,
                q.typ,
                &state.services,
                &state.local_ips_v4,
                &state.local_ips_v6,
            );
            all_answers.extend(ans);
            all_additional.extend(add);
        }
        drop(state);

        if !all_answers.is_empty() {
            if let Ok(packet) = mdns::build_response(&all_answers, &all_additional) {
                let _ = send_tx.send(packet);
            }
        }
    }
}

async fn send_loop(
    sockets: Arc<Vec<McastSocket>>,
    mut rx: UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            data = rx.recv() => {
                match data {
                    Some(d) => d,
                    None => return,
                }
            }
            _ = cancel.cancelled() => return,
        };
        for ms in sockets.iter() {
            let _ = ms.sock.send_to(&data, ms.multicast_addr).await;
        }
    }
}

impl Announcer {
    pub async fn new() -> Result<Arc<Self>> {
        let (send_tx, send_rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (v4, v6) = get_local_ips();
        let inner = Arc::new(Mutex::new(AnnouncerInner {
            services: Vec::new(),
            local_ips_v4: v4,
            local_ips_v6: v6,
        }));

        let mut mcast_sockets: Vec<McastSocket> = Vec::new();
        match create_multicast_socket_v4() {
            Ok(std_sock) => match UdpSocket::from_std(std_sock) {
                Ok(s) => mcast_sockets.push(McastSocket {
                    sock: Arc::new(s),
                    multicast_addr: MDNS_ADDR_V4,
                }),
                Err(e) => log::warn!("failed to wrap v4 mdns socket: {}", e),
            },
            Err(e) => log::warn!("failed to create v4 mdns socket: {}", e),
        }
        if let Ok(ifaces) = if_addrs::get_if_addrs() {
            let mut seen_indices = std::collections::HashSet::new();
            for iface in ifaces {
                if !iface.ip().is_ipv6() {
                    continue;
                }
                if let Some(idx) = iface.index {
                    if !seen_indices.insert(idx) {
                        continue;
                    }
                    match create_multicast_socket_v6(idx) {
                        Ok(std_sock) => match UdpSocket::from_std(std_sock) {
                            Ok(s) => mcast_sockets.push(McastSocket {
                                sock: Arc::new(s),
                                multicast_addr: MDNS_ADDR_V6,
                            }),
                            Err(e) => {
                                log::debug!("failed to wrap v6 mdns socket idx={}: {}", idx, e)
                            }
                        },
                        Err(e) => {
                            log::debug!("failed to create v6 mdns socket idx={}: {}", idx, e)
                        }
                    }
                }
            }
        }
        if mcast_sockets.is_empty() {
            anyhow::bail!("no mdns sockets could be created");
        }
        let sockets = Arc::new(mcast_sockets);

        for ms in sockets.iter() {
            let sock = ms.sock.clone();
            let inner = inner.clone();
            let send_tx = send_tx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                recv_loop(sock, inner, send_tx, cancel).await;
            });
        }
        {
            let sockets = sockets.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                send_loop(sockets, send_rx, cancel).await;
            });
        }

        Ok(Arc::new(Announcer {
            inner,
            sockets,
            send_tx,
            cancel,
        }))
    }

    /// Register a service and send a gratuitous announcement for it.
    pub async fn register_service(&self, reg: ServiceRegistration) {
        log::info!(
            "advertising {}.{} via mdns",
            reg.instance_name,
            reg.service_type
        );
        let mut state = self.inner.lock().await;
        state.services.push(reg);
        drop(state);
        self.announce().await;
    }

    /// Unregister a service, multicasting a goodbye (TTL 0) for its records.
    pub async fn unregister_service(&self, instance: &str, service_type: &str) {
        let mut state = self.inner.lock().await;
        let idx = state
            .services
            .iter()
            .position(|s| s.instance_name == instance && s.service_type == service_type);
        if let Some(idx) = idx {
            let reg = state.services.remove(idx);
            let records = goodbye_records(&reg, &state.local_ips_v4, &state.local_ips_v6);
            drop(state);
            if let Ok(pkt) = mdns::build_response(&records, &[]) {
                // sent directly on the sockets: a shutdown() right after this
                // call must not be able to drop the queued goodbye
                self.multicast(&pkt).await;
            }
        }
    }

    /// Send a packet on every multicast socket, bypassing the send queue.
    async fn multicast(&self, data: &[u8]) {
        for ms in self.sockets.iter() {
            let _ = ms.sock.send_to(data, ms.multicast_addr).await;
        }
    }

    /// Gratuitous announcement of all registered services.
    pub async fn announce(&self) {
        let state = self.inner.lock().await;
        let mut all_answers = Vec::new();
        let mut all_additional = Vec::new();
        for reg in &state.services {
            let records = build_service_records(reg, &state.local_ips_v4, &state.local_ips_v6);
            for r in records {
                if r.typ == mdns::TYPE_PTR {
                    all_answers.push(r);
                } else {
                    all_additional.push(r);
                }
            }
        }
        drop(state);

        if !all_answers.is_empty() {
            if let Ok(pkt) = mdns::build_response(&all_answers, &all_additional) {
                let _ = self.send_tx.send(pkt);
            }
        }
    }

    /// Stop all background tasks. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registration() -> ServiceRegistration {
        matter_service_registration("gw1", "Lumi Gateway", 5540, 0xFFF1, 0x8001, 3840, false)
    }

    #[test]
    fn test_txt_records() {
        let reg = test_registration();
        let txt: std::collections::HashMap<_, _> = reg.txt_records.iter().cloned().collect();
        assert_eq!(txt["D"], "3840");
        assert_eq!(txt["VP"], "65521+32769");
        assert_eq!(txt["CM"], "1");
        assert_eq!(txt["DT"], "65535");
        assert_eq!(txt["DN"], "Lumi Gateway");
        assert_eq!(txt["SII"], "5000");
        assert_eq!(txt["SAI"], "300");

        let commissioned =
            matter_service_registration("gw1", "Lumi Gateway", 5540, 0xFFF1, 0x8001, 3840, true);
        let txt: std::collections::HashMap<_, _> =
            commissioned.txt_records.iter().cloned().collect();
        assert_eq!(txt["CM"], "0");
    }

    #[test]
    fn test_service_records() {
        let reg = test_registration();
        let v4 = vec!["192.168.1.2".parse().unwrap()];
        let records = build_service_records(&reg, &v4, &[]);

        let ptr = records.iter().find(|r| r.typ == mdns::TYPE_PTR).unwrap();
        assert_eq!(ptr.name, "_matter._tcp.local.");

        let srv = records.iter().find(|r| r.typ == mdns::TYPE_SRV).unwrap();
        assert_eq!(srv.name, "Lumi Gateway._matter._tcp.local.");
        assert_eq!(((srv.rdata[4] as u16) << 8) | srv.rdata[5] as u16, 5540);

        let a = records.iter().find(|r| r.typ == mdns::TYPE_A).unwrap();
        assert_eq!(a.name, "gw1.local.");
        assert_eq!(a.rdata, vec![192, 168, 1, 2]);

        let txt = records.iter().find(|r| r.typ == mdns::TYPE_TXT).unwrap();
        let txt_str = String::from_utf8_lossy(&txt.rdata);
        assert!(txt_str.contains("D=3840"));
        assert!(txt_str.contains("VP=65521+32769"));
    }

    #[test]
    fn test_goodbye_records_expire_immediately() {
        let reg = test_registration();
        let v4 = vec!["192.168.1.2".parse().unwrap()];
        let records = goodbye_records(&reg, &v4, &[]);
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.ttl == 0));
    }

    #[test]
    fn test_query_matching() {
        let reg = test_registration();
        let services = vec![reg];
        let v4 = vec!["192.168.1.2".parse().unwrap()];

        // service type query answers with PTR
        let (answers, additional) =
            find_matching_services("_matter._tcp.local.", mdns::TYPE_PTR, &services, &v4, &[]);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].typ, mdns::TYPE_PTR);
        assert!(additional.iter().any(|r| r.typ == mdns::TYPE_SRV));
        assert!(additional.iter().any(|r| r.typ == mdns::TYPE_TXT));
        assert!(additional.iter().any(|r| r.typ == mdns::TYPE_A));

        // instance query answers with SRV/TXT
        let (answers, additional) = find_matching_services(
            "lumi gateway._matter._tcp.local.",
            mdns::QTYPE_ANY,
            &services,
            &v4,
            &[],
        );
        assert!(answers.iter().any(|r| r.typ == mdns::TYPE_SRV));
        assert!(answers.iter().any(|r| r.typ == mdns::TYPE_TXT));
        assert!(additional.iter().any(|r| r.typ == mdns::TYPE_A));

        // unrelated query matches nothing
        let (answers, _) =
            find_matching_services("_http._tcp.local.", mdns::QTYPE_ANY, &services, &v4, &[]);
        assert!(answers.is_empty());
    }
}
