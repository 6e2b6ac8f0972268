use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use crate::protocol::START_INSTRUCTION;

/// `a.b.c.255` for an IPv4 host; IPv6 has no broadcast
pub fn subnet_broadcast(host: IpAddr) -> Option<IpAddr> {
    match host {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(IpAddr::V4(Ipv4Addr::new(a, b, c, 255)))
        }
        IpAddr::V6(_) => None,
    }
}

/// Fire the start instruction at every target, `repeats` times.
///
/// Delivery is not confirmed. Per-target send failures are logged and
/// skipped; only failing to open the socket at all is an error.
pub fn send_start_instruction(
    host: IpAddr,
    targets: &[IpAddr],
    port: u16,
    repeats: u32,
    interval: Duration,
) -> io::Result<usize> {
    let socket = match UdpSocket::bind(SocketAddr::new(host, 0)) {
        Ok(socket) => socket,
        Err(e) => {
            log::debug!("Cannot bind start socket to {}: {}, using unspecified address", host, e);
            let any = match host {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            };
            UdpSocket::bind(SocketAddr::new(any, 0))?
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        log::debug!("Broadcast not available on start socket: {}", e);
    }

    let mut sent = 0;
    for round in 0..repeats {
        for target in targets {
            match socket.send_to(&START_INSTRUCTION, SocketAddr::new(*target, port)) {
                Ok(_) => sent += 1,
                Err(e) => log::debug!("Start instruction to {}:{} failed: {}", target, port, e),
            }
        }
        if round + 1 < repeats && !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    log::info!("Start instruction sent ({} datagrams to {} targets)", sent, targets.len());
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_broadcast() {
        let host: IpAddr = "192.168.1.101".parse().unwrap();
        assert_eq!(subnet_broadcast(host), Some("192.168.1.255".parse().unwrap()));
        assert_eq!(subnet_broadcast("::1".parse().unwrap()), None);
    }

    #[test]
    fn test_instruction_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = listener.local_addr().unwrap().port();
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        let sent = send_start_instruction(localhost, &[localhost], port, 2, Duration::ZERO).unwrap();
        assert_eq!(sent, 2);

        let mut buf = [0u8; 8];
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &START_INSTRUCTION);
    }
}
