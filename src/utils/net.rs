//! Network interface lookup for advertising viewer URLs

use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use tracing::{debug, warn};

/// Interfaces probed, in order, when the server listens on every address
pub const ADVERTISED_INTERFACES: &[&str] = &["eth0", "usb0", "usb1", "wlan0", "tailscale0"];

/// First IPv4 address assigned to `name`, if the interface exists and has one
pub fn interface_ipv4(name: &str) -> Option<Ipv4Addr> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("getifaddrs failed: {}", e);
            return None;
        }
    };

    addrs
        .filter(|ifa| ifa.interface_name == name)
        .filter_map(|ifa| ifa.address)
        .find_map(|addr| addr.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip()))
}

/// Viewer URLs for a server bound to `ip:port`
///
/// A wildcard bind expands to one URL per configured interface address; if
/// no interface has an address the loopback URL is returned so callers always
/// get something to print.
pub fn server_urls(ip: &str, port: u16) -> Vec<String> {
    if ip != "0.0.0.0" {
        return vec![format!("http://{}:{}", ip, port)];
    }

    let mut urls: Vec<String> = ADVERTISED_INTERFACES
        .iter()
        .filter_map(|name| {
            let addr = interface_ipv4(name)?;
            debug!("Interface {} has {}", name, addr);
            Some(format!("http://{}:{}", addr, port))
        })
        .collect();

    if urls.is_empty() {
        urls.push(format!("http://{}:{}", Ipv4Addr::LOCALHOST, port));
    }
    urls
}
