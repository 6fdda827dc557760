//! TCP connect probe implementation.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ProbeError;

/// Attempt to establish a TCP connection to `host:port` within the timeout.
pub async fn run_tcp_probe(address: &str, timeout: Duration) -> Result<String, ProbeError> {
    let (host, port) = parse_host_port(address)?;
    let target = format!("{}:{}", host, port);

    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
        Ok(Ok(_stream)) => Ok(format!(
            "connected to {} in {} ms",
            target,
            start.elapsed().as_millis()
        )),
        Ok(Err(e)) => Err(ProbeError::Network(format!(
            "connection to {} failed: {}",
            target, e
        ))),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
fn parse_host_port(address: &str) -> Result<(&str, u16), ProbeError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ProbeError::Config(format!("expected host:port, got {:?}", address)))?;
    if host.is_empty() {
        return Err(ProbeError::Config(format!(
            "expected host:port, got {:?}",
            address
        )));
    }
    let port: u16 = port.parse().map_err(|_| {
        ProbeError::Config(format!("invalid port in {:?}, expected host:port", address))
    })?;
    Ok((host, port))
}
