use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use orchestrator::{params_key, Phase, Result};
use recon_core::{ExecutionContext, PhaseResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::PhaseError;
use crate::target::{resolve, stored_strings, target_host};

pub const NAME: &str = "portscan";

const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);
const BANNER_TIMEOUT: Duration = Duration::from_millis(700);
const SCAN_CONCURRENCY: usize = 64;
const BANNER_LIMIT: usize = 256;

pub const COMMON_PORTS: [(u16, &str); 20] = [
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (143, "imap"),
    (443, "https"),
    (445, "smb"),
    (993, "imaps"),
    (995, "pop3s"),
    (1433, "mssql"),
    (3306, "mysql"),
    (3389, "rdp"),
    (5432, "postgresql"),
    (6379, "redis"),
    (8080, "http-alt"),
    (9200, "elasticsearch"),
    (27017, "mongodb"),
];

pub fn service_name(port: u16) -> &'static str {
    COMMON_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// TCP connect scan of a fixed port list with a best-effort banner grab.
#[derive(Debug, Clone)]
pub struct PortScanPhase {
    ports: Vec<u16>,
    connect_timeout: Duration,
}

impl Default for PortScanPhase {
    fn default() -> Self {
        Self {
            ports: COMMON_PORTS.iter().map(|(port, _)| *port).collect(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl PortScanPhase {
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn address(&self, target: &str, ctx: &ExecutionContext) -> Result<IpAddr> {
        if let Some(ip) = stored_strings(ctx, "passive.ips")
            .iter()
            .find_map(|ip| ip.parse::<IpAddr>().ok())
        {
            return Ok(ip);
        }
        let host = target_host(target);
        resolve(host)
            .await
            .map_err(|e| e.into_failure(NAME))?
            .into_iter()
            .next()
            .ok_or_else(|| PhaseError::NoAddress(host.to_string()).into_failure(NAME))
    }

    async fn probe(&self, addr: SocketAddr) -> Option<OpenPort> {
        let mut stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            _ => return None,
        };

        let mut buf = vec![0u8; BANNER_LIMIT];
        let banner = match tokio::time::timeout(BANNER_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        };

        debug!(port = addr.port(), banner = ?banner, "Port open");
        Some(OpenPort {
            port: addr.port(),
            service: service_name(addr.port()).to_string(),
            banner,
        })
    }
}

#[async_trait]
impl Phase for PortScanPhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "TCP connect scan of common service ports with banner grabbing"
    }

    async fn execute(&self, target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let ip = self.address(target, ctx).await?;
        let ports = ctx
            .get(&params_key(NAME))
            .and_then(|params| params.get("ports").cloned())
            .and_then(|value| serde_json::from_value::<Vec<u16>>(value).ok())
            .unwrap_or_else(|| self.ports.clone());

        let mut open: Vec<OpenPort> = stream::iter(ports)
            .map(|port| self.probe(SocketAddr::new(ip, port)))
            .buffer_unordered(SCAN_CONCURRENCY)
            .filter_map(|found| async move { found })
            .collect()
            .await;
        open.sort_by_key(|p| p.port);

        info!(address = %ip, open = open.len(), "Port scan finished");
        let open_json = serde_json::to_value(&open)?;
        ctx.insert("portscan.address", ip.to_string());
        ctx.insert("portscan.open_ports", open_json.clone());

        Ok(PhaseResult::new(NAME)
            .with("address", ip.to_string())
            .with("open_ports", open_json)
            .with("count", json!(open.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_open_port_with_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });
        let closed = closed_port().await;

        let ctx = ExecutionContext::new("127.0.0.1");
        let phase = PortScanPhase::default().with_ports(vec![closed, open]);
        let result = phase.execute("127.0.0.1", &ctx).await.unwrap();

        assert_eq!(result.number("count"), Some(1.0));
        let ports: Vec<OpenPort> =
            serde_json::from_value(ctx.get("portscan.open_ports").unwrap()).unwrap();
        assert_eq!(ports[0].port, open);
        assert_eq!(ports[0].banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
    }

    #[tokio::test]
    async fn test_ports_from_params_and_passive_address() {
        let closed = closed_port().await;
        let ctx = ExecutionContext::new("example.invalid");
        ctx.insert("passive.ips", json!(["127.0.0.1"]));
        ctx.insert(params_key(NAME), json!({"ports": [closed]}));

        let result = PortScanPhase::default()
            .execute("example.invalid", &ctx)
            .await
            .unwrap();
        assert!(result.is_zero_count());
        assert_eq!(result.get("address"), Some(&json!("127.0.0.1")));
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service_name(22), "ssh");
        assert_eq!(service_name(6379), "redis");
        assert_eq!(service_name(31337), "unknown");
    }
}
