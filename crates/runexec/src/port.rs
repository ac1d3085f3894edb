use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use crate::RunError;

/// How many ports above the starting one are tried when picking automatically.
pub const PORT_SEARCH_SPAN: u16 = 100;

/// Which port the backend should listen on.
/// （後端應監聽的連接埠。）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortChoice {
    /// Configured explicitly; it must be free.
    Fixed(u16),
    /// Not configured; the first free port from here upwards is taken.
    FirstFreeFrom(u16),
}

/// Resolves `choice` to a port nothing is listening on yet.
///
/// A listener already bound to the port would answer the readiness check in
/// place of the backend, so a busy fixed port is an error.
/// （已有其他程式監聽的連接埠會冒充後端通過就緒檢查，因此固定連接埠被占用時回傳錯誤。）
pub fn select_port(host: &str, choice: PortChoice) -> Result<u16, RunError> {
    match choice {
        PortChoice::Fixed(port) => {
            ensure_port_free(host, port)?;
            Ok(port)
        }
        PortChoice::FirstFreeFrom(start) => {
            let end = start.saturating_add(PORT_SEARCH_SPAN);
            for port in start..=end {
                match ensure_port_free(host, port) {
                    Ok(()) => {
                        if port != start {
                            tracing::info!(host, busy = start, port, "default backend port busy, using the next free one");
                        }
                        return Ok(port);
                    }
                    Err(RunError::PortInUse { .. }) => continue,
                    Err(err) => return Err(err),
                }
            }
            Err(RunError::NoFreePort {
                host: host.to_string(),
                start,
                end,
            })
        }
    }
}

/// Fails with [`RunError::PortInUse`] when `host:port` cannot be bound.
/// （無法綁定 `host:port` 時回傳 [`RunError::PortInUse`]。）
pub fn ensure_port_free(host: &str, port: u16) -> Result<(), RunError> {
    let address = format!("{host}:{port}");
    let targets: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| RunError::Resolve {
            address: address.clone(),
            source,
        })?
        .collect();
    for target in targets {
        match TcpListener::bind(target) {
            Ok(_listener) => {}
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                return Err(RunError::PortInUse { address });
            }
            Err(source) => return Err(RunError::Bind { address, source }),
        }
    }
    Ok(())
}
