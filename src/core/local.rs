// src/core/local.rs

//! Answers the `Local` command class (`spec.md` §6, class 3) without
//! contacting any backend: `PING`/`ECHO`/`AUTH`/`TIME`/`READONLY`/
//! `READWRITE`/`WAIT`/`COMMAND`/`SELECT`/`SHUTDOWN`/`SLOWLOG`/`DEBUG`/
//! `CONFIG`/`CLIENT`/`LATENCY`/`MONITOR`/`INFO`, plus the `PROXY` admin
//! sub-commands from `spec.md` §6 (`INSTANCES`, `INSTANCE`, `ROUTER`,
//! `FLUSHCONFIG`, `SET auth-pass`).

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::config::{AuthConfig, RouterConfig};
use crate::core::errors::ProxyError;
use crate::core::protocol::RespFrame;
use crate::core::state::ProxyState;

/// What the connection handler should do after a local command runs.
pub enum LocalOutcome {
    Reply(RespFrame),
    /// `SHUTDOWN`: the connection closes without a reply, after the process
    /// shutdown signal has been broadcast.
    Close,
}

fn bulk(s: impl Into<Vec<u8>>) -> RespFrame {
    RespFrame::BulkString(Bytes::from(s.into()))
}

fn arg_str(args: &[Bytes], i: usize) -> Option<&str> {
    args.get(i).and_then(|b| std::str::from_utf8(b).ok())
}

/// Dispatches one `Local`-classified command. `session_name` is the
/// connection's `CLIENT SETNAME` value, mutated in place here; `addr` and
/// `session_id` identify the calling connection for `CLIENT LIST`/`INFO`.
pub async fn dispatch(
    state: &ProxyState,
    session_id: u64,
    addr: SocketAddr,
    session_name: &mut Option<String>,
    name: &str,
    args: &[Bytes],
) -> LocalOutcome {
    let reply = match name {
        "PING" => match args.first() {
            Some(msg) => RespFrame::BulkString(msg.clone()),
            None => RespFrame::SimpleString("PONG".to_string()),
        },
        "ECHO" => match args.first() {
            Some(msg) => RespFrame::BulkString(msg.clone()),
            None => RespFrame::Error(
                ProxyError::WrongArgumentCount("echo".to_string()).to_string(),
            ),
        },
        "AUTH" => {
            // The proxy itself has no client-facing password: per-instance
            // backend secrets are applied transparently on each link.
            // Accept any credentials so clients that always AUTH still work.
            RespFrame::ok()
        }
        "TIME" => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            RespFrame::Array(vec![
                bulk(now.as_secs().to_string()),
                bulk(now.subsec_micros().to_string()),
            ])
        }
        "READONLY" | "READWRITE" => RespFrame::ok(),
        "WAIT" => RespFrame::Integer(0),
        "COMMAND" => match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
            Some("COUNT") => RespFrame::Integer(0),
            _ => RespFrame::Array(Vec::new()),
        },
        "SELECT" => match arg_str(args, 0) {
            Some("0") => RespFrame::ok(),
            _ => RespFrame::Error(
                "ERR the proxy only supports database index 0".to_string(),
            ),
        },
        "SHUTDOWN" => {
            let _ = state.shutdown_tx.send(());
            return LocalOutcome::Close;
        }
        "SLOWLOG" => match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
            Some("LEN") => RespFrame::Integer(0),
            Some("RESET") => RespFrame::ok(),
            _ => RespFrame::Array(Vec::new()),
        },
        "DEBUG" => match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
            Some("PING") => RespFrame::SimpleString("PONG".to_string()),
            _ => RespFrame::ok(),
        },
        "CONFIG" => handle_config(state, args),
        "CLIENT" => handle_client(state, session_id, addr, session_name, args),
        "LATENCY" => match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
            Some("HISTORY") | Some("LATEST") => RespFrame::Array(Vec::new()),
            Some("RESET") => RespFrame::Integer(0),
            _ => RespFrame::Array(Vec::new()),
        },
        "MONITOR" => RespFrame::Error(
            ProxyError::NotSupported("MONITOR".to_string()).to_string(),
        ),
        "PROXY" => handle_proxy(state, args),
        "INFO" => handle_info(state),
        other => RespFrame::Error(ProxyError::UnknownCommand(other.to_string()).to_string()),
    };
    LocalOutcome::Reply(reply)
}

fn handle_config(state: &ProxyState, args: &[Bytes]) -> RespFrame {
    match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
        Some("GET") => {
            let Some(key) = arg_str(args, 1) else {
                return RespFrame::Error(ProxyError::WrongArgumentCount("config|get".to_string()).to_string());
            };
            let config = state.config.read();
            let all = [
                ("log_level", config.log_level.clone()),
                ("host", config.host.clone()),
                ("port", config.port.to_string()),
                (
                    "cluster.redirect_max_limit",
                    config.cluster.redirect_max_limit.to_string(),
                ),
            ];
            let matches: Vec<RespFrame> = if key == "*" {
                all.into_iter().flat_map(|(k, v)| [bulk(k), bulk(v)]).collect()
            } else {
                all.into_iter()
                    .find(|(k, _)| *k == key.to_ascii_lowercase())
                    .map(|(k, v)| vec![bulk(k), bulk(v)])
                    .unwrap_or_default()
            };
            RespFrame::Array(matches)
        }
        Some("SET") => {
            let (Some(key), Some(value)) = (arg_str(args, 1), arg_str(args, 2)) else {
                return RespFrame::Error(ProxyError::WrongArgumentCount("config|set".to_string()).to_string());
            };
            let mut config = state.config.write();
            match key.to_ascii_lowercase().as_str() {
                "log_level" => match tracing_subscriber::filter::EnvFilter::try_new(value) {
                    Ok(new_filter) => {
                        if let Err(e) = state.log_reload_handle.reload(new_filter) {
                            return RespFrame::Error(format!("ERR failed to reload log level: {e}"));
                        }
                        config.log_level = value.to_string();
                    }
                    Err(e) => return RespFrame::Error(format!("ERR invalid log filter: {e}")),
                },
                "cluster.redirect_max_limit" => match value.parse() {
                    Ok(n) => config.cluster.redirect_max_limit = n,
                    Err(_) => return RespFrame::Error("ERR invalid value".to_string()),
                },
                _ => return RespFrame::Error(format!("ERR unknown config parameter '{key}'")),
            }
            RespFrame::ok()
        }
        _ => RespFrame::ok(),
    }
}

fn handle_client(
    state: &ProxyState,
    session_id: u64,
    addr: SocketAddr,
    session_name: &mut Option<String>,
    args: &[Bytes],
) -> RespFrame {
    match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
        Some("GETNAME") => match session_name {
            Some(n) => bulk(n.clone()),
            None => RespFrame::BulkString(Bytes::new()),
        },
        Some("SETNAME") => {
            let Some(new_name) = arg_str(args, 1) else {
                return RespFrame::Error(
                    ProxyError::WrongArgumentCount("client|setname".to_string()).to_string(),
                );
            };
            *session_name = Some(new_name.to_string());
            if let Some(entry) = state.clients.get(&session_id) {
                *entry.name.lock() = Some(new_name.to_string());
            }
            RespFrame::ok()
        }
        Some("ID") => RespFrame::Integer(session_id as i64),
        Some("LIST") => {
            let mut lines = String::new();
            for entry in state.clients.iter() {
                let name = entry.name.lock().clone().unwrap_or_default();
                lines.push_str(&format!(
                    "id={} addr={} name={} age={}\n",
                    entry.key(),
                    entry.addr,
                    name,
                    entry.created_at.elapsed().as_secs()
                ));
            }
            let _ = addr;
            bulk(lines)
        }
        _ => RespFrame::ok(),
    }
}

fn handle_info(state: &ProxyState) -> RespFrame {
    let body = format!(
        "# Server\r\nproxy_myid:{}\r\nconnected_clients:{}\r\n# Cluster\r\nslots_assigned:{}\r\ninstances_known:{}\r\n",
        state.myid,
        state.clients.len(),
        state.slot_table.slots_num(),
        state.registry.len(),
    );
    bulk(body)
}

fn handle_proxy(state: &ProxyState, args: &[Bytes]) -> RespFrame {
    match arg_str(args, 0).map(str::to_ascii_uppercase).as_deref() {
        Some("INSTANCES") => {
            let instances = state.registry.all();
            RespFrame::Array(
                instances
                    .iter()
                    .map(|inst| bulk(format!("{} poolsize={} reachable={}", inst.addr, inst.poolsize(), inst.is_reachable())))
                    .collect(),
            )
        }
        Some("INSTANCE") => {
            let (Some(ip), Some(port)) = (arg_str(args, 1), arg_str(args, 2)) else {
                return RespFrame::Error(
                    ProxyError::WrongArgumentCount("proxy|instance".to_string()).to_string(),
                );
            };
            match format!("{ip}:{port}").parse::<SocketAddr>() {
                Ok(addr) => match state.registry.get(&addr) {
                    Some(inst) => bulk(format!(
                        "{} poolsize={} reachable={}",
                        inst.addr,
                        inst.poolsize(),
                        inst.is_reachable()
                    )),
                    None => RespFrame::Null,
                },
                Err(_) => RespFrame::Error(ProxyError::InvalidAddress(format!("{ip}:{port}")).to_string()),
            }
        }
        Some("ROUTER") => {
            let (Some(ip), Some(port)) = (arg_str(args, 1), arg_str(args, 2)) else {
                return RespFrame::Error(
                    ProxyError::WrongArgumentCount("proxy|router".to_string()).to_string(),
                );
            };
            let poolsize: usize = arg_str(args, 3).and_then(|s| s.parse().ok()).unwrap_or(1);
            let addr = match format!("{ip}:{port}").parse::<SocketAddr>() {
                Ok(a) => a,
                Err(_) => {
                    return RespFrame::Error(ProxyError::InvalidAddress(format!("{ip}:{port}")).to_string());
                }
            };
            match state.registry.register_router(addr, poolsize) {
                Ok(_) => {
                    let mut config = state.config.write();
                    config.cluster.routers.push(RouterConfig {
                        host: ip.to_string(),
                        port: addr.port(),
                        poolsize,
                    });
                    RespFrame::ok()
                }
                Err(e) => RespFrame::Error(e.to_string()),
            }
        }
        Some("FLUSHCONFIG") => {
            let mut config = state.config.write();
            config.cluster.routers = state
                .registry
                .router_entries()
                .into_iter()
                .map(|(addr, poolsize)| RouterConfig {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    poolsize,
                })
                .collect();
            config.cluster.auth = state
                .registry
                .auth_entries()
                .into_iter()
                .map(|(addr, password)| AuthConfig {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    password,
                })
                .collect();
            match config.save() {
                Ok(()) => RespFrame::ok(),
                Err(e) => RespFrame::Error(format!("ERR failed to flush config: {e}")),
            }
        }
        Some("SET") => {
            if arg_str(args, 1).map(str::to_ascii_uppercase).as_deref() != Some("AUTH-PASS") {
                return RespFrame::Error("ERR unknown PROXY SET parameter".to_string());
            }
            let (Some(ip), Some(port), Some(password)) =
                (arg_str(args, 2), arg_str(args, 3), arg_str(args, 4))
            else {
                return RespFrame::Error(
                    ProxyError::WrongArgumentCount("proxy|set auth-pass".to_string()).to_string(),
                );
            };
            match format!("{ip}:{port}").parse::<SocketAddr>() {
                Ok(addr) => {
                    state.registry.set_auth(addr, password.to_string());
                    RespFrame::ok()
                }
                Err(_) => RespFrame::Error(ProxyError::InvalidAddress(format!("{ip}:{port}")).to_string()),
            }
        }
        _ => RespFrame::Error("ERR unknown PROXY sub-command".to_string()),
    }
}
