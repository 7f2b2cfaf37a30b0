// src/core/topology.rs

//! Parses `CLUSTER NODES` replies into slot ownership, the wire format a
//! topology refresh uses to learn which instance owns which slots.

use std::net::SocketAddr;

/// One line of a `CLUSTER NODES` reply, decoded to the fields this proxy
/// needs: address and owned slot ranges. Flags/replication/epoch fields are
/// parsed only far enough to be skipped correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopology {
    pub addr: SocketAddr,
    pub is_master: bool,
    pub slots: Vec<(u16, u16)>,
}

/// Parses a full `CLUSTER NODES` reply body into one entry per line.
/// Lines for replicas with no slot ranges are kept (so the registry still
/// knows about them) but carry an empty `slots` list.
pub fn parse_cluster_nodes(body: &str) -> Vec<NodeTopology> {
    body.lines().filter_map(parse_node_line).collect()
}

fn parse_node_line(line: &str) -> Option<NodeTopology> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.split(' ');
    let _id = fields.next()?;
    let addr_field = fields.next()?;
    // addr_field looks like "host:port@busport" or "host:port@busport,hostname"
    let host_port = addr_field.split('@').next()?;
    let addr: SocketAddr = host_port.parse().ok()?;
    let flags = fields.next()?;
    let is_master = flags.split(',').any(|f| f == "master");
    let _replica_of = fields.next()?;
    let _ping_sent = fields.next()?;
    let _pong_recv = fields.next()?;
    let _config_epoch = fields.next()?;
    let _link_state = fields.next()?;

    let mut slots = Vec::new();
    for token in fields {
        if token.starts_with('[') {
            // Migrating/importing slot marker, e.g. "[1000-<-abcd]"; not a
            // stable ownership range, skip it.
            continue;
        }
        if let Some((start, end)) = token.split_once('-') {
            if let (Ok(s), Ok(e)) = (start.parse(), end.parse()) {
                slots.push((s, e));
            }
        } else if let Ok(s) = token.parse::<u16>() {
            slots.push((s, s));
        }
    }

    Some(NodeTopology {
        addr,
        is_master,
        slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_with_contiguous_range() {
        let body = "07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 master - 0 1426238317239 4 connected 0-5460\n";
        let nodes = parse_cluster_nodes(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].addr, "127.0.0.1:30004".parse().unwrap());
        assert!(nodes[0].is_master);
        assert_eq!(nodes[0].slots, vec![(0, 5460)]);
    }

    #[test]
    fn parses_replica_with_no_slots() {
        let body = "67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 2 connected\n";
        let nodes = parse_cluster_nodes(body);
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_master);
        assert!(nodes[0].slots.is_empty());
    }

    #[test]
    fn skips_migrating_slot_markers() {
        let body = "id 127.0.0.1:30001@31001 master - 0 0 1 connected 0-100 [200-<-otherid]\n";
        let nodes = parse_cluster_nodes(body);
        assert_eq!(nodes[0].slots, vec![(0, 100)]);
    }

    #[test]
    fn ignores_blank_lines() {
        assert!(parse_cluster_nodes("\n\n").is_empty());
    }
}
