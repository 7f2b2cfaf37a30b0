// src/core/command/classify.rs

//! Classifies a command by how the proxy must route it, and extracts the
//! keys it addresses. Grounded in `spineldb`'s command dispatch and
//! `key_extractor` modules, trimmed to the command surface this proxy
//! actually forwards: it has no data-type semantics of its own, so most
//! commands are classified purely by name and argument shape rather than
//! by a registered per-command implementation.

use bytes::Bytes;

use super::coalesce::CoalescePolicy;

/// How a command is routed, per `spec.md` §6's command-surface classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandClass {
    /// Routed to the single instance owning the (single) key's slot.
    Forwarded,
    /// Split across every instance whose slot is touched by the command's
    /// keys, then recombined by the given coalesce policy.
    FanOut(CoalescePolicy),
    /// Answered by the proxy itself without contacting any backend (e.g.
    /// `PING`, `PROXY ...` admin sub-commands).
    Local,
    /// Commands this proxy rejects outright with a "not supported" error,
    /// per `spec.md` §1's Non-goals and §6's Refused class.
    Refused,
}

/// Classifies `name` (already uppercased by the caller).
///
/// `UNLINK` is treated identically to `DEL`: `spec.md` names only `DEL` in
/// its fan-out table, but `UNLINK` is the same multi-key delete with a
/// non-blocking backend hint, so it gets the same coalesce policy (see
/// `DESIGN.md`).
pub fn classify(name: &str) -> CommandClass {
    match name {
        // Local — answered by the proxy itself (spec.md §6, class 3).
        "PING" | "ECHO" | "AUTH" | "TIME" | "READONLY" | "READWRITE" | "WAIT" | "COMMAND"
        | "SHUTDOWN" | "SLOWLOG" | "DEBUG" | "CONFIG" | "CLIENT" | "LATENCY" | "MONITOR"
        | "PROXY" | "INFO" | "SELECT" => CommandClass::Local,

        // Fan-out — split across shards and coalesced (spec.md §6, class 2).
        "DEL" | "UNLINK" => CommandClass::FanOut(CoalescePolicy::Del),
        "EXISTS" => CommandClass::FanOut(CoalescePolicy::Exists),
        "MSET" => CommandClass::FanOut(CoalescePolicy::MSet),
        "MGET" => CommandClass::FanOut(CoalescePolicy::MGet),

        // Refused — rejected outright (spec.md §6, class 4, and §1 Non-goals).
        "KEYS" | "MOVE" | "RANDOMKEY" | "SCAN" | "DBSIZE" | "RENAME" | "RENAMENX" | "BITOP"
        | "MSETNX" | "MIGRATE" | "ASKING" | "RESTORE" | "RESTORE-ASKING" | "BLPOP" | "BRPOP"
        | "BLMOVE" | "BRPOPLPUSH" | "BLMPOP" | "BZPOPMIN" | "BZPOPMAX" | "BZMPOP"
        | "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PUBLISH" | "PUBSUB"
        | "SSUBSCRIBE" | "SUNSUBSCRIBE" | "SPUBLISH" | "MULTI" | "EXEC" | "DISCARD" | "WATCH"
        | "UNWATCH" | "SCRIPT" | "FUNCTION" | "SAVE" | "BGSAVE" | "BGREWRITEAOF" | "LASTSAVE"
        | "REPLICAOF" | "SLAVEOF" | "REPLCONF" | "PSYNC" | "SYNC" | "FAILOVER" | "CLUSTER"
        | "ROLE" | "PFDEBUG" | "PFSELFTEST" | "ACL" => CommandClass::Refused,

        // Forwarded — every other (by assumption single-key) keyspace
        // command: strings, lists, hashes, sets, sorted sets, bitmap,
        // hyperloglog, geo, sort, ttl, dump, object, eval/evalsha, etc.
        _ => CommandClass::Forwarded,
    }
}

/// Extracts the keys addressed by a command, following the same per-command
/// rules `spineldb`'s `key_extractor` uses (single key at a fixed position,
/// or every odd/even argument for `MSET`-shaped commands).
pub fn extract_keys(name: &str, args: &[Bytes]) -> Vec<Bytes> {
    match name {
        "DEL" | "UNLINK" | "EXISTS" | "MGET" => args.to_vec(),
        "MSET" => args.iter().step_by(2).cloned().collect(),
        "PING" | "ECHO" | "AUTH" | "TIME" | "READONLY" | "READWRITE" | "WAIT" | "COMMAND"
        | "SHUTDOWN" | "SLOWLOG" | "DEBUG" | "CONFIG" | "CLIENT" | "LATENCY" | "MONITOR"
        | "PROXY" | "INFO" | "SELECT" => Vec::new(),
        _ => args.first().cloned().into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_commands_are_forwarded() {
        assert_eq!(classify("GET"), CommandClass::Forwarded);
        assert_eq!(classify("SET"), CommandClass::Forwarded);
    }

    #[test]
    fn del_and_unlink_are_fan_out_with_del_policy() {
        assert_eq!(classify("DEL"), CommandClass::FanOut(CoalescePolicy::Del));
        assert_eq!(classify("UNLINK"), CommandClass::FanOut(CoalescePolicy::Del));
    }

    #[test]
    fn msetnx_is_refused_not_fan_out() {
        assert_eq!(classify("MSETNX"), CommandClass::Refused);
    }

    #[test]
    fn asking_is_refused_from_clients() {
        assert_eq!(classify("ASKING"), CommandClass::Refused);
    }

    #[test]
    fn select_ping_and_proxy_are_local() {
        assert_eq!(classify("SELECT"), CommandClass::Local);
        assert_eq!(classify("PING"), CommandClass::Local);
        assert_eq!(classify("PROXY"), CommandClass::Local);
    }

    #[test]
    fn blocking_and_pubsub_and_cluster_are_refused() {
        for name in ["BLPOP", "SUBSCRIBE", "CLUSTER", "MULTI", "SCAN"] {
            assert_eq!(classify(name), CommandClass::Refused, "{name} should be refused");
        }
    }

    #[test]
    fn extracts_every_other_arg_for_mset() {
        let args: Vec<Bytes> = ["k1", "v1", "k2", "v2"]
            .into_iter()
            .map(|s| Bytes::from(s.as_bytes().to_vec()))
            .collect();
        let keys = extract_keys("MSET", &args);
        assert_eq!(keys, vec![Bytes::from_static(b"k1"), Bytes::from_static(b"k2")]);
    }

    #[test]
    fn extracts_all_args_for_mget() {
        let args: Vec<Bytes> = ["k1", "k2", "k3"]
            .into_iter()
            .map(|s| Bytes::from(s.as_bytes().to_vec()))
            .collect();
        assert_eq!(extract_keys("MGET", &args), args);
    }

    #[test]
    fn ping_has_no_keys() {
        assert!(extract_keys("PING", &[]).is_empty());
    }
}
