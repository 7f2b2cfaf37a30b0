// src/core/command/coalesce.rs

//! Recombines the per-shard replies of a fan-out command into the single
//! reply the client expects, per `spec.md` §4.6's coalesce policy table.

use crate::core::errors::ProxyError;
use crate::core::protocol::RespFrame;

/// How to merge the per-shard replies of a fan-out command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// `DEL`/`UNLINK`: sum the integer replies.
    Del,
    /// `EXISTS`: sum the integer replies.
    Exists,
    /// `MSET`/`MSETNX`: a single `OK` status, once every shard replies.
    MSet,
    /// `MGET`: concatenate the per-shard arrays back into key-order.
    MGet,
}

/// Merges `replies` (one per sub-request, in the order the sub-requests were
/// issued) according to `policy`. For `MGet`, `key_slot_indices[i]` gives
/// the position within the original key list that `replies[i]` corresponds
/// to, so the merged array can be reassembled in the client's original key
/// order even though sub-requests were grouped by shard.
pub fn merge(
    policy: CoalescePolicy,
    replies: Vec<Result<RespFrame, ProxyError>>,
    key_positions: &[Vec<usize>],
    total_keys: usize,
) -> Result<RespFrame, ProxyError> {
    match policy {
        CoalescePolicy::Del | CoalescePolicy::Exists => {
            let mut total = 0i64;
            for reply in replies {
                match reply? {
                    RespFrame::Integer(n) => total += n,
                    other => {
                        return Err(ProxyError::UnexpectedReplyType(format!("{other:?}")));
                    }
                }
            }
            Ok(RespFrame::Integer(total))
        }
        CoalescePolicy::MSet => {
            for reply in replies {
                match reply? {
                    RespFrame::SimpleString(status) if status == "OK" => {}
                    RespFrame::SimpleString(status) => return Ok(RespFrame::SimpleString(status)),
                    other => {
                        return Err(ProxyError::UnexpectedReplyType(format!("{other:?}")));
                    }
                }
            }
            Ok(RespFrame::ok())
        }
        CoalescePolicy::MGet => {
            let mut merged: Vec<RespFrame> = vec![RespFrame::Null; total_keys];
            for (reply, positions) in replies.into_iter().zip(key_positions) {
                let frame = reply?;
                let values = match frame {
                    RespFrame::Array(items) => items,
                    other => {
                        return Err(ProxyError::UnexpectedReplyType(format!("{other:?}")));
                    }
                };
                for (value, &pos) in values.into_iter().zip(positions) {
                    merged[pos] = value;
                }
            }
            Ok(RespFrame::Array(merged))
        }
    }
}
