//! Command execution against the keyspace.
//!
//! A pure function from a parsed [`Command`] to a [`Response`],
//! mutating the keyspace and timer manager along the way. Destruction
//! of large values is handed to the worker pool; the entry (or its
//! displaced payload) has always been detached from the keyspace and
//! its TTL timer cancelled before the hand-off.

use bytes::Bytes;
use cinder_core::time::{self, NO_EXPIRY};
use cinder_core::{dispose_value, Entry, Keyspace, SortedSet, Value, WorkerPool};
use cinder_protocol::{Command, ErrorCode, Response};
use tracing::debug;

use crate::timers::TimerManager;

/// Executes one command. Responses are the sole error surface: every
/// failure mode a client can trigger is an `Err` response, never an
/// `Err` return.
pub fn execute(
    cmd: Command,
    ks: &mut Keyspace,
    timers: &mut TimerManager,
    pool: &WorkerPool,
) -> Response {
    match cmd {
        Command::Get { key } => do_get(ks, &key),
        Command::Set { key, value } => do_set(ks, timers, pool, key, value),
        Command::Del { key } => do_del(ks, timers, pool, &key),
        Command::Keys => do_keys(ks),
        Command::ZAdd { key, score, name } => do_zadd(ks, key, score, name),
        Command::ZScore { key, name } => do_zscore(ks, &key, &name),
        Command::ZRem { key, name } => do_zrem(ks, &key, &name),
        Command::ZQuery {
            key,
            score,
            name,
            offset,
            limit,
        } => do_zquery(ks, &key, score, &name, offset, limit),
        Command::ZRank { key, name } => do_zrank(ks, &key, &name),
        Command::Expire { key, seconds } => do_expire(ks, timers, &key, seconds),
        Command::Ttl { key } => do_ttl(ks, &key),
        Command::Persist { key } => do_persist(ks, timers, &key),
    }
}

fn bad_type(expected: &str) -> Response {
    Response::Err(ErrorCode::BadType, format!("value is not a {expected}"))
}

fn do_get(ks: &Keyspace, key: &[u8]) -> Response {
    match ks.get(key) {
        None => Response::Nil,
        Some(entry) => match &entry.value {
            Value::Str(value) => Response::Str(value.clone()),
            Value::Zset(_) => bad_type("string"),
        },
    }
}

/// `set` unconditionally reshapes the entry: whatever was there becomes
/// a string and any TTL is cleared, matching the canonical contract.
fn do_set(
    ks: &mut Keyspace,
    timers: &mut TimerManager,
    pool: &WorkerPool,
    key: Bytes,
    value: Bytes,
) -> Response {
    if let Some(entry) = ks.get_mut(&key) {
        let old = std::mem::replace(&mut entry.value, Value::Str(value));
        if entry.has_expiry() {
            timers.cancel_ttl(&key, entry.expires_at_ms);
            entry.expires_at_ms = NO_EXPIRY;
        }
        dispose_value(old, pool);
        debug!(key = %String::from_utf8_lossy(&key), "set: updated key");
    } else {
        ks.insert(key.clone(), Entry::new(Value::Str(value)));
        debug!(key = %String::from_utf8_lossy(&key), "set: created key");
    }

    Response::ok()
}

fn do_del(ks: &mut Keyspace, timers: &mut TimerManager, pool: &WorkerPool, key: &Bytes) -> Response {
    match ks.remove(key) {
        Some(entry) => {
            if entry.has_expiry() {
                timers.cancel_ttl(key, entry.expires_at_ms);
            }
            dispose_value(entry.value, pool);
            debug!(key = %String::from_utf8_lossy(key), "del: deleted key");
            Response::Int(1)
        }
        None => Response::Int(0),
    }
}

fn do_keys(ks: &Keyspace) -> Response {
    Response::Arr(ks.keys().map(|key| Response::Str(key.clone())).collect())
}

fn do_zadd(ks: &mut Keyspace, key: Bytes, score: f64, name: Bytes) -> Response {
    match ks.get_mut(&key) {
        None => {
            let mut set = SortedSet::new();
            set.insert(score, name);
            ks.insert(key.clone(), Entry::new(Value::Zset(set)));
            debug!(key = %String::from_utf8_lossy(&key), "zadd: created sorted set");
        }
        Some(entry) => match &mut entry.value {
            Value::Zset(set) => {
                set.insert(score, name);
            }
            Value::Str(_) => return bad_type("sorted set"),
        },
    }

    Response::Int(1)
}

fn zset_of<'a>(ks: &'a Keyspace, key: &[u8]) -> Option<&'a SortedSet> {
    match ks.get(key) {
        Some(Entry {
            value: Value::Zset(set),
            ..
        }) => Some(set),
        _ => None,
    }
}

/// Absent key, wrong type, and absent pair all collapse to nil: the
/// caller asked for a score that does not exist.
fn do_zscore(ks: &Keyspace, key: &[u8], name: &[u8]) -> Response {
    match zset_of(ks, key).and_then(|set| set.score(name)) {
        Some(score) => Response::Str(Bytes::from(format!("{score:.6}"))),
        None => Response::Nil,
    }
}

fn do_zrem(ks: &mut Keyspace, key: &[u8], name: &[u8]) -> Response {
    match ks.get_mut(key) {
        None => Response::Int(0),
        Some(entry) => match &mut entry.value {
            Value::Zset(set) => Response::Int(i64::from(set.remove(name))),
            Value::Str(_) => bad_type("sorted set"),
        },
    }
}

fn do_zquery(
    ks: &Keyspace,
    key: &[u8],
    score: f64,
    name: &[u8],
    offset: u64,
    limit: u64,
) -> Response {
    match ks.get(key) {
        None => Response::Arr(Vec::new()),
        Some(entry) => match &entry.value {
            Value::Zset(set) => {
                let mut elements = Vec::new();
                for (score, pair_name) in set.range_from(score, name, offset, limit) {
                    elements.push(Response::Dbl(score));
                    elements.push(Response::Str(pair_name.clone()));
                }
                Response::Arr(elements)
            }
            Value::Str(_) => bad_type("sorted set"),
        },
    }
}

fn do_zrank(ks: &Keyspace, key: &[u8], name: &[u8]) -> Response {
    match zset_of(ks, key).and_then(|set| set.rank(name)) {
        Some(rank) => Response::Int(rank as i64),
        None => Response::Nil,
    }
}

fn do_expire(ks: &mut Keyspace, timers: &mut TimerManager, key: &Bytes, seconds: i64) -> Response {
    match ks.get_mut(key) {
        None => Response::Int(0),
        Some(entry) => {
            let deadline = time::expiry_after_secs(seconds);
            timers.arm_ttl(key, entry.expires_at_ms, deadline);
            entry.expires_at_ms = deadline;
            debug!(key = %String::from_utf8_lossy(key), seconds, "expire: set TTL");
            Response::Int(1)
        }
    }
}

fn do_ttl(ks: &Keyspace, key: &[u8]) -> Response {
    match ks.get(key) {
        None => Response::Int(-2),
        Some(entry) => match time::remaining_secs(entry.expires_at_ms) {
            None => Response::Int(-1),
            Some(secs) => Response::Int(secs as i64),
        },
    }
}

fn do_persist(ks: &mut Keyspace, timers: &mut TimerManager, key: &Bytes) -> Response {
    match ks.get_mut(key) {
        None => Response::Int(0),
        Some(entry) => {
            if !entry.has_expiry() {
                return Response::Int(0);
            }
            timers.cancel_ttl(key, entry.expires_at_ms);
            entry.expires_at_ms = NO_EXPIRY;
            debug!(key = %String::from_utf8_lossy(key), "persist: removed TTL");
            Response::Int(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_protocol::Request;

    struct Harness {
        ks: Keyspace,
        timers: TimerManager,
        pool: WorkerPool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ks: Keyspace::new(),
                timers: TimerManager::new(),
                pool: WorkerPool::new(1),
            }
        }

        /// Runs a command the way the connection does: parse, then
        /// execute, with parse errors mapped to error responses.
        fn run(&mut self, parts: &[&str]) -> Response {
            let request = Request::new(
                parts
                    .iter()
                    .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                    .collect(),
            );
            match Command::from_request(&request) {
                Ok(cmd) => execute(cmd, &mut self.ks, &mut self.timers, &self.pool),
                Err(err) => err.into(),
            }
        }
    }

    fn str_response(s: &str) -> Response {
        Response::Str(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn set_get_del_lifecycle() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["set", "name", "tyler"]), str_response("OK"));
        assert_eq!(h.run(&["get", "name"]), str_response("tyler"));
        assert_eq!(h.run(&["del", "name"]), Response::Int(1));
        assert_eq!(h.run(&["get", "name"]), Response::Nil);
        assert_eq!(h.run(&["del", "name"]), Response::Int(0));
    }

    #[test]
    fn set_overwrites_value() {
        let mut h = Harness::new();
        h.run(&["set", "k", "one"]);
        h.run(&["set", "k", "two"]);
        assert_eq!(h.run(&["get", "k"]), str_response("two"));
    }

    #[test]
    fn get_on_sorted_set_is_a_type_error() {
        let mut h = Harness::new();
        h.run(&["zadd", "s", "1", "a"]);
        assert_eq!(
            h.run(&["get", "s"]),
            Response::Err(ErrorCode::BadType, "value is not a string".into())
        );
    }

    #[test]
    fn keys_lists_everything() {
        let mut h = Harness::new();
        h.run(&["set", "a", "1"]);
        h.run(&["set", "b", "2"]);
        h.run(&["zadd", "c", "1", "x"]);

        match h.run(&["keys"]) {
            Response::Arr(items) => {
                let mut keys: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Response::Str(s) => String::from_utf8_lossy(s).into_owned(),
                        other => panic!("keys should be strings, got {other:?}"),
                    })
                    .collect();
                keys.sort();
                assert_eq!(keys, ["a", "b", "c"]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn zadd_upserts_and_zscore_formats() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["zadd", "myset", "10", "tyler"]), Response::Int(1));
        assert_eq!(h.run(&["zadd", "myset", "20", "tyler"]), Response::Int(1));
        assert_eq!(h.run(&["zscore", "myset", "tyler"]), str_response("20.000000"));
    }

    #[test]
    fn zadd_on_string_is_a_type_error() {
        let mut h = Harness::new();
        h.run(&["set", "k", "v"]);
        assert_eq!(
            h.run(&["zadd", "k", "1", "a"]),
            Response::Err(ErrorCode::BadType, "value is not a sorted set".into())
        );
    }

    #[test]
    fn zscore_collapses_every_absence_to_nil() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["zscore", "missing", "a"]), Response::Nil);

        h.run(&["set", "str", "v"]);
        assert_eq!(h.run(&["zscore", "str", "a"]), Response::Nil);

        h.run(&["zadd", "s", "1", "a"]);
        assert_eq!(h.run(&["zscore", "s", "b"]), Response::Nil);
    }

    #[test]
    fn zrem_semantics() {
        let mut h = Harness::new();
        h.run(&["zadd", "s", "1", "a"]);

        assert_eq!(h.run(&["zrem", "s", "a"]), Response::Int(1));
        assert_eq!(h.run(&["zrem", "s", "a"]), Response::Int(0));
        assert_eq!(h.run(&["zrem", "missing", "a"]), Response::Int(0));

        h.run(&["set", "str", "v"]);
        assert_eq!(
            h.run(&["zrem", "str", "a"]),
            Response::Err(ErrorCode::BadType, "value is not a sorted set".into())
        );
    }

    #[test]
    fn zrank_is_zero_based() {
        let mut h = Harness::new();
        h.run(&["zadd", "s", "0", "eve"]);
        h.run(&["zadd", "s", "10", "tyler"]);
        h.run(&["zadd", "s", "15", "won"]);

        assert_eq!(h.run(&["zrank", "s", "eve"]), Response::Int(0));
        assert_eq!(h.run(&["zrank", "s", "won"]), Response::Int(2));
        assert_eq!(h.run(&["zrank", "s", "ghost"]), Response::Nil);
        assert_eq!(h.run(&["zrank", "missing", "a"]), Response::Nil);
    }

    #[test]
    fn zquery_window() {
        let mut h = Harness::new();
        h.run(&["zadd", "s", "0", "eve"]);
        h.run(&["zadd", "s", "10", "tyler"]);
        h.run(&["zadd", "s", "15", "won"]);

        assert_eq!(
            h.run(&["zquery", "s", "5", "adam", "0", "0"]),
            Response::Arr(vec![
                Response::Dbl(10.0),
                str_response("tyler"),
                Response::Dbl(15.0),
                str_response("won"),
            ])
        );

        // limit caps the pair count
        assert_eq!(
            h.run(&["zquery", "s", "10", "tyler", "0", "1"]),
            Response::Arr(vec![Response::Dbl(10.0), str_response("tyler")])
        );

        // offset skips pairs
        assert_eq!(
            h.run(&["zquery", "s", "10", "tyler", "1", "0"]),
            Response::Arr(vec![Response::Dbl(15.0), str_response("won")])
        );

        // offset past the end yields an empty array
        assert_eq!(
            h.run(&["zquery", "s", "10", "tyler", "3", "0"]),
            Response::Arr(vec![])
        );
    }

    #[test]
    fn zquery_absent_key_is_empty_not_nil() {
        let mut h = Harness::new();
        assert_eq!(
            h.run(&["zquery", "missing", "0", "", "0", "0"]),
            Response::Arr(vec![])
        );
    }

    #[test]
    fn zquery_wrong_type_and_bad_args() {
        let mut h = Harness::new();
        h.run(&["set", "k", "v"]);
        assert_eq!(
            h.run(&["zquery", "k", "0", "", "0", "0"]),
            Response::Err(ErrorCode::BadType, "value is not a sorted set".into())
        );
        assert_eq!(
            h.run(&["zquery", "k", "zero", "", "0", "0"]),
            Response::Err(ErrorCode::InvalidArg, "invalid score argument".into())
        );
    }

    #[test]
    fn expire_ttl_persist_lifecycle() {
        let mut h = Harness::new();
        h.run(&["set", "x", "foo"]);

        assert_eq!(h.run(&["expire", "x", "10"]), Response::Int(1));
        match h.run(&["ttl", "x"]) {
            Response::Int(secs) => assert!((9..=10).contains(&secs), "ttl was {secs}"),
            other => panic!("expected integer, got {other:?}"),
        }

        assert_eq!(h.run(&["persist", "x"]), Response::Int(1));
        assert_eq!(h.run(&["ttl", "x"]), Response::Int(-1));
        assert_eq!(h.run(&["persist", "x"]), Response::Int(0));
    }

    #[test]
    fn ttl_distinguishes_missing_from_persistent() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["ttl", "missing"]), Response::Int(-2));
        h.run(&["set", "k", "v"]);
        assert_eq!(h.run(&["ttl", "k"]), Response::Int(-1));
    }

    #[test]
    fn expire_missing_key() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["expire", "missing", "10"]), Response::Int(0));
        assert_eq!(
            h.run(&["expire", "missing", "soon"]),
            Response::Err(ErrorCode::InvalidArg, "invalid seconds argument".into())
        );
    }

    #[test]
    fn set_clears_ttl() {
        let mut h = Harness::new();
        h.run(&["set", "x", "foo"]);
        h.run(&["expire", "x", "10"]);
        h.run(&["set", "x", "bar"]);
        assert_eq!(h.run(&["ttl", "x"]), Response::Int(-1));
        // and the timer index agrees: nothing left to expire
        assert_eq!(h.timers.pop_expired_ttl(u64::MAX), Vec::<Bytes>::new());
    }

    #[test]
    fn del_clears_ttl_timer() {
        let mut h = Harness::new();
        h.run(&["set", "x", "foo"]);
        h.run(&["expire", "x", "100"]);
        h.run(&["del", "x"]);
        assert_eq!(h.timers.pop_expired_ttl(u64::MAX), Vec::<Bytes>::new());
    }

    #[test]
    fn rearming_expire_keeps_one_timer_record() {
        let mut h = Harness::new();
        h.run(&["set", "x", "foo"]);
        h.run(&["expire", "x", "10"]);
        h.run(&["expire", "x", "100"]);
        assert_eq!(h.timers.pop_expired_ttl(u64::MAX).len(), 1);
    }

    #[test]
    fn set_reshapes_a_sorted_set_into_a_string() {
        let mut h = Harness::new();
        h.run(&["zadd", "s", "10", "tyler"]);
        assert_eq!(h.run(&["set", "s", "hi"]), str_response("OK"));
        assert_eq!(
            h.run(&["zrem", "s", "tyler"]),
            Response::Err(ErrorCode::BadType, "value is not a sorted set".into())
        );
        assert_eq!(h.run(&["get", "s"]), str_response("hi"));
    }

    #[test]
    fn del_and_zadd_rebirth_changes_type() {
        let mut h = Harness::new();
        h.run(&["set", "k", "v"]);
        h.run(&["del", "k"]);
        assert_eq!(h.run(&["zadd", "k", "1", "a"]), Response::Int(1));
        assert_eq!(h.run(&["zrank", "k", "a"]), Response::Int(0));
    }

    #[test]
    fn unknown_command_response() {
        let mut h = Harness::new();
        assert_eq!(
            h.run(&["foo", "bar", "baz"]),
            Response::Err(ErrorCode::Unknown, "unknown command".into())
        );
    }

    #[test]
    fn large_zset_delete_goes_through_the_pool() {
        let mut h = Harness::new();
        for i in 0..cinder_core::LARGE_ZSET_SIZE {
            h.run(&["zadd", "big", &format!("{i}"), &format!("name{i}")]);
        }
        assert_eq!(h.run(&["del", "big"]), Response::Int(1));
        assert_eq!(h.run(&["get", "big"]), Response::Nil);
    }
}
