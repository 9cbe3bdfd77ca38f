//! Command dispatch: binds the stores, the blocking coordinator, the
//! pub/sub registry, the transaction buffer and the replication log
//! together into the one table §6 names.
//!
//! `rredis`'s `src/cmd.rs` is the closest teacher shape: a static table
//! mapping a command name to a handler plus its arity and flags
//! (`CmdFlags::{INLINE, BULK, DENY_OOM}`). This module keeps the same
//! "one function per command, arity checked up front" discipline but as a
//! single `match` over the uppercased name rather than a `Lazy<HashMap>` of
//! function pointers — the command set here is fixed at compile time and
//! small enough that a match reads as clearly as a table while letting each
//! arm borrow `shared`/`session` with ordinary lifetimes instead of `Arc`
//! indirection through a registered `RedisCommand` struct.

use crate::blocking::BlockingCoordinator;
use crate::error::RedisError;
use crate::pubsub::PubSubRegistry;
use crate::replication::ReplicationLog;
use crate::resp::{Argv, Reply};
use crate::session::{ClientId, ClientRegistry, Mode, Session};
use crate::store::stream::{parse_id_spec, parse_range_bound, IdSpec, StreamEntry, StreamId};
use crate::store::{Database, KeyType};
use crate::transaction::TransactionBuffer;
use crate::util::now_ms;
use std::future::Future;

pub struct Shared {
    pub db: Database,
    pub blocking: BlockingCoordinator,
    pub pubsub: PubSubRegistry,
    pub replication: ReplicationLog,
    pub clients: ClientRegistry,
    pub is_replica: bool,
}

impl Shared {
    pub fn new(is_replica: bool) -> Self {
        Shared {
            db: Database::new(),
            blocking: BlockingCoordinator::new(),
            pubsub: PubSubRegistry::new(),
            replication: ReplicationLog::new(),
            clients: ClientRegistry::new(),
            is_replica,
        }
    }

    fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let clients = &self.clients;
        self.pubsub.publish(&|id| clients.get(id), channel, message)
    }
}

pub struct CommandOutcome {
    pub replies: Vec<Reply>,
    pub close: bool,
}

impl CommandOutcome {
    fn one(reply: Reply) -> Self {
        CommandOutcome { replies: vec![reply], close: false }
    }

    fn closing(reply: Reply) -> Self {
        CommandOutcome { replies: vec![reply], close: true }
    }
}

impl From<RedisError> for CommandOutcome {
    fn from(e: RedisError) -> Self {
        CommandOutcome::one(e.into())
    }
}

const ALLOWED_WHEN_SUBSCRIBED: &[&str] =
    &["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE", "PING", "QUIT", "RESET"];

/// Commands that mutate a store and must be captured to the replication
/// log, per §4.9. `PUBLISH` is included so replicas can re-fan-out to their
/// own subscribers.
const CAPTURING_COMMANDS: &[&str] =
    &["SET", "DEL", "INCR", "RPUSH", "LPUSH", "LPOP", "ZADD", "ZREM", "XADD", "PUBLISH"];

fn command_name(argv: &Argv) -> String {
    String::from_utf8_lossy(&argv[0]).to_ascii_uppercase()
}

/// Entry point for one client-supplied command. Handles mode gating and the
/// transaction meta-commands (`MULTI`/`EXEC`/`DISCARD`/`WATCH`); everything
/// else is delegated to [`execute_single`].
pub async fn dispatch<C>(
    shared: &Shared,
    client: ClientId,
    session: &mut Session,
    tx_buffer: &mut TransactionBuffer,
    argv: Argv,
    cancel: C,
) -> CommandOutcome
where
    C: Future<Output = ()>,
{
    if argv.is_empty() {
        return RedisError::Custom("ERR empty command".into()).into();
    }
    let name = command_name(&argv);

    if session.mode == Mode::Subscribed && !ALLOWED_WHEN_SUBSCRIBED.contains(&name.as_str()) {
        return RedisError::SubscribedContextOnly(name).into();
    }

    match name.as_str() {
        "MULTI" => {
            if session.mode == Mode::InMulti {
                return RedisError::NestedMulti.into();
            }
            tx_buffer.clear();
            session.enter_multi();
            CommandOutcome::one(Reply::ok())
        }
        "DISCARD" => {
            if session.mode != Mode::InMulti {
                return RedisError::DiscardWithoutMulti.into();
            }
            tx_buffer.clear();
            session.leave_multi();
            CommandOutcome::one(Reply::ok())
        }
        "EXEC" => {
            if session.mode != Mode::InMulti {
                return RedisError::ExecWithoutMulti.into();
            }
            session.leave_multi();
            let queued = tx_buffer.take();
            let mut replies = Vec::with_capacity(queued.len());
            for queued_argv in queued {
                let queued_name = command_name(&queued_argv);
                let outcome =
                    execute_single(shared, client, session, &queued_name, queued_argv, true, std::future::pending())
                        .await;
                replies.extend(outcome.replies);
            }
            CommandOutcome::one(Reply::Array(replies))
        }
        "WATCH" => CommandOutcome::one(Reply::ok()),
        _ if session.mode == Mode::InMulti => match validate_arity(&name, argv.len()) {
            Ok(()) => {
                tx_buffer.queue(argv);
                CommandOutcome::one(Reply::Simple("QUEUED".into()))
            }
            Err(e) => e.into(),
        },
        _ => execute_single(shared, client, session, &name, argv, false, cancel).await,
    }
}

/// Arity bounds for every recognized command, `(min_argc, max_argc)`;
/// `None` for max means unbounded. Shared between queue-time validation
/// (inside `MULTI`) and ordinary dispatch so both paths reject the same
/// malformed calls.
fn validate_arity(name: &str, argc: usize) -> Result<(), RedisError> {
    let (min, max): (usize, Option<usize>) = match name {
        "PING" => (1, Some(2)),
        "ECHO" => (2, Some(2)),
        "QUIT" | "RESET" => (1, Some(1)),
        "SET" => (3, Some(5)),
        "GET" | "TYPE" | "INCR" | "LLEN" => (2, Some(2)),
        "DEL" | "EXISTS" => (2, None),
        "KEYS" => (2, Some(2)),
        "RPUSH" | "LPUSH" => (3, None),
        "LPOP" => (2, Some(3)),
        "LRANGE" => (4, Some(4)),
        "BLPOP" => (3, None),
        "ZADD" => (4, None),
        "ZRANK" | "ZSCORE" | "ZREM" => (3, Some(3)),
        "ZCARD" => (2, Some(2)),
        "ZRANGE" => (4, Some(4)),
        "XADD" => (5, None),
        "XRANGE" => (4, Some(4)),
        "XREAD" => (4, None),
        "SUBSCRIBE" | "PSUBSCRIBE" | "PUBLISH" => (2, None),
        "UNSUBSCRIBE" | "PUNSUBSCRIBE" => (1, None),
        "MULTI" | "DISCARD" | "EXEC" | "WATCH" => (1, Some(1)),
        "REPLCONF" => (1, None),
        "PSYNC" => (3, Some(3)),
        "INFO" => (1, Some(2)),
        _ => return Err(RedisError::UnknownCommand(name.to_string())),
    };
    if argc < min || max.is_some_and(|max| argc > max) {
        return Err(RedisError::WrongArity(name.to_ascii_lowercase()));
    }
    Ok(())
}

async fn execute_single<C>(
    shared: &Shared,
    client: ClientId,
    session: &mut Session,
    name: &str,
    argv: Argv,
    non_blocking: bool,
    cancel: C,
) -> CommandOutcome
where
    C: Future<Output = ()>,
{
    if let Err(e) = validate_arity(name, argv.len()) {
        return e.into();
    }
    if shared.is_replica && CAPTURING_COMMANDS.contains(&name) && !matches!(session.mode, Mode::ReplicaLink) {
        return RedisError::ReadOnlyReplica.into();
    }

    let now = now_ms();
    let outcome = match name {
        "PING" => {
            if session.mode == Mode::Subscribed {
                CommandOutcome::one(Reply::Array(vec![Reply::bulk("pong"), Reply::bulk("")]))
            } else if argv.len() == 2 {
                CommandOutcome::one(Reply::Bulk(argv[1].clone()))
            } else {
                CommandOutcome::one(Reply::Simple("PONG".into()))
            }
        }
        "ECHO" => CommandOutcome::one(Reply::Bulk(argv[1].clone())),
        "QUIT" => CommandOutcome::closing(Reply::ok()),
        "RESET" => {
            session.mode = Mode::Normal;
            shared.pubsub.drop_client(client);
            CommandOutcome::one(Reply::Simple("RESET".into()))
        }
        "SET" => cmd_set(shared, &argv, now),
        "GET" => match check_type(shared, &argv[1], now, KeyType::String) {
            Ok(()) => {
                let v = shared.db.kv.get(&argv[1], now);
                CommandOutcome::one(v.map(Reply::Bulk).unwrap_or(Reply::NullBulk))
            }
            Err(e) => e.into(),
        },
        "DEL" => cmd_del(shared, &argv, now),
        "EXISTS" => {
            let count = argv[1..].iter().filter(|k| key_exists(shared, k, now)).count();
            CommandOutcome::one(Reply::Integer(count as i64))
        }
        "TYPE" => {
            let ty = shared.db.type_of(&argv[1], now);
            CommandOutcome::one(Reply::Simple(ty.map(KeyType::as_str).unwrap_or("none").to_string()))
        }
        "KEYS" => {
            let keys = shared.db.keys_matching(&argv[1], now);
            CommandOutcome::one(Reply::Array(keys.into_iter().map(Reply::Bulk).collect()))
        }
        "INCR" => match check_type(shared, &argv[1], now, KeyType::String) {
            Ok(()) => match shared.db.kv.incr(&argv[1], now) {
                Ok(n) => {
                    shared.replication.capture(argv.clone());
                    CommandOutcome::one(Reply::Integer(n))
                }
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        },
        "RPUSH" => match check_type(shared, &argv[1], now, KeyType::List) {
            Ok(()) => {
                let len = shared.db.lists.rpush(&argv[1], argv[2..].iter().cloned());
                shared.replication.capture(argv.clone());
                shared.blocking.notify_list_key(&shared.db.lists, &argv[1]);
                CommandOutcome::one(Reply::Integer(len as i64))
            }
            Err(e) => e.into(),
        },
        "LPUSH" => match check_type(shared, &argv[1], now, KeyType::List) {
            Ok(()) => {
                let len = shared.db.lists.lpush(&argv[1], argv[2..].iter().cloned());
                shared.replication.capture(argv.clone());
                shared.blocking.notify_list_key(&shared.db.lists, &argv[1]);
                CommandOutcome::one(Reply::Integer(len as i64))
            }
            Err(e) => e.into(),
        },
        "LPOP" => match check_type(shared, &argv[1], now, KeyType::List) {
            Ok(()) => cmd_lpop(shared, &argv),
            Err(e) => e.into(),
        },
        "LLEN" => match check_type(shared, &argv[1], now, KeyType::List) {
            Ok(()) => CommandOutcome::one(Reply::Integer(shared.db.lists.llen(&argv[1]) as i64)),
            Err(e) => e.into(),
        },
        "LRANGE" => match check_type(shared, &argv[1], now, KeyType::List) {
            Ok(()) => match (parse_i64(&argv[2]), parse_i64(&argv[3])) {
                (Ok(start), Ok(stop)) => {
                    let items = shared.db.lists.lrange(&argv[1], start, stop);
                    CommandOutcome::one(Reply::Array(items.into_iter().map(Reply::Bulk).collect()))
                }
                _ => RedisError::NotAnInteger.into(),
            },
            Err(e) => e.into(),
        },
        "BLPOP" => match check_keys_type(shared, &argv[1..argv.len() - 1], now, KeyType::List) {
            Ok(()) => cmd_blpop(shared, &argv, non_blocking, cancel).await,
            Err(e) => e.into(),
        },
        "ZADD" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => cmd_zadd(shared, &argv),
            Err(e) => e.into(),
        },
        "ZRANK" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => {
                let rank = shared.db.zsets.zrank(&argv[1], &argv[2]);
                CommandOutcome::one(rank.map(|r| Reply::Integer(r as i64)).unwrap_or(Reply::NullBulk))
            }
            Err(e) => e.into(),
        },
        "ZSCORE" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => {
                let score = shared.db.zsets.zscore(&argv[1], &argv[2]);
                CommandOutcome::one(
                    score.map(|s| Reply::Bulk(format_score(s).into_bytes())).unwrap_or(Reply::NullBulk),
                )
            }
            Err(e) => e.into(),
        },
        "ZREM" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => {
                let removed = shared.db.zsets.zrem(&argv[1], &argv[2]);
                if removed {
                    shared.replication.capture(argv.clone());
                }
                CommandOutcome::one(Reply::Integer(removed as i64))
            }
            Err(e) => e.into(),
        },
        "ZCARD" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => CommandOutcome::one(Reply::Integer(shared.db.zsets.zcard(&argv[1]) as i64)),
            Err(e) => e.into(),
        },
        "ZRANGE" => match check_type(shared, &argv[1], now, KeyType::ZSet) {
            Ok(()) => match (parse_i64(&argv[2]), parse_i64(&argv[3])) {
                (Ok(start), Ok(stop)) => {
                    let items = shared.db.zsets.zrange(&argv[1], start, stop);
                    CommandOutcome::one(Reply::Array(items.into_iter().map(|(m, _)| Reply::Bulk(m)).collect()))
                }
                _ => RedisError::NotAnInteger.into(),
            },
            Err(e) => e.into(),
        },
        "XADD" => match check_type(shared, &argv[1], now, KeyType::Stream) {
            Ok(()) => cmd_xadd(shared, &argv, now),
            Err(e) => e.into(),
        },
        "XRANGE" => match check_type(shared, &argv[1], now, KeyType::Stream) {
            Ok(()) => cmd_xrange(shared, &argv),
            Err(e) => e.into(),
        },
        "XREAD" => cmd_xread(shared, &argv, now, non_blocking, cancel).await,
        "SUBSCRIBE" => cmd_subscribe(shared, client, session, &argv, "subscribe"),
        "PSUBSCRIBE" => cmd_subscribe(shared, client, session, &argv, "psubscribe"),
        "UNSUBSCRIBE" => cmd_unsubscribe(shared, client, session, &argv, "unsubscribe"),
        "PUNSUBSCRIBE" => cmd_unsubscribe(shared, client, session, &argv, "punsubscribe"),
        "PUBLISH" => {
            let count = shared.publish(&argv[1], &argv[2]);
            shared.replication.capture(argv.clone());
            CommandOutcome::one(Reply::Integer(count as i64))
        }
        "REPLCONF" => CommandOutcome::one(Reply::ok()),
        "PSYNC" => {
            session.enter_replica_link();
            if let Some(outbox) = shared.clients.get(client) {
                shared.replication.attach(client, outbox);
            }
            CommandOutcome::one(Reply::Simple("FULLRESYNC 0000000000000000000000000000000000000000 0".into()))
        }
        "INFO" => {
            let role = if shared.is_replica { "slave" } else { "master" };
            CommandOutcome::one(Reply::Bulk(format!("# Replication\r\nrole:{role}\r\n").into_bytes()))
        }
        _ => RedisError::UnknownCommand(name.to_string()).into(),
    };
    outcome
}

fn key_exists(shared: &Shared, key: &[u8], now: u64) -> bool {
    shared.db.kv.contains(key, now)
        || shared.db.lists.exists(key)
        || shared.db.zsets.exists(key)
        || shared.db.streams.exists(key)
}

/// Rejects an operation against a key already holding a different type, per
/// §4.2/§7's `WRONGTYPE` contract. A missing key is never a type mismatch —
/// callers create it fresh in the expected type.
fn check_type(shared: &Shared, key: &[u8], now: u64, expected: KeyType) -> Result<(), RedisError> {
    match shared.db.type_of(key, now) {
        Some(actual) if actual != expected => Err(RedisError::WrongType),
        _ => Ok(()),
    }
}

/// Same as [`check_type`] but for the multi-key commands (`BLPOP`,
/// `XREAD ... STREAMS key...`) that must reject before registering a wait
/// on any of them.
fn check_keys_type(shared: &Shared, keys: &[Vec<u8>], now: u64, expected: KeyType) -> Result<(), RedisError> {
    for key in keys {
        check_type(shared, key, now, expected)?;
    }
    Ok(())
}

fn parse_i64(b: &[u8]) -> Result<i64, RedisError> {
    std::str::from_utf8(b).ok().and_then(|s| s.parse::<i64>().ok()).ok_or(RedisError::NotAnInteger)
}

fn parse_u64(b: &[u8]) -> Result<u64, RedisError> {
    std::str::from_utf8(b).ok().and_then(|s| s.parse::<u64>().ok()).ok_or(RedisError::NotAnInteger)
}

fn parse_f64(b: &[u8]) -> Result<f64, RedisError> {
    std::str::from_utf8(b).ok().and_then(|s| s.parse::<f64>().ok()).ok_or(RedisError::NotAFloat)
}

/// Matches real Redis's score formatting: whole numbers print without a
/// trailing `.0`.
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.is_finite() {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn cmd_set(shared: &Shared, argv: &Argv, now: u64) -> CommandOutcome {
    let expire_in_ms = match argv.len() {
        3 => None,
        5 => {
            if !argv[3].eq_ignore_ascii_case(b"PX") {
                return RedisError::Syntax.into();
            }
            match parse_u64(&argv[4]) {
                Ok(ms) => Some(ms),
                Err(e) => return e.into(),
            }
        }
        _ => return RedisError::Syntax.into(),
    };
    shared.db.kv.set(argv[1].clone(), argv[2].clone(), expire_in_ms, now);
    shared.db.clear_non_string(&argv[1]);
    shared.replication.capture(argv.clone());
    CommandOutcome::one(Reply::ok())
}

fn cmd_del(shared: &Shared, argv: &Argv, now: u64) -> CommandOutcome {
    let count = argv[1..].iter().filter(|k| shared.db.del_one(k, now)).count();
    if count > 0 {
        shared.replication.capture(argv.clone());
    }
    CommandOutcome::one(Reply::Integer(count as i64))
}

fn cmd_lpop(shared: &Shared, argv: &Argv) -> CommandOutcome {
    let count = match argv.len() {
        2 => None,
        3 => match parse_u64(&argv[2]) {
            Ok(n) => Some(n as usize),
            Err(e) => return e.into(),
        },
        _ => unreachable!("arity already validated"),
    };
    match count {
        None => match shared.db.lists.lpop(&argv[1], 1) {
            Some(mut v) if !v.is_empty() => {
                shared.replication.capture(argv.clone());
                CommandOutcome::one(Reply::Bulk(v.remove(0)))
            }
            _ => CommandOutcome::one(Reply::NullBulk),
        },
        Some(n) => match shared.db.lists.lpop(&argv[1], n) {
            Some(items) => {
                if !items.is_empty() {
                    shared.replication.capture(argv.clone());
                }
                CommandOutcome::one(Reply::Array(items.into_iter().map(Reply::Bulk).collect()))
            }
            None => CommandOutcome::one(Reply::NullArray),
        },
    }
}

async fn cmd_blpop<C>(shared: &Shared, argv: &Argv, non_blocking: bool, cancel: C) -> CommandOutcome
where
    C: Future<Output = ()>,
{
    let keys: Vec<Vec<u8>> = argv[1..argv.len() - 1].to_vec();
    let timeout_secs = match parse_f64(&argv[argv.len() - 1]) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    let timeout_ms = if non_blocking {
        None
    } else {
        Some((timeout_secs * 1000.0) as u64)
    };
    match shared.blocking.blpop(&shared.db.lists, &keys, timeout_ms, cancel).await {
        Some((key, value)) => {
            shared.replication.capture(vec![b"LPOP".to_vec(), key.clone()]);
            CommandOutcome::one(Reply::Array(vec![Reply::Bulk(key), Reply::Bulk(value)]))
        }
        None => CommandOutcome::one(Reply::NullArray),
    }
}

fn cmd_zadd(shared: &Shared, argv: &Argv) -> CommandOutcome {
    if (argv.len() - 2) % 2 != 0 {
        return RedisError::Syntax.into();
    }
    let mut added = 0;
    let mut pairs = argv[2..].chunks_exact(2);
    for pair in &mut pairs {
        let score = match parse_f64(&pair[0]) {
            Ok(s) => s,
            Err(e) => return e.into(),
        };
        if shared.db.zsets.zadd(&argv[1], score, pair[1].clone()) {
            added += 1;
        }
    }
    shared.replication.capture(argv.clone());
    CommandOutcome::one(Reply::Integer(added))
}

fn cmd_xadd(shared: &Shared, argv: &Argv, now: u64) -> CommandOutcome {
    let id_spec = match parse_id_spec(&argv[2]) {
        Ok(s) => s,
        Err(e) => return e.into(),
    };
    let rest = &argv[3..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return RedisError::Syntax.into();
    }
    let fields: Vec<(Vec<u8>, Vec<u8>)> = rest.chunks_exact(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    match shared.db.streams.xadd(&argv[1], id_spec, fields.clone(), now) {
        Ok(id) => {
            let mut resolved = vec![b"XADD".to_vec(), argv[1].clone(), id.to_string().into_bytes()];
            for (f, v) in fields {
                resolved.push(f);
                resolved.push(v);
            }
            shared.replication.capture(resolved);
            shared.blocking.notify_stream_key(&shared.db.streams, &argv[1]);
            CommandOutcome::one(Reply::Bulk(id.to_string().into_bytes()))
        }
        Err(e) => e.into(),
    }
}

fn cmd_xrange(shared: &Shared, argv: &Argv) -> CommandOutcome {
    let from = match parse_range_bound(&argv[2], true) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };
    let to = match parse_range_bound(&argv[3], false) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };
    let entries = shared.db.streams.xrange(&argv[1], from, to);
    CommandOutcome::one(Reply::Array(entries.into_iter().map(encode_stream_entry).collect()))
}

fn encode_stream_entry(entry: StreamEntry) -> Reply {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (f, v) in entry.fields {
        fields.push(Reply::Bulk(f));
        fields.push(Reply::Bulk(v));
    }
    Reply::Array(vec![Reply::Bulk(entry.id.to_string().into_bytes()), Reply::Array(fields)])
}

/// Parses `XREAD [BLOCK ms] STREAMS key [key ...] id [id ...]`.
fn parse_xread_args(argv: &Argv) -> Result<(Option<u64>, Vec<Vec<u8>>), RedisError> {
    let mut i = 1;
    let mut block_ms = None;
    if argv[i].eq_ignore_ascii_case(b"BLOCK") {
        block_ms = Some(parse_u64(&argv[i + 1])?);
        i += 2;
    }
    if !argv.get(i).is_some_and(|t| t.eq_ignore_ascii_case(b"STREAMS")) {
        return Err(RedisError::Syntax);
    }
    i += 1;
    let remaining = &argv[i..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(RedisError::Syntax);
    }
    Ok((block_ms, remaining.to_vec()))
}

async fn cmd_xread<C>(shared: &Shared, argv: &Argv, now: u64, non_blocking: bool, cancel: C) -> CommandOutcome
where
    C: Future<Output = ()>,
{
    let (block_ms, tokens) = match parse_xread_args(argv) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let n = tokens.len() / 2;
    let keys = &tokens[..n];
    let ids = &tokens[n..];

    if let Err(e) = check_keys_type(shared, keys, now, KeyType::Stream) {
        return e.into();
    }

    let mut last_seen = Vec::with_capacity(n);
    for (key, id_token) in keys.iter().zip(ids.iter()) {
        let after = if id_token.as_slice() == b"$" {
            shared.db.streams.last_id(key)
        } else {
            match parse_stream_id(id_token) {
                Ok(id) => id,
                Err(e) => return e.into(),
            }
        };
        last_seen.push((key.clone(), after));
    }

    let timeout_ms = if non_blocking { None } else { block_ms };
    let result = shared.blocking.xread_block(&shared.db.streams, &last_seen, timeout_ms, cancel).await;
    match result {
        Some(per_stream) => CommandOutcome::one(Reply::Array(
            per_stream
                .into_iter()
                .map(|(key, entries)| {
                    Reply::Array(vec![
                        Reply::Bulk(key),
                        Reply::Array(entries.into_iter().map(encode_stream_entry).collect()),
                    ])
                })
                .collect(),
        )),
        None => CommandOutcome::one(Reply::NullArray),
    }
}

fn parse_stream_id(spec: &[u8]) -> Result<StreamId, RedisError> {
    let spec = std::str::from_utf8(spec).map_err(|_| RedisError::Syntax)?;
    let (ms, seq) = spec.split_once('-').unwrap_or((spec, "0"));
    Ok(StreamId {
        ms: ms.parse().map_err(|_| RedisError::Syntax)?,
        seq: seq.parse().map_err(|_| RedisError::Syntax)?,
    })
}

fn cmd_subscribe(shared: &Shared, client: ClientId, session: &mut Session, argv: &Argv, verb: &str) -> CommandOutcome {
    session.enter_subscribed();
    let replies = argv[1..]
        .iter()
        .map(|channel| {
            let count = shared.pubsub.subscribe(client, channel);
            Reply::Array(vec![Reply::bulk(verb), Reply::Bulk(channel.clone()), Reply::Integer(count as i64)])
        })
        .collect();
    CommandOutcome { replies, close: false }
}

fn cmd_unsubscribe(
    shared: &Shared,
    client: ClientId,
    session: &mut Session,
    argv: &Argv,
    verb: &str,
) -> CommandOutcome {
    let channels: Vec<Vec<u8>> = if argv.len() > 1 {
        argv[1..].to_vec()
    } else {
        shared.pubsub.subscribed_channels(client)
    };
    if channels.is_empty() {
        session.leave_subscribed_if_empty(0);
        return CommandOutcome::one(Reply::Array(vec![Reply::bulk(verb), Reply::NullBulk, Reply::Integer(0)]));
    }
    let mut replies = Vec::with_capacity(channels.len());
    let mut remaining = 0;
    for channel in channels {
        remaining = shared.pubsub.unsubscribe(client, &channel);
        replies.push(Reply::Array(vec![Reply::bulk(verb), Reply::Bulk(channel), Reply::Integer(remaining as i64)]));
    }
    session.leave_subscribed_if_empty(remaining);
    CommandOutcome { replies, close: false }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Argv {
        parts.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    async fn run(
        shared: &Shared,
        client: ClientId,
        session: &mut Session,
        tx: &mut TransactionBuffer,
        parts: &[&str],
    ) -> CommandOutcome {
        dispatch(shared, client, session, tx, argv(parts), std::future::pending()).await
    }

    #[tokio::test]
    async fn set_get_round_trip() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        let out = run(&shared, client, &mut session, &mut tx, &["SET", "k", "v"]).await;
        assert_eq!(out.replies[0], Reply::ok());
        let out = run(&shared, client, &mut session, &mut tx, &["GET", "k"]).await;
        assert_eq!(out.replies[0], Reply::Bulk(b"v".to_vec()));
    }

    #[tokio::test]
    async fn unknown_command_errors() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        let out = run(&shared, client, &mut session, &mut tx, &["FROB", "x"]).await;
        assert_eq!(out.replies[0], Reply::Error("ERR Unknown command 'FROB'".into()));
    }

    #[tokio::test]
    async fn wrong_arity_errors() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        let out = run(&shared, client, &mut session, &mut tx, &["GET"]).await;
        assert_eq!(out.replies[0], Reply::Error("ERR wrong number of arguments for 'get' command".into()));
    }

    #[tokio::test]
    async fn multi_queues_then_exec_runs_in_order() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["MULTI"]).await;
        let queued = run(&shared, client, &mut session, &mut tx, &["SET", "a", "1"]).await;
        assert_eq!(queued.replies[0], Reply::Simple("QUEUED".into()));
        let exec = run(&shared, client, &mut session, &mut tx, &["EXEC"]).await;
        match &exec.replies[0] {
            Reply::Array(items) => assert_eq!(items.len(), 1),
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(session.mode, Mode::Normal);
    }

    #[tokio::test]
    async fn nested_multi_errors() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["MULTI"]).await;
        let out = run(&shared, client, &mut session, &mut tx, &["MULTI"]).await;
        assert_eq!(out.replies[0], Reply::Error("ERR MULTI calls can not be nested".into()));
    }

    #[tokio::test]
    async fn blpop_inside_exec_never_blocks() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["MULTI"]).await;
        run(&shared, client, &mut session, &mut tx, &["BLPOP", "missing", "0"]).await;
        let exec = run(&shared, client, &mut session, &mut tx, &["EXEC"]).await;
        match &exec.replies[0] {
            Reply::Array(items) => assert_eq!(items[0], Reply::NullArray),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replica_mode_rejects_writes() {
        let shared = Shared::new(true);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        let out = run(&shared, client, &mut session, &mut tx, &["SET", "k", "v"]).await;
        assert_eq!(out.replies[0], Reply::Error("READONLY You can't write against a read only replica.".into()));
    }

    #[tokio::test]
    async fn publish_counts_recipients() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        let out = run(&shared, client, &mut session, &mut tx, &["PUBLISH", "ch", "hi"]).await;
        assert_eq!(out.replies[0], Reply::Integer(0));
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers() {
        let shared = Shared::new(false);
        let subscriber = ClientId::next();
        let (outbox, mut rx) = crate::session::Outbox::new();
        shared.clients.register(subscriber, outbox);
        let mut sub_session = Session::new(subscriber);
        let mut sub_tx = TransactionBuffer::new();
        run(&shared, subscriber, &mut sub_session, &mut sub_tx, &["SUBSCRIBE", "ch"]).await;
        assert_eq!(sub_session.mode, Mode::Subscribed);

        let publisher = ClientId::next();
        let mut pub_session = Session::new(publisher);
        let mut pub_tx = TransactionBuffer::new();
        let out = run(&shared, publisher, &mut pub_session, &mut pub_tx, &["PUBLISH", "ch", "hi"]).await;
        assert_eq!(out.replies[0], Reply::Integer(1));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn rpush_on_string_key_is_wrongtype() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["SET", "k", "v"]).await;
        let out = run(&shared, client, &mut session, &mut tx, &["RPUSH", "k", "x"]).await;
        assert_eq!(
            out.replies[0],
            Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
        );
    }

    #[tokio::test]
    async fn get_on_list_key_is_wrongtype() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["RPUSH", "k", "x"]).await;
        let out = run(&shared, client, &mut session, &mut tx, &["GET", "k"]).await;
        assert_eq!(
            out.replies[0],
            Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
        );
    }

    #[tokio::test]
    async fn blpop_on_string_key_is_wrongtype_and_does_not_block() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["SET", "k", "v"]).await;
        let out = run(&shared, client, &mut session, &mut tx, &["BLPOP", "k", "0"]).await;
        assert_eq!(
            out.replies[0],
            Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
        );
    }

    #[tokio::test]
    async fn set_overwrites_a_list_key_and_clears_its_list_contents() {
        let shared = Shared::new(false);
        let client = ClientId::next();
        let mut session = Session::new(client);
        let mut tx = TransactionBuffer::new();
        run(&shared, client, &mut session, &mut tx, &["RPUSH", "k", "a", "b"]).await;
        run(&shared, client, &mut session, &mut tx, &["SET", "k", "v"]).await;

        let get = run(&shared, client, &mut session, &mut tx, &["GET", "k"]).await;
        assert_eq!(get.replies[0], Reply::Bulk(b"v".to_vec()));

        // The list entry must be gone too, or a later RPUSH would silently
        // resurrect stale elements underneath the new string key.
        let push = run(&shared, client, &mut session, &mut tx, &["RPUSH", "k2", "x"]).await;
        assert_eq!(push.replies[0], Reply::Integer(1));
        assert!(!shared.db.lists.exists(b"k"));
    }
}
