//! Generic keyspace commands.

use std::cmp::Ordering;
use std::collections::VecDeque;

use ordered_float::OrderedFloat;

use super::args::{cursor, int, is, scan_options};
use super::connection::db_index;
use super::{CommandSpec, Ctx};
use crate::dump;
use crate::error::{
    CommandError, INVALID_SORT_FLOAT, NO_KEY, RESTORE_INVALID_TTL, RESTORE_KEY_EXISTS,
    SRC_DST_SAME,
};
use crate::glob::glob_match;
use crate::reply::Reply;
use crate::storage::{Database, Value};

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("del", 1, 1, del).all_keys());
    specs.push(CommandSpec::sync("unlink", 1, 1, del).all_keys());
    specs.push(CommandSpec::sync("exists", 1, 1, exists).all_keys());
    specs.push(CommandSpec::sync("expire", 2, 0, expire).key());
    specs.push(CommandSpec::sync("pexpire", 2, 0, pexpire).key());
    specs.push(CommandSpec::sync("expireat", 2, 0, expireat).key());
    specs.push(CommandSpec::sync("pexpireat", 2, 0, pexpireat).key());
    specs.push(CommandSpec::sync("ttl", 1, 0, ttl).key());
    specs.push(CommandSpec::sync("pttl", 1, 0, pttl).key());
    specs.push(CommandSpec::sync("persist", 1, 0, persist).key());
    specs.push(CommandSpec::sync("type", 1, 0, key_type).key());
    specs.push(CommandSpec::sync("keys", 1, 0, keys));
    specs.push(CommandSpec::sync("move", 2, 0, move_key).key());
    specs.push(CommandSpec::sync("randomkey", 0, 0, randomkey));
    specs.push(CommandSpec::sync("rename", 2, 0, rename).all_keys());
    specs.push(CommandSpec::sync("renamenx", 2, 0, renamenx).all_keys());
    specs.push(CommandSpec::sync("scan", 1, 2, scan));
    specs.push(CommandSpec::sync("sort", 1, 1, sort).key());
    specs.push(CommandSpec::sync("dump", 1, 0, dump_key).key());
    specs.push(CommandSpec::sync("restore", 3, 1, restore).key());
}

fn del(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let removed = args.iter().filter(|key| db.remove(key, now).is_some()).count();
    Ok(Reply::from_usize(removed))
}

fn exists(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let found = args.iter().filter(|key| db.contains(key, now)).count();
    Ok(Reply::from_usize(found))
}

/// Applies an absolute expiry in ms. A time already in the past deletes the key.
fn expire_at(ctx: &mut Ctx<'_>, key: &[u8], at: Option<i64>, name: &str) -> Result<Reply, CommandError> {
    let at = at.ok_or_else(|| {
        CommandError::malformed(format!("ERR invalid expire time in {}", name))
    })?;
    let now = ctx.now;
    let db = ctx.db();
    if !db.contains(key, now) {
        return Ok(Reply::Integer(0));
    }
    if at <= now {
        db.remove(key, now);
    } else {
        db.set_expiry(key, Some(at), now);
    }
    Ok(Reply::Integer(1))
}

fn expire(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let secs = int(&args[1])?;
    let at = secs.checked_mul(1000).and_then(|ms| ms.checked_add(ctx.now));
    expire_at(ctx, &args[0], at, "expire")
}

fn pexpire(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ms = int(&args[1])?;
    let at = ms.checked_add(ctx.now);
    expire_at(ctx, &args[0], at, "pexpire")
}

fn expireat(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let at = int(&args[1])?.checked_mul(1000);
    expire_at(ctx, &args[0], at, "expireat")
}

fn pexpireat(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let at = int(&args[1])?;
    expire_at(ctx, &args[0], Some(at), "pexpireat")
}

/// -2 for a missing key, -1 for no expiry, else remaining milliseconds.
fn remaining_ms(ctx: &mut Ctx<'_>, key: &[u8]) -> i64 {
    let now = ctx.now;
    match ctx.db().get(key, now) {
        None => -2,
        Some(entry) => entry.expire_at.map_or(-1, |at| (at - now).max(0)),
    }
}

fn ttl(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ms = remaining_ms(ctx, &args[0]);
    Ok(Reply::Integer(if ms < 0 { ms } else { (ms + 500) / 1000 }))
}

fn pttl(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::Integer(remaining_ms(ctx, &args[0])))
}

fn persist(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let has_ttl = db
        .get(&args[0], now)
        .map_or(false, |entry| entry.expire_at.is_some());
    if has_ttl {
        db.set_expiry(&args[0], None, now);
    }
    Ok(Reply::from_bool(has_ttl))
}

fn key_type(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let name = ctx
        .db()
        .kind_of(&args[0], now)
        .map_or("none", |kind| kind.type_name());
    Ok(Reply::status(name))
}

fn keys(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let mut matched: Vec<Vec<u8>> = ctx
        .db()
        .keys(now)
        .into_iter()
        .filter(|key| glob_match(&args[0], key))
        .collect();
    matched.sort();
    Ok(Reply::bulks(matched))
}

fn move_key(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let target = db_index(ctx, &args[1])?;
    let source = ctx.client.db;
    if target == source {
        return Err(CommandError::rejected(SRC_DST_SAME));
    }
    let now = ctx.now;
    let key = &args[0];
    if !ctx.state.dbs[source].contains(key, now) || ctx.state.dbs[target].contains(key, now) {
        return Ok(Reply::Integer(0));
    }
    match ctx.state.dbs[source].remove(key, now) {
        Some(entry) => {
            ctx.state.dbs[target].insert_entry(key.clone(), entry.value, entry.expire_at);
            Ok(Reply::Integer(1))
        }
        None => Ok(Reply::Integer(0)),
    }
}

fn randomkey(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let mut rng = rand::thread_rng();
    Ok(Reply::bulk_or_nil(ctx.db().random_key(now, &mut rng)))
}

fn rename_inner(ctx: &mut Ctx<'_>, args: &[Vec<u8>], only_new: bool) -> Result<Reply, CommandError> {
    let (src, dst) = (&args[0], &args[1]);
    let now = ctx.now;
    let db = ctx.db();
    if !db.contains(src, now) {
        return Err(CommandError::rejected(NO_KEY));
    }
    if only_new && db.contains(dst, now) {
        return Ok(Reply::Integer(0));
    }
    if src != dst {
        if let Some(entry) = db.remove(src, now) {
            db.insert_entry(dst.clone(), entry.value, entry.expire_at);
        }
    }
    Ok(if only_new { Reply::Integer(1) } else { Reply::ok() })
}

fn rename(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    rename_inner(ctx, args, false)
}

fn renamenx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    rename_inner(ctx, args, true)
}

/// `[cursor, [items...]]`, the reply shape of the whole SCAN family.
pub(super) fn scan_reply(next: usize, items: Vec<Vec<u8>>) -> Reply {
    Reply::Array(vec![Reply::bulk(next.to_string()), Reply::bulks(items)])
}

fn scan(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = cursor(&args[0])?;
    let opts = scan_options(&args[1..], true)?;
    let now = ctx.now;
    let (next, keys) = ctx.db().scan(start, &opts, now);
    Ok(scan_reply(next, keys))
}

// ============================================================================
// SORT
// ============================================================================

#[derive(Default)]
struct SortOptions {
    desc: bool,
    alpha: bool,
    by: Option<Vec<u8>>,
    limit: Option<(i64, i64)>,
    gets: Vec<Vec<u8>>,
    store: Option<Vec<u8>>,
}

impl SortOptions {
    fn parse(args: &[Vec<u8>]) -> Result<Self, CommandError> {
        let mut opts = SortOptions::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            let remaining = args.len() - i - 1;
            if is(arg, "asc") {
                opts.desc = false;
            } else if is(arg, "desc") {
                opts.desc = true;
            } else if is(arg, "alpha") {
                opts.alpha = true;
            } else if is(arg, "by") && remaining >= 1 {
                opts.by = Some(args[i + 1].clone());
                i += 1;
            } else if is(arg, "get") && remaining >= 1 {
                opts.gets.push(args[i + 1].clone());
                i += 1;
            } else if is(arg, "store") && remaining >= 1 {
                opts.store = Some(args[i + 1].clone());
                i += 1;
            } else if is(arg, "limit") && remaining >= 2 {
                opts.limit = Some((int(&args[i + 1])?, int(&args[i + 2])?));
                i += 2;
            } else {
                return Err(CommandError::syntax());
            }
            i += 1;
        }
        Ok(opts)
    }
}

/// Resolves a BY/GET pattern for one element: `#` is the element itself,
/// the first `*` is replaced by the element, and `->field` reads a hash field.
fn lookup_pattern(db: &mut Database, pattern: &[u8], item: &[u8], now: i64) -> Option<Vec<u8>> {
    if pattern == b"#" {
        return Some(item.to_vec());
    }
    let star = pattern.iter().position(|&b| b == b'*')?;
    let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);
    let arrow = suffix
        .windows(2)
        .position(|w| w == b"->")
        .filter(|&at| at + 2 < suffix.len());
    let (suffix, field) = match arrow {
        Some(at) => (&suffix[..at], Some(&suffix[at + 2..])),
        None => (suffix, None),
    };

    let mut key = prefix.to_vec();
    key.extend_from_slice(item);
    key.extend_from_slice(suffix);

    match (&db.get(&key, now)?.value, field) {
        (Value::Hash(hash), Some(field)) => hash.get(field).cloned(),
        (Value::String(s), None) => Some(s.clone()),
        _ => None,
    }
}

/// Numeric sort weight: leading whitespace is allowed, an empty or missing
/// value counts as 0.
fn sort_weight(raw: Option<&[u8]>) -> Result<f64, CommandError> {
    let raw = raw.unwrap_or_default();
    let bad = || CommandError::malformed(INVALID_SORT_FLOAT);
    let text = std::str::from_utf8(raw).map_err(|_| bad())?;
    let text = text.split('\0').next().unwrap_or_default().trim_start();
    if text.is_empty() {
        return Ok(0.0);
    }
    match text.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(bad()),
    }
}

fn sort(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let opts = SortOptions::parse(&args[1..])?;
    let now = ctx.now;
    let db = ctx.db();

    let mut items: Vec<Vec<u8>> = match db.get(&args[0], now).map(|e| &e.value) {
        None => Vec::new(),
        Some(Value::List(list)) => list.iter().cloned().collect(),
        Some(Value::Set(set)) => {
            let mut members: Vec<Vec<u8>> = set.iter().cloned().collect();
            members.sort();
            members
        }
        Some(Value::ZSet(zset)) => zset.iter().map(|(m, _)| m.to_vec()).collect(),
        Some(_) => return Err(CommandError::WrongType),
    };

    let dont_sort = opts.by.as_ref().map_or(false, |by| !by.contains(&b'*'));
    if !dont_sort {
        let by = opts.by.as_deref();
        if opts.alpha {
            let mut keyed: Vec<(Option<Vec<u8>>, Vec<u8>)> = items
                .into_iter()
                .map(|item| {
                    let weight = match by {
                        Some(pattern) => lookup_pattern(db, pattern, &item, now),
                        None => Some(item.clone()),
                    };
                    (weight, item)
                })
                .collect();
            keyed.sort();
            items = keyed.into_iter().map(|(_, item)| item).collect();
        } else {
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                let weight = match by {
                    Some(pattern) => sort_weight(lookup_pattern(db, pattern, &item, now).as_deref())?,
                    None => sort_weight(Some(item.as_slice()))?,
                };
                keyed.push((OrderedFloat(weight), item));
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            items = keyed.into_iter().map(|(_, item)| item).collect();
        }
    }
    if opts.desc {
        items.reverse();
    }

    if let Some((start, count)) = opts.limit {
        let start = start.max(0) as usize;
        let end = if count < 0 {
            items.len()
        } else {
            start.saturating_add(count as usize).min(items.len())
        };
        items = if start >= items.len() {
            Vec::new()
        } else {
            items.drain(start..end.max(start)).collect()
        };
    }

    let rows: Vec<Option<Vec<u8>>> = if opts.gets.is_empty() {
        items.into_iter().map(Some).collect()
    } else {
        let mut rows = Vec::with_capacity(items.len() * opts.gets.len());
        for item in &items {
            for pattern in &opts.gets {
                rows.push(lookup_pattern(db, pattern, item, now));
            }
        }
        rows
    };

    match opts.store {
        Some(dest) => {
            let list: VecDeque<Vec<u8>> = rows.into_iter().map(Option::unwrap_or_default).collect();
            let len = list.len();
            db.insert(dest, Value::List(list));
            Ok(Reply::from_usize(len))
        }
        None => Ok(Reply::Array(rows.into_iter().map(Reply::bulk_or_nil).collect())),
    }
}

fn dump_key(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    Ok(match ctx.db().get(&args[0], now) {
        Some(entry) => Reply::Bulk(dump::encode(&entry.value)),
        None => Reply::Nil,
    })
}

fn restore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ttl = int(&args[1])?;
    let mut replace = false;
    for extra in &args[3..] {
        if is(extra, "replace") {
            replace = true;
        } else {
            return Err(CommandError::syntax());
        }
    }
    let now = ctx.now;
    let db = ctx.db();
    if !replace && db.contains(&args[0], now) {
        return Err(CommandError::rejected(RESTORE_KEY_EXISTS));
    }
    let value = dump::decode(&args[2])?;
    let expire_at = match ttl.cmp(&0) {
        Ordering::Less => return Err(CommandError::malformed(RESTORE_INVALID_TTL)),
        Ordering::Equal => None,
        Ordering::Greater => Some(now.saturating_add(ttl)),
    };
    db.remove(&args[0], now);
    db.insert_entry(args[0].clone(), value, expire_at);
    Ok(Reply::ok())
}
