//! Sorted set commands.

use std::collections::HashMap;

use super::args::{
    self, cursor, fix_range, float, format_float, int, is, lex_bound, scan_options, score_bound,
};
use super::keys::scan_reply;
use super::{CommandSpec, Ctx, Flow, WaitRequest};
use crate::blocking::WaitOp;
use crate::error::{CommandError, SCORE_NAN, ZADD_INCR_LEN, ZADD_NX_XX, ZUNIONSTORE_KEYS};
use crate::reply::Reply;
use crate::storage::{scan_page, Database, Key, Value, ValueKind};
use crate::zset::SortedSet;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let zset = ValueKind::ZSet;
    specs.push(CommandSpec::sync("zadd", 3, 1, zadd).key().kind(zset));
    specs.push(CommandSpec::sync("zcard", 1, 0, zcard).key().kind(zset));
    specs.push(CommandSpec::sync("zcount", 3, 0, zcount).key().kind(zset));
    specs.push(CommandSpec::sync("zincrby", 3, 0, zincrby).key().kind(zset));
    specs.push(CommandSpec::sync("zlexcount", 3, 0, zlexcount).key().kind(zset));
    specs.push(CommandSpec::sync("zrange", 3, 1, zrange).key().kind(zset));
    specs.push(CommandSpec::sync("zrevrange", 3, 1, zrevrange).key().kind(zset));
    specs.push(CommandSpec::sync("zrangebylex", 3, 1, zrangebylex).key().kind(zset));
    specs.push(CommandSpec::sync("zrevrangebylex", 3, 1, zrevrangebylex).key().kind(zset));
    specs.push(CommandSpec::sync("zrangebyscore", 3, 1, zrangebyscore).key().kind(zset));
    specs.push(CommandSpec::sync("zrevrangebyscore", 3, 1, zrevrangebyscore).key().kind(zset));
    specs.push(CommandSpec::sync("zrank", 2, 0, zrank).key().kind(zset));
    specs.push(CommandSpec::sync("zrevrank", 2, 0, zrevrank).key().kind(zset));
    specs.push(CommandSpec::sync("zrem", 2, 1, zrem).key().kind(zset));
    specs.push(CommandSpec::sync("zremrangebylex", 3, 0, zremrangebylex).key().kind(zset));
    specs.push(CommandSpec::sync("zremrangebyrank", 3, 0, zremrangebyrank).key().kind(zset));
    specs.push(CommandSpec::sync("zremrangebyscore", 3, 0, zremrangebyscore).key().kind(zset));
    specs.push(CommandSpec::sync("zscore", 2, 0, zscore).key().kind(zset));
    specs.push(CommandSpec::sync("zscan", 2, 2, zscan).key().kind(zset));
    specs.push(CommandSpec::sync("zpopmin", 1, 1, zpopmin).key().kind(zset));
    specs.push(CommandSpec::sync("zpopmax", 1, 1, zpopmax).key().kind(zset));
    specs.push(CommandSpec::sync("zunionstore", 3, 1, zunionstore).key());
    specs.push(CommandSpec::sync("zinterstore", 3, 1, zinterstore).key());
    specs.push(CommandSpec::blocking("bzpopmin", 2, 1, bzpopmin).keys(0, 1, 1));
    specs.push(CommandSpec::blocking("bzpopmax", 2, 1, bzpopmax).keys(0, 1, 1));
}

fn read_zset<'c>(ctx: &'c mut Ctx<'_>, key: &[u8]) -> Result<Option<&'c SortedSet>, CommandError> {
    let now = ctx.now;
    ctx.db().read::<SortedSet>(key, now)
}

fn score_reply(score: f64) -> Reply {
    Reply::bulk(format_float(score))
}

/// Members, optionally interleaved with their scores.
fn scored(items: Vec<(Vec<u8>, f64)>, withscores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if withscores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Reply::Bulk(member));
        if withscores {
            out.push(score_reply(score));
        }
    }
    Reply::Array(out)
}

/// LIMIT semantics of the real server: a negative offset skips everything,
/// a negative count takes everything after the offset.
fn limit<T>(items: Vec<T>, offset: i64, count: i64) -> Vec<T> {
    if offset < 0 {
        return Vec::new();
    }
    let rest = items.into_iter().skip(offset as usize);
    if count < 0 {
        rest.collect()
    } else {
        rest.take(count as usize).collect()
    }
}

// ============================================================================
// ZADD / ZINCRBY
// ============================================================================

fn zadd(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let (mut nx, mut xx, mut ch, mut incr) = (false, false, false, false);
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        if is(arg, "nx") {
            nx = true;
        } else if is(arg, "xx") {
            xx = true;
        } else if is(arg, "ch") {
            ch = true;
        } else if is(arg, "incr") {
            incr = true;
        } else {
            break;
        }
        i += 1;
    }
    if nx && xx {
        return Err(CommandError::malformed(ZADD_NX_XX));
    }
    let elements = &args[i..];
    if elements.is_empty() || elements.len() % 2 != 0 {
        return Err(CommandError::syntax());
    }
    if incr && elements.len() != 2 {
        return Err(CommandError::malformed(ZADD_INCR_LEN));
    }
    let pairs = elements
        .chunks(2)
        .map(|pair| Ok((float(&pair[0])?, pair[1].clone())))
        .collect::<Result<Vec<(f64, Vec<u8>)>, CommandError>>()?;

    let now = ctx.now;
    let db = ctx.db();
    if incr {
        let (delta, member) = pairs[0].clone();
        return db.write::<SortedSet, _, _>(&args[0], now, |zset| {
            let existing = zset.score(&member);
            if (nx && existing.is_some()) || (xx && existing.is_none()) {
                return Ok((Reply::Nil, false));
            }
            let score = existing.unwrap_or(0.0) + delta;
            if score.is_nan() {
                return Err(CommandError::malformed(SCORE_NAN));
            }
            let changed = zset.insert(member, score);
            Ok((score_reply(score), changed))
        });
    }

    let (added, changed) = db.write::<SortedSet, _, _>(&args[0], now, |zset| {
        let (mut added, mut changed) = (0, 0);
        for (score, member) in pairs {
            let exists = zset.contains(&member);
            if (nx && exists) || (xx && !exists) {
                continue;
            }
            if zset.insert(member, score) {
                changed += 1;
                if !exists {
                    added += 1;
                }
            }
        }
        Ok(((added, changed), changed > 0))
    })?;
    Ok(Reply::Integer(if ch { changed } else { added }))
}

fn zincrby(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let delta = float(&args[1])?;
    let member = args[2].clone();
    let now = ctx.now;
    let score = ctx.db().write::<SortedSet, _, _>(&args[0], now, |zset| {
        let score = zset.score(&member).unwrap_or(0.0) + delta;
        if score.is_nan() {
            return Err(CommandError::malformed(SCORE_NAN));
        }
        zset.insert(member, score);
        Ok((score, true))
    })?;
    Ok(score_reply(score))
}

// ============================================================================
// Reads
// ============================================================================

fn zcard(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let len = read_zset(ctx, &args[0])?.map_or(0, |z| z.len());
    Ok(Reply::from_usize(len))
}

fn zcount(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let min = score_bound(&args[1])?;
    let max = score_bound(&args[2])?;
    let count = read_zset(ctx, &args[0])?.map_or(0, |z| z.count_by_score(&min, &max));
    Ok(Reply::from_usize(count))
}

fn zlexcount(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let min = lex_bound(&args[1])?;
    let max = lex_bound(&args[2])?;
    let count = read_zset(ctx, &args[0])?.map_or(0, |z| z.count_by_lex(&min, &max));
    Ok(Reply::from_usize(count))
}

fn zscore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let score = read_zset(ctx, &args[0])?.and_then(|z| z.score(&args[1]));
    Ok(score.map_or(Reply::Nil, score_reply))
}

fn rank(ctx: &mut Ctx<'_>, args: &[Vec<u8>], reverse: bool) -> Result<Reply, CommandError> {
    let Some(zset) = read_zset(ctx, &args[0])? else {
        return Ok(Reply::Nil);
    };
    Ok(match zset.rank(&args[1]) {
        Some(rank) if reverse => Reply::from_usize(zset.len() - 1 - rank),
        Some(rank) => Reply::from_usize(rank),
        None => Reply::Nil,
    })
}

fn zrank(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    rank(ctx, args, false)
}

fn zrevrank(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    rank(ctx, args, true)
}

fn range_by_rank(ctx: &mut Ctx<'_>, args: &[Vec<u8>], reverse: bool) -> Result<Reply, CommandError> {
    let start = int(&args[1])?;
    let stop = int(&args[2])?;
    let withscores = match &args[3..] {
        [] => false,
        [opt] if is(opt, "withscores") => true,
        _ => return Err(CommandError::syntax()),
    };
    let Some(zset) = read_zset(ctx, &args[0])? else {
        return Ok(Reply::Array(Vec::new()));
    };
    let len = zset.len();
    let (start, end) = fix_range(start, stop, len);
    let items = if reverse {
        let mut items = zset.by_rank(len - end, len - start);
        items.reverse();
        items
    } else {
        zset.by_rank(start, end)
    };
    Ok(scored(items, withscores))
}

fn zrange(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_rank(ctx, args, false)
}

fn zrevrange(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_rank(ctx, args, true)
}

/// `min`/`max` are already swapped for the REV variants.
fn range_by_score(
    ctx: &mut Ctx<'_>,
    key: &[u8],
    min: &[u8],
    max: &[u8],
    opts: &[Vec<u8>],
    reverse: bool,
) -> Result<Reply, CommandError> {
    let min = score_bound(min)?;
    let max = score_bound(max)?;
    let (mut withscores, mut offset, mut count) = (false, 0, -1);
    let mut i = 0;
    while i < opts.len() {
        if is(&opts[i], "withscores") {
            withscores = true;
            i += 1;
        } else if is(&opts[i], "limit") && i + 2 < opts.len() {
            offset = int(&opts[i + 1])?;
            count = int(&opts[i + 2])?;
            i += 3;
        } else {
            return Err(CommandError::syntax());
        }
    }
    let mut items = read_zset(ctx, key)?.map_or_else(Vec::new, |z| z.by_score(&min, &max));
    if reverse {
        items.reverse();
    }
    Ok(scored(limit(items, offset, count), withscores))
}

fn zrangebyscore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_score(ctx, &args[0], &args[1], &args[2], &args[3..], false)
}

fn zrevrangebyscore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_score(ctx, &args[0], &args[2], &args[1], &args[3..], true)
}

fn range_by_lex(
    ctx: &mut Ctx<'_>,
    key: &[u8],
    min: &[u8],
    max: &[u8],
    opts: &[Vec<u8>],
    reverse: bool,
) -> Result<Reply, CommandError> {
    let min = lex_bound(min)?;
    let max = lex_bound(max)?;
    let (offset, count) = match opts {
        [] => (0, -1),
        [word, offset, count] if is(word, "limit") => (int(offset)?, int(count)?),
        _ => return Err(CommandError::syntax()),
    };
    let mut items = read_zset(ctx, key)?.map_or_else(Vec::new, |z| z.by_lex(&min, &max));
    if reverse {
        items.reverse();
    }
    Ok(scored(limit(items, offset, count), false))
}

fn zrangebylex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_lex(ctx, &args[0], &args[1], &args[2], &args[3..], false)
}

fn zrevrangebylex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    range_by_lex(ctx, &args[0], &args[2], &args[1], &args[3..], true)
}

fn zscan(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = cursor(&args[1])?;
    let opts = scan_options(&args[2..], false)?;
    let Some(zset) = read_zset(ctx, &args[0])? else {
        return Ok(scan_reply(0, Vec::new()));
    };
    let members: Vec<Vec<u8>> = zset.iter().map(|(m, _)| m.to_vec()).collect();
    let (next, page) = scan_page(members, start, &opts, |_| true);
    let items = page
        .into_iter()
        .flat_map(|member| {
            let score = zset.score(&member).unwrap_or_default();
            [member, format_float(score).into_bytes()]
        })
        .collect();
    Ok(scan_reply(next, items))
}

// ============================================================================
// Removal
// ============================================================================

fn zrem(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let removed = ctx.db().write::<SortedSet, _, _>(&args[0], now, |zset| {
        let removed = args[1..].iter().filter(|m| zset.remove(m)).count();
        Ok((removed, removed > 0))
    })?;
    Ok(Reply::from_usize(removed))
}

/// Removes the members `select` picks out of the current set.
fn remove_selected<F>(ctx: &mut Ctx<'_>, key: &[u8], select: F) -> Result<Reply, CommandError>
where
    F: FnOnce(&SortedSet) -> Vec<(Vec<u8>, f64)>,
{
    let now = ctx.now;
    let removed = ctx.db().write::<SortedSet, _, _>(key, now, |zset| {
        let doomed = select(zset);
        for (member, _) in &doomed {
            zset.remove(member);
        }
        Ok((doomed.len(), !doomed.is_empty()))
    })?;
    Ok(Reply::from_usize(removed))
}

fn zremrangebyrank(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = int(&args[1])?;
    let stop = int(&args[2])?;
    remove_selected(ctx, &args[0], |zset| {
        let (start, end) = fix_range(start, stop, zset.len());
        zset.by_rank(start, end)
    })
}

fn zremrangebyscore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let min = score_bound(&args[1])?;
    let max = score_bound(&args[2])?;
    remove_selected(ctx, &args[0], |zset| zset.by_score(&min, &max))
}

fn zremrangebylex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let min = lex_bound(&args[1])?;
    let max = lex_bound(&args[2])?;
    remove_selected(ctx, &args[0], |zset| zset.by_lex(&min, &max))
}

// ============================================================================
// Pops
// ============================================================================

fn pop(ctx: &mut Ctx<'_>, args: &[Vec<u8>], highest: bool) -> Result<Reply, CommandError> {
    let count = match &args[1..] {
        [] => 1,
        [raw] => int(raw)?,
        _ => return Err(CommandError::syntax()),
    };
    if count <= 0 {
        return Ok(Reply::Array(Vec::new()));
    }
    let now = ctx.now;
    let popped = ctx.db().write::<SortedSet, _, _>(&args[0], now, |zset| {
        let popped = zset.pop(count as usize, highest);
        let changed = !popped.is_empty();
        Ok((popped, changed))
    })?;
    Ok(scored(popped, true))
}

fn zpopmin(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    pop(ctx, args, false)
}

fn zpopmax(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    pop(ctx, args, true)
}

/// Pops one member from the first non-empty sorted set, replying
/// `[key, member, score]`. With `strict` another type is WRONGTYPE.
pub(crate) fn zset_pop(
    db: &mut Database,
    keys: &[Key],
    highest: bool,
    now: i64,
    strict: bool,
) -> Result<Option<Reply>, CommandError> {
    for key in keys {
        match db.kind_of(key, now) {
            None => continue,
            Some(ValueKind::ZSet) => {}
            Some(_) if strict => return Err(CommandError::WrongType),
            Some(_) => continue,
        }
        let popped = db.write::<SortedSet, _, _>(key, now, |zset| {
            let popped = zset.pop(1, highest);
            let changed = !popped.is_empty();
            Ok((popped, changed))
        })?;
        if let Some((member, score)) = popped.into_iter().next() {
            return Ok(Some(Reply::Array(vec![
                Reply::Bulk(key.clone()),
                Reply::Bulk(member),
                score_reply(score),
            ])));
        }
    }
    Ok(None)
}

fn blocking_pop(ctx: &mut Ctx<'_>, args: &[Vec<u8>], highest: bool) -> Result<Flow, CommandError> {
    let (timeout_arg, keys) = args.split_last().ok_or_else(CommandError::syntax)?;
    let timeout = args::timeout(timeout_arg)?;
    let keys = keys.to_vec();
    let now = ctx.now;
    if let Some(reply) = zset_pop(ctx.db(), &keys, highest, now, true)? {
        return Ok(Flow::Done(reply));
    }
    if !ctx.may_block() {
        return Ok(Flow::Done(Reply::Nil));
    }
    Ok(Flow::Wait(WaitRequest {
        op: WaitOp::ZPop { keys, highest },
        timeout,
    }))
}

fn bzpopmin(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    blocking_pop(ctx, args, false)
}

fn bzpopmax(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    blocking_pop(ctx, args, true)
}

// ============================================================================
// ZUNIONSTORE / ZINTERSTORE
// ============================================================================

#[derive(Clone, Copy)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => {
                let sum = a + b;
                if sum.is_nan() {
                    0.0
                } else {
                    sum
                }
            }
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Members and scores of a source key: sets count as score 1.
fn source_scores(db: &mut Database, key: &[u8], now: i64) -> Result<Vec<(Vec<u8>, f64)>, CommandError> {
    Ok(match db.get(key, now).map(|e| &e.value) {
        None => Vec::new(),
        Some(Value::ZSet(zset)) => zset.iter().map(|(m, s)| (m.to_vec(), s)).collect(),
        Some(Value::Set(set)) => set.iter().map(|m| (m.clone(), 1.0)).collect(),
        Some(_) => return Err(CommandError::WrongType),
    })
}

fn combine_store(ctx: &mut Ctx<'_>, args: &[Vec<u8>], intersect: bool) -> Result<Reply, CommandError> {
    let numkeys = int(&args[1])?;
    if numkeys < 1 {
        return Err(CommandError::malformed(ZUNIONSTORE_KEYS));
    }
    let numkeys = numkeys as usize;
    let rest = &args[2..];
    if numkeys > rest.len() {
        return Err(CommandError::syntax());
    }
    let (keys, opts) = rest.split_at(numkeys);

    let mut weights = vec![1.0; numkeys];
    let mut aggregate = Aggregate::Sum;
    let mut i = 0;
    while i < opts.len() {
        if is(&opts[i], "weights") && i + numkeys < opts.len() {
            for (slot, raw) in weights.iter_mut().zip(&opts[i + 1..=i + numkeys]) {
                *slot = float(raw)?;
            }
            i += numkeys + 1;
        } else if is(&opts[i], "aggregate") && i + 1 < opts.len() {
            let name = &opts[i + 1];
            aggregate = if is(name, "sum") {
                Aggregate::Sum
            } else if is(name, "min") {
                Aggregate::Min
            } else if is(name, "max") {
                Aggregate::Max
            } else {
                return Err(CommandError::syntax());
            };
            i += 2;
        } else {
            return Err(CommandError::syntax());
        }
    }

    let now = ctx.now;
    let db = ctx.db();
    let mut sources = Vec::with_capacity(numkeys);
    for key in keys {
        sources.push(source_scores(db, key, now)?);
    }

    let mut acc: HashMap<Vec<u8>, (f64, usize)> = HashMap::new();
    for (source, weight) in sources.iter().zip(&weights) {
        for (member, score) in source {
            let weighted = score * weight;
            let weighted = if weighted.is_nan() { 0.0 } else { weighted };
            acc.entry(member.clone())
                .and_modify(|(total, seen)| {
                    *total = aggregate.apply(*total, weighted);
                    *seen += 1;
                })
                .or_insert((weighted, 1));
        }
    }

    let mut out = SortedSet::new();
    for (member, (score, seen)) in acc {
        if !intersect || seen == numkeys {
            out.insert(member, score);
        }
    }
    let len = out.len();
    db.insert(args[0].clone(), Value::ZSet(out));
    Ok(Reply::from_usize(len))
}

fn zunionstore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    combine_store(ctx, args, false)
}

fn zinterstore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    combine_store(ctx, args, true)
}
