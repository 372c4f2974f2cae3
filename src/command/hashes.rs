use std::collections::HashMap;

use super::args::{cursor, float, float_bytes, int, parse_float, parse_int, scan_options};
use super::keys::scan_reply;
use super::{CommandSpec, Ctx};
use crate::error::{CommandError, NONFINITE, OVERFLOW};
use crate::reply::Reply;
use crate::storage::{scan_page, ValueKind};

type Hash = HashMap<Vec<u8>, Vec<u8>>;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let hash = ValueKind::Hash;
    specs.push(CommandSpec::sync("hdel", 2, 1, hdel).key().kind(hash));
    specs.push(CommandSpec::sync("hexists", 2, 0, hexists).key().kind(hash));
    specs.push(CommandSpec::sync("hget", 2, 0, hget).key().kind(hash));
    specs.push(CommandSpec::sync("hgetall", 1, 0, hgetall).key().kind(hash));
    specs.push(CommandSpec::sync("hincrby", 3, 0, hincrby).key().kind(hash));
    specs.push(CommandSpec::sync("hincrbyfloat", 3, 0, hincrbyfloat).key().kind(hash));
    specs.push(CommandSpec::sync("hkeys", 1, 0, hkeys).key().kind(hash));
    specs.push(CommandSpec::sync("hlen", 1, 0, hlen).key().kind(hash));
    specs.push(CommandSpec::sync("hmget", 2, 1, hmget).key().kind(hash));
    specs.push(CommandSpec::sync("hmset", 3, 2, hmset).key().kind(hash));
    specs.push(CommandSpec::sync("hset", 3, 2, hset).key().kind(hash));
    specs.push(CommandSpec::sync("hsetnx", 3, 0, hsetnx).key().kind(hash));
    specs.push(CommandSpec::sync("hstrlen", 2, 0, hstrlen).key().kind(hash));
    specs.push(CommandSpec::sync("hvals", 1, 0, hvals).key().kind(hash));
    specs.push(CommandSpec::sync("hscan", 2, 2, hscan).key().kind(hash));
}

/// Snapshot of the hash as `(field, value)` pairs sorted by field.
fn sorted_pairs(ctx: &mut Ctx<'_>, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CommandError> {
    let now = ctx.now;
    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = match ctx.db().read::<Hash>(key, now)? {
        Some(hash) => hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
        None => Vec::new(),
    };
    pairs.sort();
    Ok(pairs)
}

fn field_of(ctx: &mut Ctx<'_>, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, CommandError> {
    let now = ctx.now;
    Ok(ctx
        .db()
        .read::<Hash>(key, now)?
        .and_then(|hash| hash.get(field).cloned()))
}

fn hdel(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let removed = ctx.db().write::<Hash, _, _>(&args[0], now, |hash| {
        let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
        Ok((removed, removed > 0))
    })?;
    Ok(Reply::from_usize(removed))
}

fn hexists(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::from_bool(field_of(ctx, &args[0], &args[1])?.is_some()))
}

fn hget(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::bulk_or_nil(field_of(ctx, &args[0], &args[1])?))
}

fn hstrlen(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let len = field_of(ctx, &args[0], &args[1])?.map_or(0, |v| v.len());
    Ok(Reply::from_usize(len))
}

fn hgetall(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let pairs = sorted_pairs(ctx, &args[0])?;
    Ok(Reply::bulks(pairs.into_iter().flat_map(|(f, v)| [f, v])))
}

fn hkeys(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let pairs = sorted_pairs(ctx, &args[0])?;
    Ok(Reply::bulks(pairs.into_iter().map(|(f, _)| f)))
}

fn hvals(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let pairs = sorted_pairs(ctx, &args[0])?;
    Ok(Reply::bulks(pairs.into_iter().map(|(_, v)| v)))
}

fn hlen(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let len = ctx.db().read::<Hash>(&args[0], now)?.map_or(0, |h| h.len());
    Ok(Reply::from_usize(len))
}

fn hmget(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let hash = ctx.db().read::<Hash>(&args[0], now)?;
    let values = args[1..]
        .iter()
        .map(|field| Reply::bulk_or_nil(hash.and_then(|h| h.get(field).cloned())))
        .collect();
    Ok(Reply::Array(values))
}

/// Stores field/value pairs; returns how many fields were new.
fn store_fields(ctx: &mut Ctx<'_>, key: &[u8], pairs: &[Vec<u8>]) -> Result<usize, CommandError> {
    let now = ctx.now;
    ctx.db().write::<Hash, _, _>(key, now, |hash| {
        let added = pairs
            .chunks(2)
            .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
            .count();
        Ok((added, true))
    })
}

fn hset(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let added = store_fields(ctx, &args[0], &args[1..])?;
    Ok(Reply::from_usize(added))
}

fn hmset(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    store_fields(ctx, &args[0], &args[1..])?;
    Ok(Reply::ok())
}

fn hsetnx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let added = ctx.db().write::<Hash, _, _>(&args[0], now, |hash| {
        if hash.contains_key(&args[1]) {
            return Ok((false, false));
        }
        hash.insert(args[1].clone(), args[2].clone());
        Ok((true, true))
    })?;
    Ok(Reply::from_bool(added))
}

fn hincrby(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let amount = int(&args[2])?;
    let now = ctx.now;
    let value = ctx.db().write::<Hash, _, _>(&args[0], now, |hash| {
        let current = match hash.get(&args[1]) {
            Some(raw) => parse_int(raw).ok_or_else(CommandError::invalid_int)?,
            None => 0,
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| CommandError::malformed(OVERFLOW))?;
        hash.insert(args[1].clone(), next.to_string().into_bytes());
        Ok((next, true))
    })?;
    Ok(Reply::Integer(value))
}

fn hincrbyfloat(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let amount = float(&args[2])?;
    let now = ctx.now;
    let value = ctx.db().write::<Hash, _, _>(&args[0], now, |hash| {
        let current = match hash.get(&args[1]) {
            Some(raw) => parse_float(raw).ok_or_else(CommandError::invalid_float)?,
            None => 0.0,
        };
        let next = current + amount;
        if !next.is_finite() {
            return Err(CommandError::malformed(NONFINITE));
        }
        let encoded = float_bytes(next);
        hash.insert(args[1].clone(), encoded.clone());
        Ok((encoded, true))
    })?;
    Ok(Reply::Bulk(value))
}

fn hscan(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = cursor(&args[1])?;
    let opts = scan_options(&args[2..], false)?;
    let now = ctx.now;
    let Some(hash) = ctx.db().read::<Hash>(&args[0], now)? else {
        return Ok(scan_reply(0, Vec::new()));
    };
    let fields: Vec<Vec<u8>> = hash.keys().cloned().collect();
    let (next, page) = scan_page(fields, start, &opts, |_| true);
    let items = page
        .into_iter()
        .flat_map(|field| {
            let value = hash.get(&field).cloned().unwrap_or_default();
            [field, value]
        })
        .collect();
    Ok(scan_reply(next, items))
}
