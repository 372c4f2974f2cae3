//! String commands.

use super::args::{fix_range_string, float, float_bytes, int, is, parse_float, parse_int};
use super::{CommandSpec, Ctx};
use crate::error::{
    CommandError, INVALID_BIT_OFFSET, INVALID_BIT_VALUE, INVALID_OFFSET, NONFINITE, OVERFLOW,
    STRING_OVERFLOW,
};
use crate::reply::Reply;
use crate::storage::{Value, ValueKind};

/// Largest string value a real server accepts.
pub(super) const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let string = ValueKind::String;
    specs.push(CommandSpec::sync("append", 2, 0, append).key().kind(string));
    specs.push(CommandSpec::sync("bitcount", 1, 1, bitcount).key().kind(string));
    specs.push(CommandSpec::sync("decr", 1, 0, decr).key().kind(string));
    specs.push(CommandSpec::sync("decrby", 2, 0, decrby).key().kind(string));
    specs.push(CommandSpec::sync("incr", 1, 0, incr).key().kind(string));
    specs.push(CommandSpec::sync("incrby", 2, 0, incrby).key().kind(string));
    specs.push(CommandSpec::sync("incrbyfloat", 2, 0, incrbyfloat).key().kind(string));
    specs.push(CommandSpec::sync("get", 1, 0, get).key().kind(string));
    specs.push(CommandSpec::sync("getbit", 2, 0, getbit).key().kind(string));
    specs.push(CommandSpec::sync("setbit", 3, 0, setbit).key().kind(string));
    specs.push(CommandSpec::sync("getrange", 3, 0, getrange).key().kind(string));
    specs.push(CommandSpec::sync("substr", 3, 0, getrange).key().kind(string));
    specs.push(CommandSpec::sync("getset", 2, 0, getset).key().kind(string));
    specs.push(CommandSpec::sync("strlen", 1, 0, strlen).key().kind(string));
    specs.push(CommandSpec::sync("setrange", 3, 0, setrange).key().kind(string));
    specs.push(CommandSpec::sync("mget", 1, 1, mget).all_keys());
    specs.push(CommandSpec::sync("mset", 2, 2, mset).keys(0, 0, 2));
    specs.push(CommandSpec::sync("msetnx", 2, 2, msetnx).keys(0, 0, 2));
    specs.push(CommandSpec::sync("set", 2, 1, set).key());
    specs.push(CommandSpec::sync("setex", 3, 0, setex).key());
    specs.push(CommandSpec::sync("psetex", 3, 0, psetex).key());
    specs.push(CommandSpec::sync("setnx", 2, 0, setnx).key());
}

fn read_string(ctx: &mut Ctx<'_>, key: &[u8]) -> Result<Option<Vec<u8>>, CommandError> {
    let now = ctx.now;
    Ok(ctx.db().read::<Vec<u8>>(key, now)?.cloned())
}

fn get(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::bulk_or_nil(read_string(ctx, &args[0])?))
}

fn strlen(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let len = read_string(ctx, &args[0])?.map_or(0, |s| s.len());
    Ok(Reply::from_usize(len))
}

fn append(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let suffix = &args[1];
    let len = ctx.db().write::<Vec<u8>, _, _>(&args[0], now, |s| {
        if s.len() + suffix.len() > MAX_STRING_LEN {
            return Err(CommandError::malformed(STRING_OVERFLOW));
        }
        s.extend_from_slice(suffix);
        Ok((s.len(), true))
    })?;
    Ok(Reply::from_usize(len))
}

fn bitcount(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let range = match &args[1..] {
        [] => None,
        [start, end] => Some((int(start)?, int(end)?)),
        _ => return Err(CommandError::syntax()),
    };
    let value = read_string(ctx, &args[0])?.unwrap_or_default();
    let (start, end) = match range {
        Some((start, end)) => fix_range_string(start, end, value.len()),
        None => (0, value.len()),
    };
    let ones: u32 = value[start..end].iter().map(|b| b.count_ones()).sum();
    Ok(Reply::Integer(i64::from(ones)))
}

/// INCRBY and friends: an existing value must be a canonical integer.
fn incr_by(ctx: &mut Ctx<'_>, key: &[u8], amount: i64) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let exists = db.contains(key, now);
    let value = db.write::<Vec<u8>, _, _>(key, now, |s| {
        let current = if exists {
            parse_int(s).ok_or_else(CommandError::invalid_int)?
        } else {
            0
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| CommandError::malformed(OVERFLOW))?;
        *s = next.to_string().into_bytes();
        Ok((next, true))
    })?;
    Ok(Reply::Integer(value))
}

fn incr(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    incr_by(ctx, &args[0], 1)
}

fn decr(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    incr_by(ctx, &args[0], -1)
}

fn incrby(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let amount = int(&args[1])?;
    incr_by(ctx, &args[0], amount)
}

fn decrby(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let amount = int(&args[1])?
        .checked_neg()
        .ok_or_else(|| CommandError::malformed(OVERFLOW))?;
    incr_by(ctx, &args[0], amount)
}

fn incrbyfloat(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let amount = float(&args[1])?;
    let now = ctx.now;
    let db = ctx.db();
    let exists = db.contains(&args[0], now);
    let value = db.write::<Vec<u8>, _, _>(&args[0], now, |s| {
        let current = if exists {
            parse_float(s).ok_or_else(CommandError::invalid_float)?
        } else {
            0.0
        };
        let next = current + amount;
        if !next.is_finite() {
            return Err(CommandError::malformed(NONFINITE));
        }
        *s = float_bytes(next);
        Ok((s.clone(), true))
    })?;
    Ok(Reply::Bulk(value))
}

fn bit_offset(arg: &[u8]) -> Result<usize, CommandError> {
    match parse_int(arg) {
        Some(n) if n >= 0 && (n as usize) < MAX_STRING_LEN * 8 => Ok(n as usize),
        _ => Err(CommandError::malformed(INVALID_BIT_OFFSET)),
    }
}

fn getbit(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = bit_offset(&args[1])?;
    let value = read_string(ctx, &args[0])?.unwrap_or_default();
    let bit = value
        .get(offset / 8)
        .map_or(0, |byte| (byte >> (7 - offset % 8)) & 1);
    Ok(Reply::Integer(i64::from(bit)))
}

fn setbit(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = bit_offset(&args[1])?;
    let on = match args[2].as_slice() {
        b"0" => false,
        b"1" => true,
        _ => return Err(CommandError::malformed(INVALID_BIT_VALUE)),
    };
    let now = ctx.now;
    let old = ctx.db().write::<Vec<u8>, _, _>(&args[0], now, |s| {
        let byte = offset / 8;
        if s.len() <= byte {
            s.resize(byte + 1, 0);
        }
        let mask = 1u8 << (7 - offset % 8);
        let old = s[byte] & mask != 0;
        if on {
            s[byte] |= mask;
        } else {
            s[byte] &= !mask;
        }
        Ok((old, true))
    })?;
    Ok(Reply::from_bool(old))
}

fn getrange(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = int(&args[1])?;
    let end = int(&args[2])?;
    let value = read_string(ctx, &args[0])?.unwrap_or_default();
    let (start, end) = fix_range_string(start, end, value.len());
    Ok(Reply::bulk(&value[start..end]))
}

fn getset(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let old = read_string(ctx, &args[0])?;
    ctx.db()
        .insert(args[0].clone(), Value::String(args[1].clone()));
    Ok(Reply::bulk_or_nil(old))
}

fn setrange(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = match int(&args[1])? {
        n if n < 0 => return Err(CommandError::malformed(INVALID_OFFSET)),
        n => n as usize,
    };
    let patch = &args[2];
    let now = ctx.now;
    let db = ctx.db();
    if patch.is_empty() {
        let len = db.read::<Vec<u8>>(&args[0], now)?.map_or(0, Vec::len);
        return Ok(Reply::from_usize(len));
    }
    if offset.saturating_add(patch.len()) > MAX_STRING_LEN {
        return Err(CommandError::malformed(STRING_OVERFLOW));
    }
    let len = db.write::<Vec<u8>, _, _>(&args[0], now, |s| {
        let end = offset + patch.len();
        if s.len() < end {
            s.resize(end, 0);
        }
        s[offset..end].copy_from_slice(patch);
        Ok((s.len(), true))
    })?;
    Ok(Reply::from_usize(len))
}

/// Non-string keys read as nil rather than failing.
fn mget(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let values = args
        .iter()
        .map(|key| match db.get(key, now).map(|e| &e.value) {
            Some(Value::String(s)) => Reply::Bulk(s.clone()),
            _ => Reply::Nil,
        })
        .collect();
    Ok(Reply::Array(values))
}

fn store_pairs(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) {
    let db = ctx.db();
    for pair in args.chunks(2) {
        db.insert(pair[0].clone(), Value::String(pair[1].clone()));
    }
}

fn mset(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    store_pairs(ctx, args);
    Ok(Reply::ok())
}

fn msetnx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    if args.chunks(2).any(|pair| db.contains(&pair[0], now)) {
        return Ok(Reply::Integer(0));
    }
    store_pairs(ctx, args);
    Ok(Reply::Integer(1))
}

#[derive(Default)]
struct SetOptions {
    nx: bool,
    xx: bool,
    get: bool,
    keep_ttl: bool,
    /// Relative expiry in milliseconds.
    ttl_ms: Option<i64>,
}

impl SetOptions {
    fn parse(args: &[Vec<u8>]) -> Result<Self, CommandError> {
        let mut opts = SetOptions::default();
        let mut ttl_options = 0;
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if is(arg, "nx") {
                opts.nx = true;
            } else if is(arg, "xx") {
                opts.xx = true;
            } else if is(arg, "get") {
                opts.get = true;
            } else if is(arg, "keepttl") {
                opts.keep_ttl = true;
                ttl_options += 1;
            } else if (is(arg, "ex") || is(arg, "px")) && i + 1 < args.len() {
                let amount = int(&args[i + 1])?;
                if amount <= 0 {
                    return Err(CommandError::malformed("ERR invalid expire time in set"));
                }
                let ms = if is(arg, "ex") {
                    amount.checked_mul(1000).ok_or_else(|| {
                        CommandError::malformed("ERR invalid expire time in set")
                    })?
                } else {
                    amount
                };
                opts.ttl_ms = Some(ms);
                ttl_options += 1;
                i += 1;
            } else {
                return Err(CommandError::syntax());
            }
            i += 1;
        }
        if (opts.nx && opts.xx) || ttl_options > 1 || (opts.nx && opts.get) {
            return Err(CommandError::syntax());
        }
        Ok(opts)
    }
}

fn set(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let opts = SetOptions::parse(&args[2..])?;
    let key = &args[0];
    let now = ctx.now;
    let db = ctx.db();

    let old = if opts.get {
        db.read::<Vec<u8>>(key, now)?.cloned()
    } else {
        None
    };
    let exists = db.contains(key, now);
    let allowed = !(opts.nx && exists) && !(opts.xx && !exists);

    if allowed {
        let value = Value::String(args[1].clone());
        if opts.keep_ttl {
            db.insert_keep_ttl(key.clone(), value, now);
        } else {
            let expire_at = match opts.ttl_ms {
                Some(ms) => Some(now.checked_add(ms).ok_or_else(|| {
                    CommandError::malformed("ERR invalid expire time in set")
                })?),
                None => None,
            };
            db.insert_entry(key.clone(), value, expire_at);
        }
    }

    if opts.get {
        Ok(Reply::bulk_or_nil(old))
    } else if allowed {
        Ok(Reply::ok())
    } else {
        Ok(Reply::Nil)
    }
}

fn set_with_ttl(ctx: &mut Ctx<'_>, args: &[Vec<u8>], unit_ms: i64, name: &str) -> Result<Reply, CommandError> {
    let amount = int(&args[1])?;
    let invalid = || CommandError::malformed(format!("ERR invalid expire time in {}", name));
    if amount <= 0 {
        return Err(invalid());
    }
    let now = ctx.now;
    let at = amount
        .checked_mul(unit_ms)
        .and_then(|ms| ms.checked_add(now))
        .ok_or_else(invalid)?;
    ctx.db()
        .insert_entry(args[0].clone(), Value::String(args[2].clone()), Some(at));
    Ok(Reply::ok())
}

fn setex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_with_ttl(ctx, args, 1000, "setex")
}

fn psetex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_with_ttl(ctx, args, 1, "psetex")
}

fn setnx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    if db.contains(&args[0], now) {
        return Ok(Reply::Integer(0));
    }
    db.insert(args[0].clone(), Value::String(args[1].clone()));
    Ok(Reply::Integer(1))
}
