use std::collections::HashSet;

use rand::seq::{IteratorRandom, SliceRandom};

use super::args::{cursor, int, scan_options};
use super::keys::scan_reply;
use super::{CommandSpec, Ctx};
use crate::error::{CommandError, VALUE_OUT_OF_RANGE};
use crate::reply::Reply;
use crate::storage::{scan_page, Database, Value, ValueKind};

type Set = HashSet<Vec<u8>>;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let set = ValueKind::Set;
    specs.push(CommandSpec::sync("sadd", 2, 1, sadd).key().kind(set));
    specs.push(CommandSpec::sync("scard", 1, 0, scard).key().kind(set));
    specs.push(CommandSpec::sync("sismember", 2, 0, sismember).key().kind(set));
    specs.push(CommandSpec::sync("smembers", 1, 0, smembers).key().kind(set));
    specs.push(CommandSpec::sync("smove", 3, 0, smove).keys(0, 1, 1).kind(set));
    specs.push(CommandSpec::sync("spop", 1, 1, spop).key().kind(set));
    specs.push(CommandSpec::sync("srandmember", 1, 1, srandmember).key().kind(set));
    specs.push(CommandSpec::sync("srem", 2, 1, srem).key().kind(set));
    specs.push(CommandSpec::sync("sscan", 2, 2, sscan).key().kind(set));
    specs.push(CommandSpec::sync("sdiff", 1, 1, sdiff).all_keys().kind(set));
    specs.push(CommandSpec::sync("sinter", 1, 1, sinter).all_keys().kind(set));
    specs.push(CommandSpec::sync("sunion", 1, 1, sunion).all_keys().kind(set));
    specs.push(CommandSpec::sync("sdiffstore", 2, 1, sdiffstore).all_keys().dest_then(set));
    specs.push(CommandSpec::sync("sinterstore", 2, 1, sinterstore).all_keys().dest_then(set));
    specs.push(CommandSpec::sync("sunionstore", 2, 1, sunionstore).all_keys().dest_then(set));
}

fn read_set<'c>(ctx: &'c mut Ctx<'_>, key: &[u8]) -> Result<Option<&'c Set>, CommandError> {
    let now = ctx.now;
    ctx.db().read::<Set>(key, now)
}

fn sorted(members: impl IntoIterator<Item = Vec<u8>>) -> Vec<Vec<u8>> {
    let mut members: Vec<Vec<u8>> = members.into_iter().collect();
    members.sort();
    members
}

fn sadd(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let added = ctx.db().write::<Set, _, _>(&args[0], now, |set| {
        let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
        Ok((added, added > 0))
    })?;
    Ok(Reply::from_usize(added))
}

fn scard(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let len = read_set(ctx, &args[0])?.map_or(0, |s| s.len());
    Ok(Reply::from_usize(len))
}

fn sismember(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let found = read_set(ctx, &args[0])?.map_or(false, |s| s.contains(&args[1]));
    Ok(Reply::from_bool(found))
}

fn smembers(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let members = read_set(ctx, &args[0])?.cloned().unwrap_or_default();
    Ok(Reply::bulks(sorted(members)))
}

fn smove(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let (src, dst, member) = (&args[0], &args[1], &args[2]);
    let now = ctx.now;
    let db = ctx.db();
    let moved = db.write::<Set, _, _>(src, now, |set| {
        let removed = set.remove(member);
        Ok((removed, removed))
    })?;
    if moved {
        db.write::<Set, _, _>(dst, now, |set| {
            set.insert(member.clone());
            Ok(((), true))
        })?;
    }
    Ok(Reply::from_bool(moved))
}

/// Optional trailing COUNT of SPOP / SRANDMEMBER.
fn count_arg(args: &[Vec<u8>]) -> Result<Option<i64>, CommandError> {
    match args {
        [] => Ok(None),
        [raw] => Ok(Some(int(raw)?)),
        _ => Err(CommandError::syntax()),
    }
}

fn spop(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let count = count_arg(&args[1..])?;
    if matches!(count, Some(n) if n < 0) {
        return Err(CommandError::malformed(VALUE_OUT_OF_RANGE));
    }
    let now = ctx.now;
    let mut rng = rand::thread_rng();
    let popped = ctx.db().write::<Set, _, _>(&args[0], now, |set| {
        let take = count.map_or(1, |n| n as usize);
        let chosen: Vec<Vec<u8>> = set.iter().cloned().choose_multiple(&mut rng, take);
        for member in &chosen {
            set.remove(member);
        }
        let changed = !chosen.is_empty();
        Ok((chosen, changed))
    })?;
    Ok(match count {
        Some(_) => Reply::bulks(popped),
        None => Reply::bulk_or_nil(popped.into_iter().next()),
    })
}

fn srandmember(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let count = count_arg(&args[1..])?;
    let members: Vec<Vec<u8>> = read_set(ctx, &args[0])?
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    Ok(match count {
        None => Reply::bulk_or_nil(members.choose(&mut rng).cloned()),
        Some(n) if n >= 0 => {
            Reply::bulks(members.iter().cloned().choose_multiple(&mut rng, n as usize))
        }
        Some(n) => {
            let picks = (0..n.unsigned_abs())
                .filter_map(|_| members.choose(&mut rng).cloned())
                .collect::<Vec<_>>();
            Reply::bulks(picks)
        }
    })
}

fn srem(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let removed = ctx.db().write::<Set, _, _>(&args[0], now, |set| {
        let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
        Ok((removed, removed > 0))
    })?;
    Ok(Reply::from_usize(removed))
}

fn sscan(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = cursor(&args[1])?;
    let opts = scan_options(&args[2..], false)?;
    let members: Vec<Vec<u8>> = read_set(ctx, &args[0])?
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();
    let (next, page) = scan_page(members, start, &opts, |_| true);
    Ok(scan_reply(next, page))
}

#[derive(Clone, Copy)]
enum SetOp {
    Diff,
    Inter,
    Union,
}

/// Folds the sets at `keys`; missing keys are empty sets.
fn combine(db: &mut Database, op: SetOp, keys: &[Vec<u8>], now: i64) -> Result<Set, CommandError> {
    let mut acc: Set = db.read::<Set>(&keys[0], now)?.cloned().unwrap_or_default();
    for key in &keys[1..] {
        if matches!(op, SetOp::Inter) && acc.is_empty() {
            break;
        }
        let other = db.read::<Set>(key, now)?;
        match op {
            SetOp::Diff => {
                if let Some(other) = other {
                    acc.retain(|m| !other.contains(m));
                }
            }
            SetOp::Inter => match other {
                Some(other) => acc.retain(|m| other.contains(m)),
                None => acc.clear(),
            },
            SetOp::Union => {
                if let Some(other) = other {
                    acc.extend(other.iter().cloned());
                }
            }
        }
    }
    Ok(acc)
}

fn set_op(ctx: &mut Ctx<'_>, op: SetOp, keys: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let result = combine(ctx.db(), op, keys, now)?;
    Ok(Reply::bulks(sorted(result)))
}

fn set_op_store(ctx: &mut Ctx<'_>, op: SetOp, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let result = combine(db, op, &args[1..], now)?;
    let len = result.len();
    db.insert(args[0].clone(), Value::Set(result));
    Ok(Reply::from_usize(len))
}

fn sdiff(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op(ctx, SetOp::Diff, args)
}

fn sinter(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op(ctx, SetOp::Inter, args)
}

fn sunion(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op(ctx, SetOp::Union, args)
}

fn sdiffstore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op_store(ctx, SetOp::Diff, args)
}

fn sinterstore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op_store(ctx, SetOp::Inter, args)
}

fn sunionstore(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    set_op_store(ctx, SetOp::Union, args)
}
