//! List commands, including the blocking pops.

use std::collections::VecDeque;

use super::args::{self, fix_range, int, is};
use super::{CommandSpec, Ctx, Flow, WaitRequest};
use crate::blocking::WaitOp;
use crate::error::{CommandError, INDEX_OUT_OF_RANGE, NO_KEY, VALUE_OUT_OF_RANGE};
use crate::reply::Reply;
use crate::storage::{Database, Key, ValueKind};

type List = VecDeque<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum End {
    Left,
    Right,
}

impl End {
    fn parse(arg: &[u8]) -> Result<End, CommandError> {
        if is(arg, "left") {
            Ok(End::Left)
        } else if is(arg, "right") {
            Ok(End::Right)
        } else {
            Err(CommandError::syntax())
        }
    }

    fn pop(self, list: &mut List) -> Option<Vec<u8>> {
        match self {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        }
    }

    fn push(self, list: &mut List, value: Vec<u8>) {
        match self {
            End::Left => list.push_front(value),
            End::Right => list.push_back(value),
        }
    }
}

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let list = ValueKind::List;
    specs.push(CommandSpec::blocking("blpop", 2, 1, blpop).keys(0, 1, 1));
    specs.push(CommandSpec::blocking("brpop", 2, 1, brpop).keys(0, 1, 1));
    specs.push(CommandSpec::blocking("brpoplpush", 3, 0, brpoplpush).keys(0, 1, 1));
    specs.push(CommandSpec::blocking("blmove", 5, 0, blmove).keys(0, 3, 1));
    specs.push(CommandSpec::sync("lindex", 2, 0, lindex).key().kind(list));
    specs.push(CommandSpec::sync("linsert", 4, 0, linsert).key().kind(list));
    specs.push(CommandSpec::sync("llen", 1, 0, llen).key().kind(list));
    specs.push(CommandSpec::sync("lpop", 1, 1, lpop).key().kind(list));
    specs.push(CommandSpec::sync("rpop", 1, 1, rpop).key().kind(list));
    specs.push(CommandSpec::sync("lpush", 2, 1, lpush).key().kind(list));
    specs.push(CommandSpec::sync("rpush", 2, 1, rpush).key().kind(list));
    specs.push(CommandSpec::sync("lpushx", 2, 1, lpushx).key().kind(list));
    specs.push(CommandSpec::sync("rpushx", 2, 1, rpushx).key().kind(list));
    specs.push(CommandSpec::sync("lrange", 3, 0, lrange).key().kind(list));
    specs.push(CommandSpec::sync("lrem", 3, 0, lrem).key().kind(list));
    specs.push(CommandSpec::sync("lset", 3, 0, lset).key().kind(list));
    specs.push(CommandSpec::sync("ltrim", 3, 0, ltrim).key().kind(list));
    specs.push(CommandSpec::sync("rpoplpush", 2, 0, rpoplpush).keys(0, 0, 1).kind(list));
    specs.push(CommandSpec::sync("lmove", 4, 0, lmove).keys(0, 2, 1).kind(list));
}

// ============================================================================
// Operations shared with the blocking registry
// ============================================================================

/// Pops from the first non-empty list in `keys`, replying `[key, value]`.
/// With `strict` a key of another type is WRONGTYPE, otherwise it is skipped.
pub(crate) fn list_pop(
    db: &mut Database,
    keys: &[Key],
    end: End,
    now: i64,
    strict: bool,
) -> Result<Option<Reply>, CommandError> {
    for key in keys {
        match db.kind_of(key, now) {
            None => continue,
            Some(ValueKind::List) => {}
            Some(_) if strict => return Err(CommandError::WrongType),
            Some(_) => continue,
        }
        let popped = db.write::<List, _, _>(key, now, |list| {
            let value = end.pop(list);
            let changed = value.is_some();
            Ok((value, changed))
        })?;
        if let Some(value) = popped {
            return Ok(Some(Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(value)])));
        }
    }
    Ok(None)
}

/// Moves one element from `source` to `dest`, replying with the element.
/// `None` while the source is empty. A non-list destination is always
/// WRONGTYPE; a non-list source only when `strict`.
pub(crate) fn list_move(
    db: &mut Database,
    source: &[u8],
    dest: &[u8],
    from: End,
    to: End,
    now: i64,
    strict: bool,
) -> Result<Option<Reply>, CommandError> {
    match db.kind_of(source, now) {
        None => return Ok(None),
        Some(ValueKind::List) => {}
        Some(_) if strict => return Err(CommandError::WrongType),
        Some(_) => return Ok(None),
    }
    if matches!(db.kind_of(dest, now), Some(kind) if kind != ValueKind::List) {
        return Err(CommandError::WrongType);
    }
    let popped = db.write::<List, _, _>(source, now, |list| {
        let value = from.pop(list);
        let changed = value.is_some();
        Ok((value, changed))
    })?;
    let Some(value) = popped else {
        return Ok(None);
    };
    db.write::<List, _, _>(dest, now, |list| {
        to.push(list, value.clone());
        Ok(((), true))
    })?;
    Ok(Some(Reply::Bulk(value)))
}

// ============================================================================
// Blocking variants
// ============================================================================

fn park(ctx: &Ctx<'_>, op: WaitOp, timeout: Option<std::time::Duration>) -> Flow {
    if ctx.may_block() {
        Flow::Wait(WaitRequest { op, timeout })
    } else {
        Flow::Done(Reply::Nil)
    }
}

fn blocking_pop(ctx: &mut Ctx<'_>, args: &[Vec<u8>], end: End) -> Result<Flow, CommandError> {
    let (timeout_arg, keys) = args.split_last().ok_or_else(CommandError::syntax)?;
    let timeout = args::timeout(timeout_arg)?;
    let keys = keys.to_vec();
    let now = ctx.now;
    if let Some(reply) = list_pop(ctx.db(), &keys, end, now, true)? {
        return Ok(Flow::Done(reply));
    }
    Ok(park(ctx, WaitOp::Pop { keys, end }, timeout))
}

fn blpop(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    blocking_pop(ctx, args, End::Left)
}

fn brpop(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    blocking_pop(ctx, args, End::Right)
}

fn blocking_move(
    ctx: &mut Ctx<'_>,
    source: &[u8],
    dest: &[u8],
    from: End,
    to: End,
    timeout_arg: &[u8],
) -> Result<Flow, CommandError> {
    let timeout = args::timeout(timeout_arg)?;
    let now = ctx.now;
    if let Some(reply) = list_move(ctx.db(), source, dest, from, to, now, true)? {
        return Ok(Flow::Done(reply));
    }
    let op = WaitOp::Move {
        source: source.to_vec(),
        dest: dest.to_vec(),
        from,
        to,
    };
    Ok(park(ctx, op, timeout))
}

fn brpoplpush(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    blocking_move(ctx, &args[0], &args[1], End::Right, End::Left, &args[2])
}

fn blmove(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Flow, CommandError> {
    let from = End::parse(&args[2])?;
    let to = End::parse(&args[3])?;
    blocking_move(ctx, &args[0], &args[1], from, to, &args[4])
}

// ============================================================================
// Plain list commands
// ============================================================================

fn read_list<'c>(ctx: &'c mut Ctx<'_>, key: &[u8]) -> Result<Option<&'c List>, CommandError> {
    let now = ctx.now;
    ctx.db().read::<List>(key, now)
}

fn lindex(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let index = int(&args[1])?;
    let Some(list) = read_list(ctx, &args[0])? else {
        return Ok(Reply::Nil);
    };
    let len = list.len() as i64;
    let index = if index < 0 { index + len } else { index };
    if index < 0 || index >= len {
        return Ok(Reply::Nil);
    }
    Ok(Reply::bulk_or_nil(list.get(index as usize).cloned()))
}

fn linsert(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let after = if is(&args[1], "after") {
        true
    } else if is(&args[1], "before") {
        false
    } else {
        return Err(CommandError::syntax());
    };
    let (pivot, value) = (&args[2], &args[3]);
    let now = ctx.now;
    let db = ctx.db();
    if !db.contains(&args[0], now) {
        return Ok(Reply::Integer(0));
    }
    let len = db.write::<List, _, _>(&args[0], now, |list| {
        let Some(at) = list.iter().position(|item| item == pivot) else {
            return Ok((-1, false));
        };
        let at = if after { at + 1 } else { at };
        list.insert(at, value.clone());
        Ok((list.len() as i64, true))
    })?;
    Ok(Reply::Integer(len))
}

fn llen(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let len = read_list(ctx, &args[0])?.map_or(0, |l| l.len());
    Ok(Reply::from_usize(len))
}

/// LPOP/RPOP. With a count the reply is an array; a zero count or a
/// missing key is nil either way.
fn pop(ctx: &mut Ctx<'_>, args: &[Vec<u8>], end: End) -> Result<Reply, CommandError> {
    let count = match &args[1..] {
        [] => None,
        [raw] => match int(raw)? {
            n if n < 0 => return Err(CommandError::malformed(VALUE_OUT_OF_RANGE)),
            0 => return Ok(Reply::Nil),
            n => Some(n as usize),
        },
        _ => return Err(CommandError::syntax()),
    };
    let now = ctx.now;
    let popped = ctx.db().write::<List, _, _>(&args[0], now, |list| {
        let take = count.unwrap_or(1).min(list.len());
        let popped: Vec<Vec<u8>> = (0..take).filter_map(|_| end.pop(list)).collect();
        let changed = !popped.is_empty();
        Ok((popped, changed))
    })?;
    if popped.is_empty() {
        return Ok(Reply::Nil);
    }
    Ok(match count {
        Some(_) => Reply::bulks(popped),
        None => Reply::bulk_or_nil(popped.into_iter().next()),
    })
}

fn lpop(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    pop(ctx, args, End::Left)
}

fn rpop(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    pop(ctx, args, End::Right)
}

fn push(ctx: &mut Ctx<'_>, args: &[Vec<u8>], end: End, only_existing: bool) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    if only_existing && !db.contains(&args[0], now) {
        return Ok(Reply::Integer(0));
    }
    let len = db.write::<List, _, _>(&args[0], now, |list| {
        for value in &args[1..] {
            end.push(list, value.clone());
        }
        Ok((list.len(), true))
    })?;
    Ok(Reply::from_usize(len))
}

fn lpush(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    push(ctx, args, End::Left, false)
}

fn rpush(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    push(ctx, args, End::Right, false)
}

fn lpushx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    push(ctx, args, End::Left, true)
}

fn rpushx(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    push(ctx, args, End::Right, true)
}

fn lrange(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = int(&args[1])?;
    let stop = int(&args[2])?;
    let Some(list) = read_list(ctx, &args[0])? else {
        return Ok(Reply::Array(Vec::new()));
    };
    let (start, end) = fix_range(start, stop, list.len());
    Ok(Reply::bulks(list.range(start..end).cloned()))
}

fn lrem(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let count = int(&args[1])?;
    let value = &args[2];
    let now = ctx.now;
    let removed = ctx.db().write::<List, _, _>(&args[0], now, |list| {
        let found: Vec<usize> = list
            .iter()
            .enumerate()
            .filter(|(_, item)| *item == value)
            .map(|(i, _)| i)
            .collect();
        let limit = count.unsigned_abs() as usize;
        let chosen: Vec<usize> = match count {
            0 => found,
            c if c > 0 => found.into_iter().take(limit).collect(),
            _ => {
                let skip = found.len().saturating_sub(limit);
                found.into_iter().skip(skip).collect()
            }
        };
        for &i in chosen.iter().rev() {
            list.remove(i);
        }
        Ok((chosen.len(), !chosen.is_empty()))
    })?;
    Ok(Reply::from_usize(removed))
}

fn lset(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let index = int(&args[1])?;
    let now = ctx.now;
    let db = ctx.db();
    if !db.contains(&args[0], now) {
        return Err(CommandError::rejected(NO_KEY));
    }
    db.write::<List, _, _>(&args[0], now, |list| {
        let len = list.len() as i64;
        let at = if index < 0 { index + len } else { index };
        if at < 0 || at >= len {
            return Err(CommandError::malformed(INDEX_OUT_OF_RANGE));
        }
        list[at as usize] = args[2].clone();
        Ok(((), true))
    })?;
    Ok(Reply::ok())
}

fn ltrim(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = int(&args[1])?;
    let stop = int(&args[2])?;
    let now = ctx.now;
    ctx.db().write::<List, _, _>(&args[0], now, |list| {
        let before = list.len();
        let (start, end) = fix_range(start, stop, before);
        list.truncate(end);
        list.drain(..start.min(list.len()));
        Ok(((), list.len() != before))
    })?;
    Ok(Reply::ok())
}

fn rpoplpush(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let moved = list_move(ctx.db(), &args[0], &args[1], End::Right, End::Left, now, true)?;
    Ok(moved.unwrap_or(Reply::Nil))
}

fn lmove(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let from = End::parse(&args[2])?;
    let to = End::parse(&args[3])?;
    let now = ctx.now;
    let moved = list_move(ctx.db(), &args[0], &args[1], from, to, now, true)?;
    Ok(moved.unwrap_or(Reply::Nil))
}
