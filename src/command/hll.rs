use super::{CommandSpec, Ctx};
use crate::error::CommandError;
use crate::hyperloglog::HyperLogLog;
use crate::reply::Reply;
use crate::storage::ValueKind;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    let hll = ValueKind::HyperLogLog;
    specs.push(CommandSpec::sync("pfadd", 1, 1, pfadd).key().kind(hll));
    specs.push(CommandSpec::sync("pfcount", 1, 1, pfcount).all_keys().kind(hll));
    specs.push(CommandSpec::sync("pfmerge", 1, 1, pfmerge).all_keys().kind(hll));
}

/// PFADD key [element ...]: 1 if the key was created or a register moved.
fn pfadd(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let existed = db.contains(&args[0], now);
    let changed = db.write::<HyperLogLog, _, _>(&args[0], now, |hll| {
        let mut changed = !existed;
        for element in &args[1..] {
            changed |= hll.add(element);
        }
        Ok((changed, changed))
    })?;
    Ok(Reply::from_bool(changed))
}

/// Cardinality of the union of all given HyperLogLogs.
fn pfcount(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let mut union = HyperLogLog::new();
    for key in args {
        if let Some(hll) = db.read::<HyperLogLog>(key, now)? {
            union.merge(hll);
        }
    }
    Ok(Reply::Integer(union.count() as i64))
}

/// PFMERGE dest src...: dest is included in the union and always created.
fn pfmerge(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    let db = ctx.db();
    let mut union = HyperLogLog::new();
    for key in args {
        if let Some(hll) = db.read::<HyperLogLog>(key, now)? {
            union.merge(hll);
        }
    }
    db.write::<HyperLogLog, _, _>(&args[0], now, |dest| {
        *dest = union;
        Ok(((), true))
    })?;
    Ok(Reply::ok())
}
