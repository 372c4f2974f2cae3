use super::args::parse_int;
use super::{CommandSpec, Ctx, PUBSUB_OK};
use crate::error::{CommandError, INVALID_DB};
use crate::reply::Reply;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("ping", 0, 1, ping).flags(PUBSUB_OK));
    specs.push(CommandSpec::sync("echo", 1, 0, echo));
    specs.push(CommandSpec::sync("select", 1, 0, select));
    specs.push(CommandSpec::sync("swapdb", 2, 0, swapdb));
    specs.push(CommandSpec::sync("quit", 0, 0, quit).flags(PUBSUB_OK));
}

/// Database index in `0..databases`.
pub(super) fn db_index(ctx: &Ctx<'_>, arg: &[u8]) -> Result<usize, CommandError> {
    match parse_int(arg) {
        Some(n) if n >= 0 && (n as usize) < ctx.state.dbs.len() => Ok(n as usize),
        _ => Err(CommandError::malformed(INVALID_DB)),
    }
}

fn ping(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if args.len() > 1 {
        return Err(CommandError::arity("ping"));
    }
    if ctx.state.pubsub.subscription_count(ctx.client.id) > 0 {
        let payload = args.first().cloned().unwrap_or_default();
        return Ok(Reply::Array(vec![Reply::bulk("pong"), Reply::Bulk(payload)]));
    }
    Ok(match args.first() {
        Some(msg) => Reply::Bulk(msg.clone()),
        None => Reply::status("PONG"),
    })
}

fn echo(_ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::Bulk(args[0].clone()))
}

fn select(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    ctx.client.db = db_index(ctx, &args[0])?;
    Ok(Reply::ok())
}

fn swapdb(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let a = db_index(ctx, &args[0])?;
    let b = db_index(ctx, &args[1])?;
    if a != b {
        let (lo, hi) = (a.min(b), a.max(b));
        let (left, right) = ctx.state.dbs.split_at_mut(hi);
        left[lo].swap_contents(&mut right[0]);
    }
    Ok(Reply::ok())
}

fn quit(_ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::ok())
}
