use log::info;

use super::args::is;
use super::{CommandSpec, Ctx};
use crate::error::CommandError;
use crate::reply::Reply;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("dbsize", 0, 0, dbsize));
    specs.push(CommandSpec::sync("flushdb", 0, 1, flushdb));
    specs.push(CommandSpec::sync("flushall", 0, 1, flushall));
    specs.push(CommandSpec::sync("time", 0, 0, time));
    specs.push(CommandSpec::sync("save", 0, 0, save));
    specs.push(CommandSpec::sync("bgsave", 0, 1, bgsave));
    specs.push(CommandSpec::sync("lastsave", 0, 0, lastsave));
}

fn dbsize(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let now = ctx.now;
    Ok(Reply::from_usize(ctx.db().len(now)))
}

/// Optional ASYNC modifier; flushing is synchronous either way.
fn flush_mode(args: &[Vec<u8>]) -> Result<(), CommandError> {
    match args {
        [] => Ok(()),
        [mode] if is(mode, "async") => Ok(()),
        _ => Err(CommandError::syntax()),
    }
}

fn flushdb(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    flush_mode(args)?;
    ctx.db().flush();
    info!("db {} flushed by session {}", ctx.client.db, ctx.client.id);
    Ok(Reply::ok())
}

fn flushall(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    flush_mode(args)?;
    for db in ctx.state.dbs.iter_mut() {
        db.flush();
    }
    info!("all databases flushed by session {}", ctx.client.id);
    Ok(Reply::ok())
}

/// `[seconds, microseconds]` of the invocation clock.
fn time(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let secs = ctx.now.div_euclid(1000);
    let micros = ctx.now.rem_euclid(1000) * 1000;
    Ok(Reply::bulks([
        secs.to_string().into_bytes(),
        micros.to_string().into_bytes(),
    ]))
}

// 没有持久化，SAVE/BGSAVE 只更新 LASTSAVE
fn save(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    ctx.state.lastsave = ctx.now.div_euclid(1000);
    Ok(Reply::ok())
}

fn bgsave(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    match args {
        [] => {}
        [opt] if is(opt, "schedule") => {}
        _ => return Err(CommandError::syntax()),
    }
    ctx.state.lastsave = ctx.now.div_euclid(1000);
    Ok(Reply::status("Background saving started"))
}

fn lastsave(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::Integer(ctx.state.lastsave))
}
