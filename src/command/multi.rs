use log::debug;

use super::{run_now, CommandSpec, Ctx, Mode, TX_CONTROL};
use crate::error::{CommandError, MULTI_NESTED, WATCH_INSIDE_MULTI};
use crate::reply::Reply;
use crate::transaction::TxState;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("multi", 0, 0, multi).flags(TX_CONTROL));
    specs.push(CommandSpec::sync("exec", 0, 0, exec).flags(TX_CONTROL));
    specs.push(CommandSpec::sync("discard", 0, 0, discard).flags(TX_CONTROL));
    specs.push(CommandSpec::sync("watch", 1, 1, watch).all_keys().flags(TX_CONTROL));
    specs.push(CommandSpec::sync("unwatch", 0, 0, unwatch));
}

fn multi(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if ctx.client.tx.is_active() {
        return Err(CommandError::rejected(MULTI_NESTED));
    }
    ctx.client.tx.begin();
    Ok(Reply::ok())
}

fn exec(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let state = ctx.client.tx.state();
    if state == TxState::Normal {
        return Err(CommandError::rejected("ERR EXEC without MULTI"));
    }
    let queue = ctx.client.tx.take_queue();
    let intact = ctx.client.tx.watches_intact(&mut ctx.state.dbs, ctx.now);
    ctx.client.tx.clear_watches(&mut ctx.state.dbs, ctx.client.id);

    if state == TxState::Aborted {
        return Err(CommandError::TransactionAborted);
    }
    if !intact {
        debug!("session {}: watched key changed, EXEC aborted", ctx.client.id);
        return Ok(Reply::Nil);
    }

    let outer = ctx.mode;
    ctx.mode = Mode::Exec;
    let replies = queue
        .into_iter()
        .map(|queued| match run_now(ctx, queued.spec, &queued.args) {
            Ok(reply) => reply,
            Err(err) => Reply::Error(err),
        })
        .collect();
    ctx.mode = outer;
    Ok(Reply::Array(replies))
}

fn discard(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if !ctx.client.tx.is_active() {
        return Err(CommandError::rejected("ERR DISCARD without MULTI"));
    }
    ctx.client.tx.take_queue();
    ctx.client.tx.clear_watches(&mut ctx.state.dbs, ctx.client.id);
    Ok(Reply::ok())
}

fn watch(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if ctx.client.tx.is_active() {
        return Err(CommandError::rejected(WATCH_INSIDE_MULTI));
    }
    let (session, index, now) = (ctx.client.id, ctx.client.db, ctx.now);
    for key in args {
        let db = &mut ctx.state.dbs[index];
        db.add_watcher(key, session);
        let version = db.version_of(key, now);
        ctx.client.tx.watch(index, key.clone(), version);
    }
    Ok(Reply::ok())
}

fn unwatch(ctx: &mut Ctx<'_>, _args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    ctx.client.tx.clear_watches(&mut ctx.state.dbs, ctx.client.id);
    Ok(Reply::ok())
}
