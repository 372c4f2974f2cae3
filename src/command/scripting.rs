use log::debug;

use super::args::{int, is};
use super::{dispatch_from_script, CommandSpec, Ctx, Mode};
use crate::error::{CommandError, NEGATIVE_KEYS, NO_MATCHING_SCRIPT, TOO_MANY_KEYS};
use crate::reply::Reply;
use crate::scripting::{ScriptHost, ScriptSource};

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("eval", 2, 1, eval));
    specs.push(CommandSpec::sync("evalsha", 2, 1, evalsha));
    specs.push(CommandSpec::sync("script", 1, 1, script));
}

/// Re-enters the engine for the session running the script.
struct EngineHost<'c, 'a> {
    ctx: &'c mut Ctx<'a>,
}

impl ScriptHost for EngineHost<'_, '_> {
    fn call(&mut self, command: &[u8], args: Vec<Vec<u8>>) -> Result<Reply, CommandError> {
        dispatch_from_script(&mut *self.ctx, command, &args)
    }
}

/// `numkeys key... arg...` after the script argument.
fn split_keys(args: &[Vec<u8>]) -> Result<(&[Vec<u8>], &[Vec<u8>]), CommandError> {
    let numkeys = int(&args[0])?;
    if numkeys < 0 {
        return Err(CommandError::malformed(NEGATIVE_KEYS));
    }
    let rest = &args[1..];
    let numkeys = numkeys as usize;
    if numkeys > rest.len() {
        return Err(CommandError::malformed(TOO_MANY_KEYS));
    }
    Ok(rest.split_at(numkeys))
}

fn run_script(
    ctx: &mut Ctx<'_>,
    sha: &str,
    body: &[u8],
    args: &[Vec<u8>],
) -> Result<Reply, CommandError> {
    let (keys, argv) = split_keys(args)?;
    let executor = ctx.shared.executor.clone();
    debug!("session {} running script {}", ctx.client.id, sha);

    let outer = ctx.mode;
    ctx.mode = Mode::Script;
    let result = {
        let mut host = EngineHost { ctx: &mut *ctx };
        executor.execute(ScriptSource { sha, body }, keys, argv, &mut host)
    };
    ctx.mode = outer;

    match result? {
        Reply::Error(err) => Err(err),
        reply => Ok(reply),
    }
}

fn eval(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let body = &args[0];
    let sha = ctx.shared.scripts.load(body);
    run_script(ctx, &sha, body, &args[1..])
}

fn evalsha(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let sha = String::from_utf8_lossy(&args[0]).to_ascii_lowercase();
    let body = ctx
        .shared
        .scripts
        .get(&sha)
        .ok_or_else(|| CommandError::rejected(NO_MATCHING_SCRIPT))?;
    run_script(ctx, &sha, &body, &args[1..])
}

/// SCRIPT LOAD body | EXISTS sha... | FLUSH
fn script(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let cache = &ctx.shared.scripts;
    let (sub, rest) = (&args[0], &args[1..]);
    if is(sub, "load") && rest.len() == 1 {
        return Ok(Reply::bulk(cache.load(&rest[0])));
    }
    if is(sub, "exists") && !rest.is_empty() {
        let found = rest
            .iter()
            .map(|sha| {
                let sha = String::from_utf8_lossy(sha).to_ascii_lowercase();
                Reply::from_bool(cache.exists(&sha))
            })
            .collect();
        return Ok(Reply::Array(found));
    }
    if is(sub, "flush") && rest.len() <= 1 {
        cache.flush();
        return Ok(Reply::ok());
    }
    Err(CommandError::bad_subcommand("SCRIPT"))
}
