use super::args::is;
use super::{CommandSpec, Ctx, PUBSUB_OK};
use crate::error::CommandError;
use crate::pubsub::Target;
use crate::reply::Reply;

pub(super) fn register(specs: &mut Vec<CommandSpec>) {
    specs.push(CommandSpec::sync("subscribe", 1, 1, subscribe).flags(PUBSUB_OK));
    specs.push(CommandSpec::sync("psubscribe", 1, 1, psubscribe).flags(PUBSUB_OK));
    specs.push(CommandSpec::sync("unsubscribe", 0, 1, unsubscribe).flags(PUBSUB_OK));
    specs.push(CommandSpec::sync("punsubscribe", 0, 1, punsubscribe).flags(PUBSUB_OK));
    specs.push(CommandSpec::sync("publish", 2, 0, publish));
    specs.push(CommandSpec::sync("pubsub", 1, 1, pubsub));
}

fn ack(kind: &str, name: Option<&[u8]>, count: usize) -> Reply {
    Reply::Array(vec![
        Reply::bulk(kind),
        name.map_or(Reply::Nil, |n| Reply::Bulk(n.to_vec())),
        Reply::from_usize(count),
    ])
}

fn add(ctx: &mut Ctx<'_>, args: &[Vec<u8>], target: Target, kind: &str) -> Reply {
    let session = ctx.client.id;
    let acks = args
        .iter()
        .map(|name| {
            let count = ctx.state.pubsub.subscribe(session, target, name);
            ack(kind, Some(name), count)
        })
        .collect();
    Reply::Array(acks)
}

/// No names means everything the session is subscribed to.
fn remove(ctx: &mut Ctx<'_>, args: &[Vec<u8>], target: Target, kind: &str) -> Reply {
    let session = ctx.client.id;
    let registry = &mut ctx.state.pubsub;
    let names = if args.is_empty() {
        registry.subscriptions_of(session, target)
    } else {
        args.to_vec()
    };
    if names.is_empty() {
        let count = registry.subscription_count(session);
        return Reply::Array(vec![ack(kind, None, count)]);
    }
    let acks = names
        .iter()
        .map(|name| {
            let count = registry.unsubscribe(session, target, name);
            ack(kind, Some(name), count)
        })
        .collect();
    Reply::Array(acks)
}

fn subscribe(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(add(ctx, args, Target::Channel, "subscribe"))
}

fn psubscribe(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(add(ctx, args, Target::Pattern, "psubscribe"))
}

fn unsubscribe(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(remove(ctx, args, Target::Channel, "unsubscribe"))
}

fn punsubscribe(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(remove(ctx, args, Target::Pattern, "punsubscribe"))
}

fn publish(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let reached = ctx.state.pubsub.publish(&args[0], &args[1]);
    Ok(Reply::from_usize(reached))
}

/// PUBSUB CHANNELS [pattern] | NUMSUB [channel ...] | NUMPAT
fn pubsub(ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let registry = &ctx.state.pubsub;
    let (sub, rest) = (&args[0], &args[1..]);
    if is(sub, "channels") && rest.len() <= 1 {
        let pattern = rest.first().map(Vec::as_slice);
        return Ok(Reply::bulks(registry.channels(pattern)));
    }
    if is(sub, "numsub") {
        let mut out = Vec::with_capacity(rest.len() * 2);
        for channel in rest {
            out.push(Reply::Bulk(channel.clone()));
            out.push(Reply::from_usize(registry.numsub(channel)));
        }
        return Ok(Reply::Array(out));
    }
    if is(sub, "numpat") && rest.is_empty() {
        return Ok(Reply::from_usize(registry.numpat()));
    }
    Err(CommandError::bad_subcommand("PUBSUB"))
}
