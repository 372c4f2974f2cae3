
use std::time::Duration;

use redust_emu::{CommandError, Reply, Server, Session};

fn bulk(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
}

fn bulks(items: &[&str]) -> Reply {
    Reply::Array(items.iter().map(|s| bulk(s)).collect())
}

async fn call(session: &mut Session, name: &str, args: &[&str]) -> Reply {
    session
        .invoke(name, args.iter().copied())
        .await
        .unwrap_or_else(|e| panic!("{} {:?} failed: {}", name, args, e))
}

async fn call_err(session: &mut Session, name: &str, args: &[&str]) -> CommandError {
    match session.invoke(name, args.iter().copied()).await {
        Ok(reply) => panic!("{} {:?} unexpectedly returned {:?}", name, args, reply),
        Err(e) => e,
    }
}

async fn seed(s: &mut Session) {
    call(s, "ZADD", &["z", "1", "a", "2", "b", "3", "c", "4", "d"]).await;
}

#[tokio::test]
async fn zadd_flags() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(call(&mut s, "ZADD", &["z", "1", "a", "2", "b"]).await, Reply::Integer(2));
    assert_eq!(call(&mut s, "ZADD", &["z", "5", "a", "3", "c"]).await, Reply::Integer(1));
    assert_eq!(
        call(&mut s, "ZADD", &["z", "CH", "6", "a", "2", "b"]).await,
        Reply::Integer(1)
    );
    assert_eq!(call(&mut s, "ZADD", &["z", "NX", "9", "a"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "ZADD", &["z", "XX", "1", "new"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "ZSCORE", &["z", "a"]).await, bulk("6"));
    assert_eq!(call(&mut s, "ZSCORE", &["z", "new"]).await, Reply::Nil);

    assert_eq!(call(&mut s, "ZADD", &["z", "INCR", "1.5", "a"]).await, bulk("7.5"));
    assert_eq!(call(&mut s, "ZADD", &["z", "XX", "INCR", "1", "nope"]).await, Reply::Nil);
    assert_eq!(call(&mut s, "ZINCRBY", &["z", "-0.5", "a"]).await, bulk("7"));

    let err = call_err(&mut s, "ZADD", &["z", "NX", "XX", "1", "a"]).await;
    assert_eq!(err.to_string(), "ERR ZADD allows either 'nx' or 'xx', not both");
    let err = call_err(&mut s, "ZADD", &["z", "INCR", "1", "a", "2", "b"]).await;
    assert_eq!(
        err.to_string(),
        "ERR INCR option supports a single increment-element pair"
    );
    let err = call_err(&mut s, "ZADD", &["z", "one", "a"]).await;
    assert_eq!(err.to_string(), "ERR value is not a valid float");
}

#[tokio::test]
async fn ranges_by_rank_score_and_lex() {
    let server = Server::new();
    let mut s = server.open_session();
    seed(&mut s).await;

    assert_eq!(call(&mut s, "ZCARD", &["z"]).await, Reply::Integer(4));
    assert_eq!(
        call(&mut s, "ZRANGE", &["z", "0", "1", "WITHSCORES"]).await,
        bulks(&["a", "1", "b", "2"])
    );
    assert_eq!(call(&mut s, "ZREVRANGE", &["z", "0", "1"]).await, bulks(&["d", "c"]));
    assert_eq!(
        call(&mut s, "ZRANGEBYSCORE", &["z", "(1", "3"]).await,
        bulks(&["b", "c"])
    );
    assert_eq!(
        call(&mut s, "ZRANGEBYSCORE", &["z", "-inf", "+inf", "LIMIT", "1", "2"]).await,
        bulks(&["b", "c"])
    );
    assert_eq!(
        call(&mut s, "ZREVRANGEBYSCORE", &["z", "+inf", "(2"]).await,
        bulks(&["d", "c"])
    );
    assert_eq!(call(&mut s, "ZCOUNT", &["z", "2", "(4"]).await, Reply::Integer(2));
    assert_eq!(call(&mut s, "ZRANK", &["z", "c"]).await, Reply::Integer(2));
    assert_eq!(call(&mut s, "ZREVRANK", &["z", "c"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "ZRANK", &["z", "nope"]).await, Reply::Nil);

    let err = call_err(&mut s, "ZRANGEBYSCORE", &["z", "low", "3"]).await;
    assert_eq!(err.to_string(), "ERR min or max is not a float");

    call(&mut s, "ZADD", &["lex", "0", "a", "0", "b", "0", "c", "0", "d"]).await;
    assert_eq!(
        call(&mut s, "ZRANGEBYLEX", &["lex", "[b", "(d"]).await,
        bulks(&["b", "c"])
    );
    assert_eq!(
        call(&mut s, "ZREVRANGEBYLEX", &["lex", "+", "[c"]).await,
        bulks(&["d", "c"])
    );
    assert_eq!(call(&mut s, "ZLEXCOUNT", &["lex", "-", "+"]).await, Reply::Integer(4));
    let err = call_err(&mut s, "ZRANGEBYLEX", &["lex", "b", "d"]).await;
    assert_eq!(err.to_string(), "ERR min or max not a valid string range item");
}

#[tokio::test]
async fn removals_and_pops() {
    let server = Server::new();
    let mut s = server.open_session();
    seed(&mut s).await;

    assert_eq!(call(&mut s, "ZREM", &["z", "a", "zz"]).await, Reply::Integer(1));
    assert_eq!(
        call(&mut s, "ZREMRANGEBYSCORE", &["z", "4", "4"]).await,
        Reply::Integer(1)
    );
    assert_eq!(
        call(&mut s, "ZPOPMIN", &["z"]).await,
        bulks(&["b", "2"])
    );
    assert_eq!(
        call(&mut s, "ZPOPMAX", &["z", "5"]).await,
        bulks(&["c", "3"])
    );
    assert_eq!(call(&mut s, "EXISTS", &["z"]).await, Reply::Integer(0));

    seed(&mut s).await;
    assert_eq!(
        call(&mut s, "ZREMRANGEBYRANK", &["z", "0", "-2"]).await,
        Reply::Integer(3)
    );
    assert_eq!(call(&mut s, "ZRANGE", &["z", "0", "-1"]).await, bulks(&["d"]));
}

#[tokio::test]
async fn union_and_intersection_store() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "ZADD", &["a", "1", "x", "2", "y"]).await;
    call(&mut s, "ZADD", &["b", "10", "y", "20", "z"]).await;
    call(&mut s, "SADD", &["plain", "x"]).await;

    assert_eq!(
        call(&mut s, "ZUNIONSTORE", &["u", "2", "a", "b"]).await,
        Reply::Integer(3)
    );
    assert_eq!(
        call(&mut s, "ZRANGE", &["u", "0", "-1", "WITHSCORES"]).await,
        bulks(&["x", "1", "y", "12", "z", "20"])
    );

    assert_eq!(
        call(
            &mut s,
            "ZINTERSTORE",
            &["i", "2", "a", "b", "WEIGHTS", "2", "1", "AGGREGATE", "MAX"]
        )
        .await,
        Reply::Integer(1)
    );
    assert_eq!(call(&mut s, "ZSCORE", &["i", "y"]).await, bulk("10"));

    // 普通集合按分数 1 参与运算
    assert_eq!(
        call(&mut s, "ZUNIONSTORE", &["m", "2", "a", "plain", "AGGREGATE", "SUM"]).await,
        Reply::Integer(2)
    );
    assert_eq!(call(&mut s, "ZSCORE", &["m", "x"]).await, bulk("2"));

    let err = call_err(&mut s, "ZUNIONSTORE", &["u", "0", "a"]).await;
    assert_eq!(
        err.to_string(),
        "ERR at least 1 input key is needed for ZUNIONSTORE/ZINTERSTORE"
    );
}

#[tokio::test]
async fn bzpopmin_wakes_on_zadd() {
    let server = Server::new();
    let mut waiter = server.open_session();
    let mut writer = server.open_session();

    let (popped, _) = tokio::join!(
        async { call(&mut waiter, "BZPOPMIN", &["scores", "5"]).await },
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            call(&mut writer, "ZADD", &["scores", "3", "c", "1", "a"]).await
        }
    );
    assert_eq!(popped, bulks(&["scores", "a", "1"]));
    assert_eq!(
        call(&mut writer, "BZPOPMAX", &["scores", "0"]).await,
        bulks(&["scores", "c", "3"])
    );
    assert_eq!(call(&mut writer, "BZPOPMAX", &["scores", "0.05"]).await, Reply::Nil);
}
