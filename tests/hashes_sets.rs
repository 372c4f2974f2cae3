
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

#[tokio::test]
async fn hashes() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(
        call(&mut s, "HSET", &["h", "f1", "v1", "f2", "v2"]).await,
        Reply::Integer(2)
    );
    assert_eq!(call(&mut s, "HSET", &["h", "f1", "new"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "HSETNX", &["h", "f1", "x"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "HGET", &["h", "f1"]).await, bulk("new"));
    assert_eq!(
        call(&mut s, "HMGET", &["h", "f1", "nope"]).await,
        Reply::Array(vec![bulk("new"), Reply::Nil])
    );
    assert_eq!(call(&mut s, "HMSET", &["h", "n", "5"]).await, Reply::ok());
    assert_eq!(call(&mut s, "HINCRBY", &["h", "n", "3"]).await, Reply::Integer(8));
    assert_eq!(call(&mut s, "HINCRBYFLOAT", &["h", "n", "0.5"]).await, bulk("8.5"));
    assert_eq!(call(&mut s, "HSTRLEN", &["h", "f2"]).await, Reply::Integer(2));
    assert_eq!(call(&mut s, "HLEN", &["h"]).await, Reply::Integer(3));
    assert_eq!(call(&mut s, "HKEYS", &["h"]).await, bulks(&["f1", "f2", "n"]));
    assert_eq!(
        call(&mut s, "HGETALL", &["h"]).await,
        bulks(&["f1", "new", "f2", "v2", "n", "8.5"])
    );

    let err = call_err(&mut s, "HINCRBY", &["h", "f1", "1"]).await;
    assert_eq!(err.to_string(), "ERR value is not an integer or out of range");

    assert_eq!(call(&mut s, "HDEL", &["h", "f1", "f2", "n"]).await, Reply::Integer(3));
    assert_eq!(call(&mut s, "EXISTS", &["h"]).await, Reply::Integer(0));
}

#[tokio::test]
async fn sets_and_set_algebra() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(call(&mut s, "SADD", &["a", "1", "2", "3", "2"]).await, Reply::Integer(3));
    call(&mut s, "SADD", &["b", "2", "3", "4"]).await;
    assert_eq!(call(&mut s, "SCARD", &["a"]).await, Reply::Integer(3));
    assert_eq!(call(&mut s, "SISMEMBER", &["a", "9"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "SMEMBERS", &["a"]).await, bulks(&["1", "2", "3"]));

    assert_eq!(call(&mut s, "SINTER", &["a", "b"]).await, bulks(&["2", "3"]));
    assert_eq!(call(&mut s, "SDIFF", &["a", "b"]).await, bulks(&["1"]));
    assert_eq!(call(&mut s, "SUNION", &["a", "b"]).await, bulks(&["1", "2", "3", "4"]));
    assert_eq!(call(&mut s, "SINTER", &["a", "missing"]).await, bulks(&[]));
    assert_eq!(
        call(&mut s, "SUNIONSTORE", &["dest", "a", "b"]).await,
        Reply::Integer(4)
    );

    assert_eq!(call(&mut s, "SMOVE", &["a", "b", "1"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "SMOVE", &["a", "b", "1"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "SREM", &["b", "1", "4"]).await, Reply::Integer(2));

    let popped = call(&mut s, "SPOP", &["a", "5"]).await.into_array().unwrap();
    assert_eq!(popped.len(), 2);
    assert_eq!(call(&mut s, "EXISTS", &["a"]).await, Reply::Integer(0));

    let sample = call(&mut s, "SRANDMEMBER", &["b", "-5"]).await.into_array().unwrap();
    assert_eq!(sample.len(), 5);

    call(&mut s, "SET", &["str", "x"]).await;
    let err = call_err(&mut s, "SUNION", &["a", "str"]).await;
    assert_eq!(err, CommandError::WrongType);
    // 目标 key 的类型不检查，直接覆盖
    assert_eq!(
        call(&mut s, "SINTERSTORE", &["str", "b", "dest"]).await,
        Reply::Integer(2)
    );
    assert_eq!(call(&mut s, "TYPE", &["str"]).await, Reply::status("set"));
}
