
use std::time::{Duration, Instant};

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
async fn push_pop_and_ranges() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(call(&mut s, "RPUSH", &["l", "a", "b", "c"]).await, Reply::Integer(3));
    assert_eq!(call(&mut s, "LPUSH", &["l", "z"]).await, Reply::Integer(4));
    assert_eq!(
        call(&mut s, "LRANGE", &["l", "0", "-1"]).await,
        bulks(&["z", "a", "b", "c"])
    );
    assert_eq!(call(&mut s, "LRANGE", &["l", "10", "20"]).await, bulks(&[]));
    assert_eq!(call(&mut s, "LINDEX", &["l", "-1"]).await, bulk("c"));
    assert_eq!(call(&mut s, "LINDEX", &["l", "9"]).await, Reply::Nil);

    assert_eq!(call(&mut s, "LPOP", &["l"]).await, bulk("z"));
    assert_eq!(call(&mut s, "RPOP", &["l", "2"]).await, bulks(&["c", "b"]));
    assert_eq!(call(&mut s, "LLEN", &["l"]).await, Reply::Integer(1));

    // 弹出最后一个元素后 key 被删除
    assert_eq!(call(&mut s, "LPOP", &["l"]).await, bulk("a"));
    assert_eq!(call(&mut s, "EXISTS", &["l"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "LPOP", &["l"]).await, Reply::Nil);

    assert_eq!(call(&mut s, "LPUSHX", &["l", "x"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "EXISTS", &["l"]).await, Reply::Integer(0));

    call(&mut s, "RPUSH", &["l", "x"]).await;
    let err = call_err(&mut s, "LPOP", &["l", "-1"]).await;
    assert_eq!(err.to_string(), "ERR value is out of range, must be positive");
}

#[tokio::test]
async fn insert_set_remove_trim() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "RPUSH", &["l", "a", "b", "a", "c", "a"]).await;
    assert_eq!(call(&mut s, "LREM", &["l", "-2", "a"]).await, Reply::Integer(2));
    assert_eq!(call(&mut s, "LRANGE", &["l", "0", "-1"]).await, bulks(&["a", "b", "c"]));

    assert_eq!(
        call(&mut s, "LINSERT", &["l", "BEFORE", "b", "x"]).await,
        Reply::Integer(4)
    );
    assert_eq!(
        call(&mut s, "LINSERT", &["l", "AFTER", "nope", "x"]).await,
        Reply::Integer(-1)
    );
    assert_eq!(call(&mut s, "LSET", &["l", "0", "first"]).await, Reply::ok());
    let err = call_err(&mut s, "LSET", &["l", "10", "v"]).await;
    assert_eq!(err.to_string(), "ERR index out of range");
    let err = call_err(&mut s, "LSET", &["missing", "0", "v"]).await;
    assert_eq!(err.to_string(), "ERR no such key");

    assert_eq!(call(&mut s, "LTRIM", &["l", "1", "2"]).await, Reply::ok());
    assert_eq!(call(&mut s, "LRANGE", &["l", "0", "-1"]).await, bulks(&["x", "b"]));
}

#[tokio::test]
async fn rpoplpush_and_lmove() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "RPUSH", &["src", "1", "2", "3"]).await;
    assert_eq!(call(&mut s, "RPOPLPUSH", &["src", "dst"]).await, bulk("3"));
    assert_eq!(call(&mut s, "LMOVE", &["src", "dst", "LEFT", "RIGHT"]).await, bulk("1"));
    assert_eq!(call(&mut s, "LRANGE", &["dst", "0", "-1"]).await, bulks(&["3", "1"]));

    // 同一个 key 上旋转
    assert_eq!(call(&mut s, "RPOPLPUSH", &["dst", "dst"]).await, bulk("1"));
    assert_eq!(call(&mut s, "LRANGE", &["dst", "0", "-1"]).await, bulks(&["1", "3"]));

    assert_eq!(call(&mut s, "RPOPLPUSH", &["empty", "dst"]).await, Reply::Nil);
    call(&mut s, "SET", &["str", "v"]).await;
    let err = call_err(&mut s, "RPOPLPUSH", &["src", "str"]).await;
    assert_eq!(err, CommandError::WrongType);
    let err = call_err(&mut s, "LMOVE", &["src", "dst", "UP", "LEFT"]).await;
    assert_eq!(err.to_string(), "ERR syntax error");
}

#[tokio::test]
async fn blpop_returns_immediately_when_data_exists() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "RPUSH", &["b", "x"]).await;
    assert_eq!(
        call(&mut s, "BLPOP", &["a", "b", "0"]).await,
        bulks(&["b", "x"])
    );

    let err = call_err(&mut s, "BLPOP", &["a", "-1"]).await;
    assert_eq!(err.to_string(), "ERR timeout is negative");
    let err = call_err(&mut s, "BLPOP", &["a", "never"]).await;
    assert_eq!(err.to_string(), "ERR timeout is not a float or out of range");
}

#[tokio::test]
async fn blpop_times_out_with_nil() {
    let server = Server::new();
    let mut s = server.open_session();

    let started = Instant::now();
    assert_eq!(call(&mut s, "BLPOP", &["q", "0.1"]).await, Reply::Nil);
    assert!(started.elapsed() >= Duration::from_millis(90));

    // 超时后不会残留等待者
    let mut producer = server.open_session();
    call(&mut producer, "RPUSH", &["q", "v"]).await;
    assert_eq!(call(&mut producer, "LLEN", &["q"]).await, Reply::Integer(1));
}

#[tokio::test]
async fn timeout_argument_edge_cases() {
    let server = Server::new();
    let mut s = server.open_session();

    for cmd in ["BLPOP", "BRPOP", "BZPOPMIN", "BZPOPMAX"] {
        let err = call_err(&mut s, cmd, &["k", "1e300"]).await;
        assert!(matches!(err, CommandError::MalformedArgument(_)), "{}: {:?}", cmd, err);
        assert_eq!(err.to_string(), "ERR timeout is out of range");

        let err = call_err(&mut s, cmd, &["k", "inf"]).await;
        assert_eq!(err.to_string(), "ERR timeout is not a float or out of range");
    }
    let err = call_err(&mut s, "BRPOPLPUSH", &["src", "dst", "1e300"]).await;
    assert_eq!(err.to_string(), "ERR timeout is out of range");
    let err = call_err(&mut s, "BLMOVE", &["src", "dst", "LEFT", "RIGHT", "1e300"]).await;
    assert_eq!(err.to_string(), "ERR timeout is out of range");

    // 不到一毫秒的超时照常到期
    assert_eq!(call(&mut s, "BLPOP", &["k", "0.0001"]).await, Reply::Nil);

    // 服务器仍然可用
    let mut other = server.open_session();
    assert_eq!(call(&mut other, "RPUSH", &["k", "v"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "BLPOP", &["k", "1"]).await, bulks(&["k", "v"]));
}

#[tokio::test]
async fn blpop_is_woken_by_push_from_other_session() {
    let server = Server::new();
    let mut consumer = server.open_session();
    let mut producer = server.open_session();

    let (popped, pushed) = tokio::join!(
        async { call(&mut consumer, "BLPOP", &["q", "5"]).await },
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            call(&mut producer, "RPUSH", &["q", "hello"]).await
        }
    );
    assert_eq!(pushed, Reply::Integer(1));
    assert_eq!(popped, bulks(&["q", "hello"]));
    assert_eq!(call(&mut producer, "EXISTS", &["q"]).await, Reply::Integer(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiters_are_served_in_arrival_order() {
    let server = Server::new();

    let mut first = server.open_session();
    let first_task = tokio::spawn(async move {
        first.invoke("BRPOP", ["jobs", "0"]).await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut second = server.open_session();
    let second_task = tokio::spawn(async move {
        second.invoke("BRPOP", ["jobs", "0"]).await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut producer = server.open_session();
    call(&mut producer, "LPUSH", &["jobs", "one"]).await;
    let reply = first_task.await.unwrap().unwrap();
    assert_eq!(reply, bulks(&["jobs", "one"]));

    call(&mut producer, "LPUSH", &["jobs", "two"]).await;
    let reply = second_task.await.unwrap().unwrap();
    assert_eq!(reply, bulks(&["jobs", "two"]));
}

#[tokio::test]
async fn brpoplpush_chains_to_the_next_waiter() {
    let server = Server::new();
    let mut mover = server.open_session();
    let mut reader = server.open_session();
    let mut producer = server.open_session();

    let (moved, read, _) = tokio::join!(
        async { call(&mut mover, "BRPOPLPUSH", &["in", "out", "5"]).await },
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            call(&mut reader, "BLPOP", &["out", "5"]).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            call(&mut producer, "RPUSH", &["in", "item"]).await
        }
    );
    assert_eq!(moved, bulk("item"));
    assert_eq!(read, bulks(&["out", "item"]));
    assert_eq!(call(&mut producer, "DBSIZE", &[]).await, Reply::Integer(0));
}

#[tokio::test]
async fn dropped_wait_is_deregistered() {
    let server = Server::new();
    let mut waiter = server.open_session();
    let mut producer = server.open_session();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), waiter.invoke("BLPOP", ["q", "0"])).await;
    assert!(abandoned.is_err());

    call(&mut producer, "RPUSH", &["q", "kept"]).await;
    assert_eq!(call(&mut producer, "LRANGE", &["q", "0", "-1"]).await, bulks(&["kept"]));

    // 会话关闭同样清理等待
    drop(waiter);
    assert_eq!(call(&mut producer, "LLEN", &["q"]).await, Reply::Integer(1));
}

#[tokio::test]
async fn blocking_commands_do_not_block_inside_multi() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "MULTI", &[]).await;
    assert_eq!(call(&mut s, "BLPOP", &["q", "0"]).await, Reply::status("QUEUED"));
    assert_eq!(call(&mut s, "BRPOPLPUSH", &["q", "d", "0"]).await, Reply::status("QUEUED"));
    assert_eq!(
        call(&mut s, "EXEC", &[]).await,
        Reply::Array(vec![Reply::Nil, Reply::Nil])
    );
}

#[tokio::test]
async fn blmove_wakes_on_push() {
    let server = Server::new();
    let mut mover = server.open_session();
    let mut producer = server.open_session();

    let (moved, _) = tokio::join!(
        async { call(&mut mover, "BLMOVE", &["a", "b", "LEFT", "LEFT", "5"]).await },
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            call(&mut producer, "RPUSH", &["a", "x", "y"]).await
        }
    );
    assert_eq!(moved, bulk("x"));
    assert_eq!(call(&mut producer, "LRANGE", &["a", "0", "-1"]).await, bulks(&["y"]));
    assert_eq!(call(&mut producer, "LRANGE", &["b", "0", "-1"]).await, bulks(&["x"]));
}
