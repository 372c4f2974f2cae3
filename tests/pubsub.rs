
use std::time::Duration;

use redust_emu::{CommandError, Message, Reply, Server, Session};

fn bulk(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
}

fn ack(kind: &str, name: Option<&str>, count: i64) -> Reply {
    Reply::Array(vec![
        bulk(kind),
        name.map_or(Reply::Nil, bulk),
        Reply::Integer(count),
    ])
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

async fn next(session: &mut Session) -> Message {
    tokio::time::timeout(Duration::from_secs(1), session.next_message())
        .await
        .expect("no message within 1s")
        .expect("mailbox closed")
}

#[tokio::test]
async fn subscribe_acks_count_every_subscription() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(
        call(&mut s, "SUBSCRIBE", &["a", "b"]).await,
        Reply::Array(vec![
            ack("subscribe", Some("a"), 1),
            ack("subscribe", Some("b"), 2)
        ])
    );
    assert_eq!(
        call(&mut s, "PSUBSCRIBE", &["news.*"]).await,
        Reply::Array(vec![ack("psubscribe", Some("news.*"), 3)])
    );
    // 重复订阅不增加计数
    assert_eq!(
        call(&mut s, "SUBSCRIBE", &["a"]).await,
        Reply::Array(vec![ack("subscribe", Some("a"), 3)])
    );

    assert_eq!(
        call(&mut s, "UNSUBSCRIBE", &[]).await,
        Reply::Array(vec![
            ack("unsubscribe", Some("a"), 2),
            ack("unsubscribe", Some("b"), 1)
        ])
    );
    assert_eq!(
        call(&mut s, "PUNSUBSCRIBE", &[]).await,
        Reply::Array(vec![ack("punsubscribe", Some("news.*"), 0)])
    );
    assert_eq!(
        call(&mut s, "PUNSUBSCRIBE", &[]).await,
        Reply::Array(vec![ack("punsubscribe", None, 0)])
    );
}

#[tokio::test]
async fn publish_delivers_messages_and_pmessages() {
    let server = Server::new();
    let mut sub = server.open_session();
    let mut psub = server.open_session();
    let mut publisher = server.open_session();

    call(&mut sub, "SUBSCRIBE", &["news.tech"]).await;
    call(&mut psub, "PSUBSCRIBE", &["news.*"]).await;

    assert_eq!(
        call(&mut publisher, "PUBLISH", &["news.tech", "rust"]).await,
        Reply::Integer(2)
    );
    assert_eq!(
        call(&mut publisher, "PUBLISH", &["sports", "none"]).await,
        Reply::Integer(0)
    );

    let message = next(&mut sub).await;
    assert_eq!(message.channel, b"news.tech");
    assert_eq!(message.pattern, None);
    assert_eq!(
        message.to_reply(),
        Reply::Array(vec![bulk("message"), bulk("news.tech"), bulk("rust")])
    );

    let message = next(&mut psub).await;
    assert_eq!(message.pattern.as_deref(), Some(&b"news.*"[..]));
    assert_eq!(
        message.to_reply(),
        Reply::Array(vec![
            bulk("pmessage"),
            bulk("news.*"),
            bulk("news.tech"),
            bulk("rust")
        ])
    );
    assert!(sub.try_next_message().is_none());
}

#[tokio::test]
async fn one_delivery_per_session() {
    let server = Server::new();
    let mut s = server.open_session();
    let mut publisher = server.open_session();

    call(&mut s, "SUBSCRIBE", &["chan"]).await;
    call(&mut s, "PSUBSCRIBE", &["ch*", "c*"]).await;

    assert_eq!(
        call(&mut publisher, "PUBLISH", &["chan", "hi"]).await,
        Reply::Integer(1)
    );
    let message = next(&mut s).await;
    assert_eq!(message.pattern, None);
    assert!(s.try_next_message().is_none());
}

#[tokio::test]
async fn subscribed_session_is_restricted() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "SUBSCRIBE", &["chan"]).await;
    let err = call_err(&mut s, "GET", &["k"]).await;
    assert_eq!(
        err.to_string(),
        "ERR only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT allowed in this context"
    );
    assert_eq!(
        call(&mut s, "PING", &[]).await,
        Reply::Array(vec![bulk("pong"), bulk("")])
    );
    assert_eq!(
        call(&mut s, "PING", &["hey"]).await,
        Reply::Array(vec![bulk("pong"), bulk("hey")])
    );

    call(&mut s, "UNSUBSCRIBE", &["chan"]).await;
    assert_eq!(call(&mut s, "GET", &["k"]).await, Reply::Nil);
    assert_eq!(call(&mut s, "PING", &[]).await, Reply::status("PONG"));
}

#[tokio::test]
async fn pubsub_introspection() {
    let server = Server::new();
    let mut a = server.open_session();
    let mut b = server.open_session();
    let mut admin = server.open_session();

    call(&mut a, "SUBSCRIBE", &["news", "sports"]).await;
    call(&mut b, "SUBSCRIBE", &["news"]).await;
    call(&mut b, "PSUBSCRIBE", &["x*", "y*"]).await;

    assert_eq!(
        call(&mut admin, "PUBSUB", &["CHANNELS"]).await,
        Reply::Array(vec![bulk("news"), bulk("sports")])
    );
    assert_eq!(
        call(&mut admin, "PUBSUB", &["channels", "s*"]).await,
        Reply::Array(vec![bulk("sports")])
    );
    assert_eq!(
        call(&mut admin, "PUBSUB", &["NUMSUB", "news", "none"]).await,
        Reply::Array(vec![
            bulk("news"),
            Reply::Integer(2),
            bulk("none"),
            Reply::Integer(0)
        ])
    );
    assert_eq!(call(&mut admin, "PUBSUB", &["NUMPAT"]).await, Reply::Integer(2));

    let err = call_err(&mut admin, "PUBSUB", &["HELP"]).await;
    assert_eq!(err.to_string(), "ERR Unknown PUBSUB subcommand or wrong # of args.");

    // 关闭会话后订阅随之消失
    drop(b);
    assert_eq!(call(&mut admin, "PUBSUB", &["NUMPAT"]).await, Reply::Integer(0));
    assert_eq!(
        call(&mut admin, "PUBLISH", &["news", "x"]).await,
        Reply::Integer(1)
    );
}
