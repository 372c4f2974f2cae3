
use redust_emu::{CommandError, Reply, Server, Session};

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
async fn hyperloglog_counts() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(call(&mut s, "PFADD", &["h1", "a", "b", "c"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "PFADD", &["h1", "a"]).await, Reply::Integer(0));
    assert_eq!(call(&mut s, "PFADD", &["empty"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "PFCOUNT", &["h1"]).await, Reply::Integer(3));

    call(&mut s, "PFADD", &["h2", "c", "d"]).await;
    assert_eq!(call(&mut s, "PFCOUNT", &["h1", "h2"]).await, Reply::Integer(4));
    assert_eq!(call(&mut s, "PFMERGE", &["h3", "h1", "h2"]).await, Reply::ok());
    assert_eq!(call(&mut s, "PFCOUNT", &["h3"]).await, Reply::Integer(4));
    assert_eq!(call(&mut s, "TYPE", &["h3"]).await, Reply::status("string"));

    call(&mut s, "SET", &["str", "x"]).await;
    let err = call_err(&mut s, "PFADD", &["str", "a"]).await;
    assert_eq!(err, CommandError::WrongType);

    let items: Vec<String> = (0..1000).map(|i| format!("item-{}", i)).collect();
    let mut args: Vec<&str> = vec!["big"];
    args.extend(items.iter().map(String::as_str));
    call(&mut s, "PFADD", &args).await;
    let estimate = call(&mut s, "PFCOUNT", &["big"]).await.as_integer().unwrap();
    assert!((950..=1050).contains(&estimate), "estimate {}", estimate);
}
