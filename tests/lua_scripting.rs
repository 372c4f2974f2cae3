
use redust_emu::{
    CommandError, Reply, ScriptExecutor, ScriptHost, ScriptSource, Server, Session,
};

fn bulk(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
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
async fn eval_returns_converted_values() {
    let server = Server::new();
    let mut s = server.open_session();

    assert_eq!(call(&mut s, "EVAL", &["return 1", "0"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "EVAL", &["return 3.99", "0"]).await, Reply::Integer(3));
    assert_eq!(call(&mut s, "EVAL", &["return 'hi'", "0"]).await, bulk("hi"));
    assert_eq!(call(&mut s, "EVAL", &["return true", "0"]).await, Reply::Integer(1));
    assert_eq!(call(&mut s, "EVAL", &["return false", "0"]).await, Reply::Nil);
    assert_eq!(
        call(&mut s, "EVAL", &["return {1, 'two', {3}}", "0"]).await,
        Reply::Array(vec![
            Reply::Integer(1),
            bulk("two"),
            Reply::Array(vec![Reply::Integer(3)])
        ])
    );
    assert_eq!(
        call(&mut s, "EVAL", &["return redis.status_reply('FINE')", "0"]).await,
        Reply::status("FINE")
    );

    let err = call_err(&mut s, "EVAL", &["return redis.error_reply('MY failure')", "0"]).await;
    assert_eq!(err.to_string(), "MY failure");
}

#[tokio::test]
async fn keys_and_argv_are_split_by_numkeys() {
    let server = Server::new();
    let mut s = server.open_session();

    let script = "return {KEYS[1], KEYS[2], ARGV[1]}";
    assert_eq!(
        call(&mut s, "EVAL", &[script, "2", "k1", "k2", "a1"]).await,
        Reply::Array(vec![bulk("k1"), bulk("k2"), bulk("a1")])
    );

    let err = call_err(&mut s, "EVAL", &["return 1", "-1"]).await;
    assert_eq!(err.to_string(), "ERR Number of keys can't be negative");
    let err = call_err(&mut s, "EVAL", &["return 1", "3", "a"]).await;
    assert_eq!(
        err.to_string(),
        "ERR Number of keys can't be greater than number of args"
    );
    let err = call_err(&mut s, "EVAL", &["return 1", "x"]).await;
    assert_eq!(err.to_string(), "ERR value is not an integer or out of range");
}

#[tokio::test]
async fn redis_call_reaches_the_keyspace() {
    let server = Server::new();
    let mut s = server.open_session();

    let script = "redis.call('SET', KEYS[1], ARGV[1]); return redis.call('INCRBY', KEYS[1], 5)";
    assert_eq!(
        call(&mut s, "EVAL", &[script, "1", "counter", "10"]).await,
        Reply::Integer(15)
    );
    assert_eq!(call(&mut s, "GET", &["counter"]).await, bulk("15"));

    assert_eq!(
        call(&mut s, "EVAL", &["return redis.call('SET', 'a', 'b')", "0"]).await,
        Reply::ok()
    );
    assert_eq!(
        call(&mut s, "EVAL", &["return redis.call('GET', 'missing')", "0"]).await,
        Reply::Nil
    );

    // 脚本里看到的是调用者选中的库
    call(&mut s, "SELECT", &["4"]).await;
    call(&mut s, "EVAL", &["return redis.call('SET', 'in4', '1')", "0"]).await;
    assert_eq!(call(&mut s, "GET", &["in4"]).await, bulk("1"));
}

#[tokio::test]
async fn call_raises_and_pcall_returns_errors() {
    let server = Server::new();
    let mut s = server.open_session();
    call(&mut s, "RPUSH", &["list", "x"]).await;

    let err = call_err(&mut s, "EVAL", &["return redis.call('GET', KEYS[1])", "1", "list"]).await;
    match &err {
        CommandError::Script { message, .. } => {
            assert!(message.contains("WRONGTYPE"), "message: {}", message)
        }
        other => panic!("expected script error, got {:?}", other),
    }
    assert!(err.to_string().starts_with("ERR Error running script (call to f_"));

    let script = "local r = redis.pcall('GET', KEYS[1]); return type(r) == 'table' and r.err ~= nil";
    assert_eq!(
        call(&mut s, "EVAL", &[script, "1", "list"]).await,
        Reply::Integer(1)
    );

    let err = call_err(&mut s, "EVAL", &["return redis.pcall('NOSUCH')", "0"]).await;
    assert_eq!(err.to_string(), "ERR unknown command 'NOSUCH'");

    let err = call_err(&mut s, "EVAL", &["error('boom')", "0"]).await;
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn denied_commands_and_globals() {
    let server = Server::new();
    let mut s = server.open_session();

    for denied in ["BLPOP", "WATCH", "SUBSCRIBE", "EVAL"] {
        let script = format!("return redis.pcall('{}', 'x', '0')", denied);
        let err = call_err(&mut s, "EVAL", &[script.as_str(), "0"]).await;
        assert_eq!(
            err.to_string(),
            "ERR This Redis command is not allowed from scripts",
            "{}",
            denied
        );
    }

    let err = call_err(&mut s, "EVAL", &["leak = 1", "0"]).await;
    assert!(err.to_string().contains("global variable"), "{}", err);
    let err = call_err(&mut s, "EVAL", &["return undefined_thing", "0"]).await;
    assert!(err.to_string().contains("nonexistent global"), "{}", err);

    assert_eq!(
        call(&mut s, "EVAL", &["local x = 5; return x", "0"]).await,
        Reply::Integer(5)
    );
}

#[tokio::test]
async fn script_cache_commands() {
    let server = Server::new();
    let mut s = server.open_session();

    let sha = call(&mut s, "SCRIPT", &["LOAD", "return ARGV[1]"]).await;
    let sha = String::from_utf8(sha.as_bytes().unwrap().to_vec()).unwrap();
    assert_eq!(sha.len(), 40);

    assert_eq!(
        call(&mut s, "EVALSHA", &[sha.as_str(), "0", "echo"]).await,
        bulk("echo")
    );
    let upper = sha.to_ascii_uppercase();
    assert_eq!(
        call(&mut s, "EVALSHA", &[upper.as_str(), "0", "x"]).await,
        bulk("x")
    );
    assert_eq!(
        call(&mut s, "SCRIPT", &["EXISTS", sha.as_str(), "ffff"]).await,
        Reply::Array(vec![Reply::Integer(1), Reply::Integer(0)])
    );

    // EVAL 也会缓存脚本
    call(&mut s, "EVAL", &["return 1", "0"]).await;
    assert_eq!(
        call(
            &mut s,
            "SCRIPT",
            &["EXISTS", "e0e1f9fabfc9d4800c877a703b823ac0578ff8db"]
        )
        .await,
        Reply::Array(vec![Reply::Integer(1)])
    );

    assert_eq!(call(&mut s, "SCRIPT", &["FLUSH"]).await, Reply::ok());
    let err = call_err(&mut s, "EVALSHA", &[sha.as_str(), "0"]).await;
    assert_eq!(err.to_string(), "NOSCRIPT No matching script. Please use EVAL.");
    assert_eq!(err.kind(), "NOSCRIPT");

    let err = call_err(&mut s, "SCRIPT", &["KILL"]).await;
    assert_eq!(err.to_string(), "ERR Unknown SCRIPT subcommand or wrong # of args.");
}

#[tokio::test]
async fn scripts_inside_multi_run_at_exec() {
    let server = Server::new();
    let mut s = server.open_session();

    call(&mut s, "MULTI", &[]).await;
    assert_eq!(
        call(&mut s, "EVAL", &["return redis.call('INCR', 'n')", "0"]).await,
        Reply::status("QUEUED")
    );
    assert_eq!(
        call(&mut s, "EXEC", &[]).await,
        Reply::Array(vec![Reply::Integer(1)])
    );
}

/// 不跑 Lua，只把脚本体当成命令行转发
struct EchoExecutor;

impl ScriptExecutor for EchoExecutor {
    fn execute(
        &self,
        script: ScriptSource<'_>,
        keys: &[Vec<u8>],
        args: &[Vec<u8>],
        host: &mut dyn ScriptHost,
    ) -> Result<Reply, CommandError> {
        let mut words = script.body.split(|b| *b == b' ').map(|w| w.to_vec());
        let name = words.next().unwrap_or_default();
        let mut argv: Vec<Vec<u8>> = words.collect();
        argv.extend(keys.iter().cloned());
        argv.extend(args.iter().cloned());
        host.call(&name, argv)
    }
}

#[tokio::test]
async fn custom_executor_goes_through_the_pipeline() {
    let server = Server::builder().executor(EchoExecutor).build();
    let mut s = server.open_session();

    assert_eq!(
        call(&mut s, "EVAL", &["SET", "1", "k", "v"]).await,
        Reply::ok()
    );
    assert_eq!(call(&mut s, "GET", &["k"]).await, bulk("v"));

    let err = call_err(&mut s, "EVAL", &["BLPOP", "1", "k", "0"]).await;
    assert_eq!(err.to_string(), "ERR This Redis command is not allowed from scripts");
}
