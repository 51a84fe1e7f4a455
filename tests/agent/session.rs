use crate::common::{TestEngine, TestEnv, TestHost, TestObjectRuntime, TestProcess};
use crate::{init_logger, spec};
use calltrace::agent::engine::ApiMatch;
use calltrace::agent::script::Value;
use calltrace::agent::{AgentConfig, Error, Session, SessionState};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn libfoo() -> TestProcess {
    TestProcess::default()
        .with_module("libfoo.so", 0x10000)
        .with_export("libfoo.so!bar", 0x1000)
        .with_export("libfoo.so!baz", 0x1010)
}

fn start(env: &TestEnv, rules: &[&str]) -> Session {
    let mut session = Session::new(env.collaborators(), AgentConfig::default());
    session
        .init("early", serde_json::Value::Null, vec![], spec(rules))
        .unwrap();
    session
}

#[test]
fn test_trace_single_function() {
    init_logger();
    let host = TestHost::new().with_script(
        "bar",
        r#"enter { log("bar(" + args[0] + ")"); } leave { log("bar ->", retval); }"#,
    );
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let mut session = start(&env, &["include:function:libfoo.so!bar"]);

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.attached(), 1);
    assert_eq!(env.engine.attached(), 1);
    assert_eq!(
        env.host.requests.lock().unwrap().as_slice(),
        &[("handlers:native-plain:1".to_string(), 1)]
    );

    env.engine.call(0x1000, 11, &[Value::Int(5)], Value::Int(0));
    session.dispose();

    let events = env.host.events();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.target_id, 1);
        assert_eq!(event.thread_id, 11);
        assert_eq!(event.depth, 1);
    }
    assert_eq!(events[0].message, "bar(5)");
    assert_eq!(events[1].message, "bar -> 0");
    assert_eq!(
        env.host.types(),
        vec!["agent:initialized", "agent:started", "events:add"]
    );
    assert_eq!(env.host.started(), Some(1));
    assert_eq!(session.state(), SessionState::Disposed);
}

#[test]
fn test_calls_after_dispose_deliver_nothing() {
    let host = TestHost::new().with_script("bar", r#"enter { log("bar"); }"#);
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let mut session = start(&env, &["include:function:libfoo.so!bar"]);

    env.engine.call(0x1000, 1, &[], Value::Undefined);
    session.dispose();
    assert_eq!(env.host.events().len(), 1);

    for thread in 1..=4 {
        env.engine.call(0x1000, thread, &[], Value::Undefined);
    }

    // probe is still installed, but calls through it deliver nothing
    assert!(env.engine.probe(0x1000).is_some());
    assert_eq!(env.host.events().len(), 1);
    assert_eq!(env.host.types().iter().filter(|t| *t == "events:add").count(), 1);
    assert_eq!(session.state(), SessionState::Disposed);
}

#[test]
fn test_property_exclusion_overrides_include() {
    let methods = [
        ("-[Person name]", 0x10u64),
        ("-[Person setName:]", 0x11),
        ("-[Person dealloc]", 0x12),
        ("-[Person .cxx_destruct]", 0x13),
        ("+[Person alloc]", 0x14),
        ("-[Person greet:]", 0x15),
    ];
    let process = TestProcess {
        object_runtime: Some(Arc::new(TestObjectRuntime {
            methods: methods.iter().map(|(n, a)| ApiMatch::new(*n, *a)).collect(),
            ivars: HashMap::from([("Person".to_string(), vec!["_name".to_string()])]),
        })),
        ..Default::default()
    };
    let host = TestHost::new().with_default_script(r#"enter { log(name); }"#);
    let env = TestEnv::new(host, TestEngine::default(), process);

    let mut session = start(
        &env,
        &["include:object-method:*[Person *]", "exclude:object-property:Person"],
    );

    assert_eq!(env.host.started(), Some(1));
    assert_eq!(env.engine.attached(), 1);
    assert!(env.engine.probe(0x15).is_some());
    assert_eq!(
        env.host.requests.lock().unwrap().as_slice(),
        &[("handlers:native-object-oriented:1".to_string(), 1)]
    );

    env.engine.call(0x15, 1, &[], Value::Undefined);
    session.dispose();
    assert_eq!(env.host.events()[0].message, "-[Person greet:]");
}

#[test]
fn test_init_scripts_prepare_shared_state() {
    let host = TestHost::new().with_default_script(
        r#"enter { state.calls = state.calls + 1; log(state.tag, name, state.calls); }"#,
    );
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    session
        .init(
            "late",
            json!({"prefix": "trace"}),
            vec![(
                "setup.trace".to_string(),
                "state.tag = params.prefix + \":\"; state.calls = 0;".to_string(),
            )],
            spec(&["include:module-export:libfoo.so"]),
        )
        .unwrap();

    env.engine.call(0x1000, 1, &[], Value::Undefined);
    env.engine.call(0x1010, 1, &[], Value::Undefined);
    assert_eq!(session.trace_state().unwrap().get("calls"), Value::Int(2));
    session.dispose();

    let messages: Vec<String> = env.host.events().into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["trace: bar 1", "trace: baz 2"]);
    assert!(session.trace_state().is_none());
}

#[test]
fn test_init_script_failure_aborts_setup() {
    let env = TestEnv::new(TestHost::new(), TestEngine::default(), libfoo());
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    let err = session
        .init(
            "early",
            serde_json::Value::Null,
            vec![
                ("ok.trace".to_string(), "state.a = 1;".to_string()),
                ("broken.trace".to_string(), "state.b = ;".to_string()),
            ],
            spec(&["include:function:libfoo.so!bar"]),
        )
        .unwrap_err();

    assert!(matches!(&err, Error::InitScript { file, .. } if file == "broken.trace"));
    assert_eq!(session.state(), SessionState::Failed);
    let errors = env.host.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("broken.trace: "));
    assert_eq!(env.engine.attached(), 0);
}

#[test]
fn test_recoverable_target_errors_are_warnings() {
    let host = TestHost::new()
        .with_script("bar", "enter { log( }")
        .with_default_script(r#"enter { log("ok"); }"#);
    let process = libfoo().with_export("libfoo.so!qux", 0x1020);
    let env = TestEnv::new(host, TestEngine::failing_at(&[0x1010]), process);

    let session = start(&env, &["include:module-export:libfoo.so"]);

    assert_eq!(env.host.started(), Some(2));
    assert_eq!(session.attached(), 2);
    let warnings = env.host.warnings();
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].starts_with("bar: behavior script:"));
    assert!(warnings[1].starts_with("baz: attach probe at 0x1010"));

    // malformed behavior is a no-op, the probe is still there
    env.engine.call(0x1000, 1, &[], Value::Undefined);
    assert!(env.engine.probe(0x1010).is_none());
}

#[test]
fn test_update_swaps_behavior() {
    let host = TestHost::new().with_default_script(r#"enter { log("old"); }"#);
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let mut session = start(&env, &["include:function:libfoo.so!bar"]);

    session
        .update(1, "libfoo.so!bar", r#"enter { log("new", name); }"#)
        .unwrap();
    env.engine.call(0x1000, 1, &[], Value::Undefined);

    assert!(matches!(
        session.update(42, "nope", "enter {}"),
        Err(Error::UnknownTarget(42))
    ));
    assert!(matches!(
        session.update(1, "bar", "enter { log( }"),
        Err(Error::ScriptParsing(_))
    ));

    session.dispose();
    let messages: Vec<String> = env.host.events().into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["new libfoo.so!bar"]);
}

#[test]
fn test_behavior_errors_surface_on_idle() {
    let host = TestHost::new().with_default_script(r#"leave { throw "bad retval " + retval; }"#);
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let session = start(&env, &["include:function:libfoo.so!bar"]);

    env.engine.call(0x1000, 1, &[], Value::Int(-1));
    assert!(env.host.errors().is_empty());

    assert_eq!(session.run_idle(), 1);
    assert_eq!(env.host.errors(), vec!["bad retval -1".to_string()]);
    assert_eq!(session.run_idle(), 0);
}

#[test]
fn test_nested_calls_across_targets() {
    let host = TestHost::new().with_default_script(r#"enter { log(">", name); } leave { log("<", name); }"#);
    let env = TestEnv::new(host, TestEngine::default(), libfoo());
    let mut session = start(&env, &["include:module-export:libfoo.so"]);

    env.engine.enter(0x1000, 3, &[]);
    env.engine.call(0x1010, 3, &[], Value::Undefined);
    env.engine.leave(0x1000, 3, Value::Undefined);
    session.dispose();

    let trace: Vec<(u32, u32, String)> = env
        .host
        .events()
        .into_iter()
        .map(|e| (e.target_id, e.depth, e.message))
        .collect();
    assert_eq!(
        trace,
        vec![
            (1, 1, "> bar".to_string()),
            (2, 2, "> baz".to_string()),
            (2, 2, "< baz".to_string()),
            (1, 1, "< bar".to_string()),
        ]
    );
}

#[test]
fn test_handlers_are_paged_by_config() {
    let mut process = TestProcess::default();
    for n in 0..5u64 {
        process = process.with_export(&format!("libfoo.so!f{n}"), 0x1000 + n);
    }
    let env = TestEnv::new(TestHost::new(), TestEngine::default(), process);
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    let count = session
        .init(
            "late",
            json!({"config": {"handlers_page_size": 2}}),
            vec![],
            spec(&["include:module-export:libfoo.so"]),
        )
        .unwrap();

    assert_eq!(count, 5);
    let requests: Vec<(String, usize)> = env.host.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![
            ("handlers:native-plain:1".to_string(), 2),
            ("handlers:native-plain:3".to_string(), 2),
            ("handlers:native-plain:5".to_string(), 1),
        ]
    );
}

#[test]
fn test_session_lifecycle() {
    let env = TestEnv::new(TestHost::new(), TestEngine::default(), libfoo());
    let mut session = Session::new(env.collaborators(), AgentConfig::default());
    assert_eq!(session.state(), SessionState::Created);
    assert!(matches!(
        session.update(1, "bar", "enter {}"),
        Err(Error::InvalidState(_, _))
    ));

    // nothing matches, still a running session
    assert_eq!(
        session
            .init("early", serde_json::Value::Null, vec![], spec(&["include:function:nothing"]))
            .unwrap(),
        0
    );
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(env.host.types(), vec!["agent:initialized", "agent:started"]);

    assert!(matches!(
        session.init("early", serde_json::Value::Null, vec![], spec(&[])),
        Err(Error::InvalidState("running", "created"))
    ));

    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);
}
