use crate::common::{TestCall, TestEngine, TestEnv, TestHost, TestManagedRuntime, TestProcess};
use crate::{init_logger, spec};
use calltrace::agent::engine::{LoaderId, ManagedException, ManagedRuntime};
use calltrace::agent::plan::managed::ManagedPlan;
use calltrace::agent::script::Value;
use calltrace::agent::{AgentConfig, Error, Session, SessionState};
use std::sync::atomic::Ordering;

fn api_runtime() -> TestManagedRuntime {
    TestManagedRuntime::default()
        .with_class(
            None,
            "com.example.Api",
            &["get(): java.lang.String", "get(int): java.lang.String", "close(): void"],
        )
        .with_class(Some("dalvik.system.PathClassLoader@1"), "com.example.Plugin", &["get(): java.lang.String"])
}

#[test]
fn test_merge_is_commutative_across_passes() {
    let runtime = api_runtime();
    let passes = ["com.example.Api!get", "com.example.*!*", "*.Plugin!get"];

    let mut forward = ManagedPlan::default();
    for pattern in passes {
        forward.include(runtime.methods_matching(pattern));
    }
    let mut backward = ManagedPlan::default();
    for pattern in passes.iter().rev() {
        backward.include(runtime.methods_matching(pattern));
    }

    assert_eq!(forward.method_count(), backward.method_count());
    for plan in [&forward, &backward] {
        let default = plan.groups().iter().find(|g| g.loader.is_none()).unwrap();
        let api = default.class("com.example.Api").unwrap();
        assert_eq!(api.get("get"), Some("get(int): java.lang.String"));
        assert_eq!(api.get("close"), Some("close(): void"));

        let plugin = plan
            .groups()
            .iter()
            .find(|g| g.loader == Some(LoaderId("dalvik.system.PathClassLoader@1".to_string())))
            .unwrap();
        assert_eq!(plugin.class("com.example.Plugin").unwrap().len(), 1);
    }
}

#[test]
fn test_managed_pipeline_replaces_every_overload() {
    init_logger();
    let host = TestHost::new().with_script("get", r#"enter { log("get", args[0]); } leave { return "patched"; }"#);
    let env = TestEnv::new(host, TestEngine::default(), TestProcess::default()).with_managed(api_runtime());
    let runtime = env.managed.clone().unwrap();
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    let count = session
        .init(
            "late",
            serde_json::Value::Null,
            vec![],
            spec(&[
                "include:managed-method:com.example.*!*",
                "exclude:managed-method:com.example.Api!close",
            ]),
        )
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(env.host.started(), Some(2));
    assert_eq!(session.state(), SessionState::Running);
    // one pass for the deferred rules, one for the hooks
    assert_eq!(runtime.performed.load(Ordering::SeqCst), 2);

    let api = runtime.class(None, "com.example.Api");
    assert_eq!(api.replaced.lock().unwrap().len(), 2);
    let mut call = TestCall {
        thread_id: 4,
        args: vec![Value::Int(7)],
        result: Ok(Value::Str("real".to_string())),
    };
    assert_eq!(
        api.call("get(int): java.lang.String", &mut call).unwrap(),
        Value::Str("patched".to_string())
    );

    session.dispose();
    let events = env.host.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "get 7");
    assert_eq!(events[0].depth, 1);
    assert_eq!(events[0].thread_id, 4);
}

#[test]
fn test_managed_exception_reaches_traced_call() {
    let host = TestHost::new().with_script("close", r#"enter { raise "java.lang.IllegalStateException"; }"#);
    let env = TestEnv::new(host, TestEngine::default(), TestProcess::default()).with_managed(api_runtime());
    let runtime = env.managed.clone().unwrap();
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    session
        .init(
            "late",
            serde_json::Value::Null,
            vec![],
            spec(&["include:managed-method:com.example.Api!close"]),
        )
        .unwrap();

    let mut call = TestCall {
        thread_id: 1,
        args: vec![],
        result: Ok(Value::Undefined),
    };
    let err = runtime
        .class(None, "com.example.Api")
        .call("close(): void", &mut call)
        .unwrap_err();
    assert_eq!(
        err,
        ManagedException::new("java.lang.IllegalStateException", "raised by com.example.Api.close")
    );
    assert_eq!(session.run_idle(), 0);
}

#[test]
fn test_missing_managed_runtime_is_fatal() {
    let env = TestEnv::new(
        TestHost::new(),
        TestEngine::default(),
        TestProcess::default().with_export("libfoo.so!bar", 0x1000),
    );
    let mut session = Session::new(env.collaborators(), AgentConfig::default());

    let err = session
        .init(
            "late",
            serde_json::Value::Null,
            vec![],
            spec(&[
                "include:function:libfoo.so!bar",
                "include:managed-method:com.example.*!*",
            ]),
        )
        .unwrap_err();

    assert!(matches!(err, Error::ManagedRuntimeUnavailable));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(
        env.host.errors(),
        vec!["managed runtime is required but not available".to_string()]
    );
    assert_eq!(env.host.types(), vec!["agent:error".to_string()]);
    assert_eq!(env.engine.attached(), 0);
}
