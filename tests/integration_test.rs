use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use anyhow::Result;
use mlua::{Lua, Value};

use hostlua::bindings::{marshal, Binder};
use hostlua::config::{NamespaceConfig, RuntimeConfig};
use hostlua::core::error::{BindError, CompileError, ExecError, HostResult};
use hostlua::host::{
    ExecContext, FunctionInfo, HostValue, IntoHost, ObjectRef, Resource, Store, TypeRegistry,
};
use hostlua::scripting::{execute_with, DialectCompiler, ModuleIndex, ModuleResolver, RunStatus};

// 只扫描给定目录，不读取环境变量
fn config_for(dir: &Path) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.modules.path = Some(format!("{}/?.lua;{}/?/init.lua", dir.display(), dir.display()));
    config.modules.cpath = Some(String::new());
    config.modules.include_cwd = false;
    config.modules.native_modules = false;
    config
}

fn client() -> (ObjectRef, HostValue) {
    let store = ObjectRef::new(Store::new("cluster"));
    (store.clone(), HostValue::ptr(store))
}

fn run(config: RuntimeConfig, source: &str) -> hostlua::core::error::ExecResult<String> {
    execute_with(
        config,
        Arc::new(TypeRegistry::builtin()),
        ExecContext::new("default", "test"),
        source,
        client().1,
    )
}

#[test]
fn test_struct_round_trip_identity() -> Result<()> {
    let lua = Lua::new();
    marshal::prepare(&lua)?;

    let resource = ObjectRef::new(Resource::new("Deployment", "web"));
    let proxy = marshal::to_script(&lua, &HostValue::Struct(resource.clone()))?;
    lua.globals().set("r", proxy)?;

    // 脚本读取并改写字段后，仍能还原出同一个宿主对象
    lua.load("r.name = 'changed'; r.extra = true").exec()?;
    let back = marshal::to_host(&lua, &lua.globals().get::<Value>("r")?)?;
    assert!(ObjectRef::ptr_eq(back.as_object().unwrap(), &resource));
    Ok(())
}

#[test]
fn test_objects_round_trip_through_store() -> Result<()> {
    let (store, client) = client();
    let output = execute_with(
        RuntimeConfig::default(),
        Arc::new(TypeRegistry::builtin()),
        ExecContext::new("default", "store"),
        r#"
        local r = client.NewResource("Deployment", "api")
        client.Put("api", r)
        print(client.Get("api") ~= nil, client.Len())
        "#,
        client,
    )?;
    assert_eq!(output, "true 1\n");

    let stored = store.with(|s: &Store| s.entry("api").cloned()).flatten().unwrap();
    assert_eq!(stored.as_object().unwrap().field("kind")?, Some("Deployment".into_host()));
    Ok(())
}

#[test]
fn test_require_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("counter.lua"),
        "loads = (loads or 0) + 1\nreturn { value = loads }",
    )?;
    fs::create_dir_all(dir.path().join("pkg"))?;
    fs::write(dir.path().join("pkg/init.lua"), "return { name = ... }")?;

    let output = run(
        config_for(dir.path()),
        r#"
        local a = require("counter")
        local b = require("counter")
        print(rawequal(a, b), loads, a.value, require("pkg").name)
        "#,
    )?;
    assert_eq!(output, "true 1 1 pkg\n");
    Ok(())
}

#[test]
fn test_unknown_module_fails_script() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(config_for(dir.path()), "require('missing.module')");
    let status = RunStatus::from_result(&result);
    assert!(status.status_text().contains("module not found: missing.module"));
}

#[test]
fn test_self_referencing_tables_fail_the_script() {
    for source in [
        "local t = {} t.self = t print(t)",
        "print(_G)",
        "local t = { 1 } t[2] = t client.Put('k', t)",
    ] {
        let result = run(RuntimeConfig::default(), source);
        let status = RunStatus::from_result(&result);
        assert!(
            status.status_text().contains("contains itself"),
            "{}: {}",
            source,
            status
        );
    }

    // 共享但无环的子表可以正常转换
    let output = run(
        RuntimeConfig::default(),
        "local s = { 1 } print({ a = s, b = s })",
    )
    .unwrap();
    assert!(output.contains("a:[1]") && output.contains("b:[1]"), "{}", output);
}

#[test]
fn test_integral_collapse() -> Result<()> {
    let lua = Lua::new();
    marshal::prepare(&lua)?;
    lua.globals().set("three", marshal::to_script(&lua, &HostValue::Float(3.0))?)?;
    lua.globals().set("half", marshal::to_script(&lua, &HostValue::Float(3.5))?)?;
    let (a, b): (String, String) = lua.load("return math.type(three), math.type(half)").eval()?;
    assert_eq!((a.as_str(), b.as_str()), ("integer", "float"));
    Ok(())
}

#[test]
fn test_method_arity_is_strict_but_functions_are_not() {
    for call in ["client.Put('k')", "client.Put('k', 1, 2)"] {
        let result = run(RuntimeConfig::default(), call);
        assert!(matches!(result, Err(ExecError::Script(ref msg)) if msg.contains("expects 2 arguments")));
    }
    let output = run(RuntimeConfig::default(), "print(client.Version('extra', 'args'))").unwrap();
    assert_eq!(output, "v1\n");
}

#[test]
fn test_instances_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("shared.lua"),
        "hits = (hits or 0) + 1\nreturn hits",
    )
    .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|marker| {
            let config = config_for(dir.path());
            let barrier = barrier.clone();
            thread::spawn(move || {
                let registry = TypeRegistry::global();
                barrier.wait();
                let source = format!(
                    "assert(marker == nil) marker = '{}' require('shared') require('shared') print(marker, hits)",
                    marker
                );
                execute_with(
                    config,
                    registry,
                    ExecContext::new("default", marker),
                    &source,
                    HostValue::ptr(ObjectRef::new(Store::new(marker))),
                )
            })
        })
        .collect();

    let mut outputs: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();
    outputs.sort();
    assert_eq!(outputs, vec!["a 1\n".to_string(), "b 1\n".to_string()]);
}

#[test]
fn test_unexposable_object_installs_nothing() -> Result<()> {
    let lua = Lua::new();
    let binder = Binder::new(&lua, Arc::new(TypeRegistry::builtin()))?;
    let before: usize = lua.globals().pairs::<Value, Value>().count();

    let err = binder
        .expose_object("client", &HostValue::Struct(ObjectRef::new(Store::new("s"))))
        .unwrap_err();
    assert!(matches!(err, BindError::NotPointer { .. }));
    assert!(err.to_string().contains("client"));

    let after: usize = lua.globals().pairs::<Value, Value>().count();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_non_pointer_client_aborts_before_script() {
    let result = execute_with(
        RuntimeConfig::default(),
        Arc::new(TypeRegistry::builtin()),
        ExecContext::new("default", "x"),
        "print('unreachable')",
        HostValue::Struct(ObjectRef::new(Resource::new("Pod", "p"))),
    );
    assert!(matches!(result, Err(ExecError::Setup(BindError::NotPointer { .. }))));
}

#[test]
fn test_dialect_teardown_on_parse_failure() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join("moonscript"))?;
    fs::write(
        dir.path().join("moonscript/parse.lua"),
        "return { string = function(src) return nil, 'bad indent' end }",
    )?;
    fs::write(
        dir.path().join("moonscript/compile.lua"),
        "return { tree = function(tree) return 'return 1' end }",
    )?;

    let config = config_for(dir.path());
    let lua = Lua::new();
    let resolver = ModuleResolver::new(ModuleIndex::from_config(&config.modules));
    resolver.install(&lua)?;

    let compiler = DialectCompiler::from_config(&config);
    let err = compiler.compile_in(&lua, "x = ->").unwrap_err();
    assert!(matches!(err, CompileError::Parse(ref msg) if msg == "bad indent"));
    assert!(lua.globals().get::<Value>("__dialect_source")?.is_nil());
    assert!(!resolver.is_loaded(&lua, "moonscript.parse")?);
    Ok(())
}

#[test]
fn test_bridged_module_functions_are_placeholders() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("fakepeg.lua"),
        "return { version = '1.1', match = function(s, p) return s:find(p) end }",
    )?;
    let mut config = config_for(dir.path());
    config.bridge.modules = vec!["fakepeg".to_string()];

    let output = run(
        config,
        r#"
        local peg = require("fakepeg")
        local ok, err = pcall(peg.match, "abc", "b")
        print(peg.version, ok, string.find(tostring(err), "cannot be called", 1, true) ~= nil)
        "#,
    )?;
    assert_eq!(output, "1.1 false true\n");
    Ok(())
}

#[test]
fn test_configured_namespace() -> Result<()> {
    let mut config = RuntimeConfig::default();
    config.binding.namespaces.push(NamespaceConfig {
        name: "core".to_string(),
        package: "store".to_string(),
    });
    let output = run(
        config,
        r#"
        local r = core.Resource:new({ name = "db", replicas = 2, ready = "yes" })
        local snap = r:get()
        print(snap.name, snap.replicas, snap.ready)
        "#,
    )?;
    assert_eq!(output, "db 2 false\n");
    Ok(())
}

#[test]
fn test_strict_policy_raises() {
    let mut config = RuntimeConfig::default();
    config.binding.assign_policy = hostlua::bindings::AssignPolicy::Strict;
    config.binding.namespaces.push(NamespaceConfig {
        name: "core".to_string(),
        package: "store".to_string(),
    });
    let result = run(config, "core.Resource:new({ replicas = 'two' })");
    assert!(matches!(result, Err(ExecError::Script(ref msg)) if msg.contains("field replicas expects int")));
}

fn explode(_args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
    panic!("kaboom")
}

#[test]
fn test_host_panic_is_reported() {
    let registry = TypeRegistry::builder()
        .with_builtins()
        .register_fn(FunctionInfo::new("boom", "Explode", 0, explode))
        .build();
    let mut config = RuntimeConfig::default();
    config.binding.namespaces.push(NamespaceConfig {
        name: "boom".to_string(),
        package: "boom".to_string(),
    });

    let result = execute_with(
        config,
        Arc::new(registry),
        ExecContext::new("default", "panics"),
        "boom.Explode()",
        client().1,
    );
    assert!(matches!(result, Err(ExecError::Panicked(ref msg)) if msg.contains("kaboom")));
}
