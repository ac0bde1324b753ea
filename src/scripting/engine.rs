// ============================================================================
// 脚本运行时
// 每次执行一个独立的 Lua 实例：绑定、模块加载、原生桥接、输出捕获
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use mlua::Lua;

use super::dialect::DialectCompiler;
use super::loader::{ModuleIndex, ModuleResolver};
use super::native::NativeBridge;
use crate::bindings::{marshal, Binder};
use crate::config::RuntimeConfig;
use crate::core::error::{BindResult, ExecError, ExecResult};
use crate::host::{ExecContext, HostValue, ObjectRef, TypeRegistry};

/// 调用方记录的单次脚本运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Executed,
    Failed(String),
}

impl RunStatus {
    pub fn from_result<T>(result: &ExecResult<T>) -> Self {
        match result {
            Ok(_) => RunStatus::Executed,
            Err(err) => RunStatus::Failed(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Executed)
    }

    /// `Executed` 或 `Error: <message>`
    pub fn status_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Executed => write!(f, "Executed"),
            RunStatus::Failed(message) => write!(f, "Error: {}", message),
        }
    }
}

/// 一个内嵌解释器及其实例级状态
pub struct ScriptRuntime {
    lua: Lua,
    config: RuntimeConfig,
    registry: Arc<TypeRegistry>,
    resolver: ModuleResolver,
    output: Rc<RefCell<String>>,
}

impl ScriptRuntime {
    pub fn new(config: RuntimeConfig, registry: Arc<TypeRegistry>) -> ExecResult<Self> {
        config.validate()?;

        let lua = Lua::new();
        marshal::prepare(&lua).map_err(mlua::Error::from)?;

        let resolver = ModuleResolver::new(ModuleIndex::from_config(&config.modules));
        resolver.install(&lua).map_err(mlua::Error::from)?;
        NativeBridge::new(config.modules.clone(), &config.bridge).install(&resolver);

        let runtime = Self {
            lua,
            config,
            registry,
            resolver,
            output: Rc::new(RefCell::new(String::new())),
        };
        runtime.install_builtins()?;
        Ok(runtime)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    pub fn binder(&self) -> BindResult<Binder<'_>> {
        Ok(Binder::new(&self.lua, self.registry.clone())?
            .with_policy(self.config.binding.assign_policy))
    }

    // print(...) 与 log(level, ...)
    fn install_builtins(&self) -> ExecResult<()> {
        let binder = self.binder()?;

        let output = self.output.clone();
        binder.expose_function(None, "print", move |args| {
            let line = join(&args);
            tracing::info!(target: "script", "{}", line);
            let mut output = output.borrow_mut();
            output.push_str(&line);
            output.push('\n');
            Ok(Vec::new())
        })?;

        binder.expose_function(None, "log", |args| {
            let level = args.first().and_then(HostValue::as_str).unwrap_or("info");
            let message = join(args.get(1..).unwrap_or_default());
            match level.to_ascii_lowercase().as_str() {
                "error" => tracing::error!(target: "script", "{}", message),
                "warn" => tracing::warn!(target: "script", "{}", message),
                "debug" => tracing::debug!(target: "script", "{}", message),
                "trace" => tracing::trace!(target: "script", "{}", message),
                _ => tracing::info!(target: "script", "{}", message),
            }
            Ok(Vec::new())
        })?;
        Ok(())
    }

    /// 暴露 `ctx`、`client` 以及配置的命名空间
    ///
    /// 先处理 `client`：它不是非空指针时什么都不暴露。
    pub fn bind(&self, ctx: ExecContext, client: &HostValue) -> ExecResult<()> {
        let binder = self.binder()?;
        binder.expose_object("client", client)?;
        binder.expose_object("ctx", &HostValue::ptr(ObjectRef::new(ctx)))?;
        for ns in &self.config.binding.namespaces {
            binder.namespace(&ns.name, &ns.package)?;
        }
        Ok(())
    }

    /// 运行 `source` 直到结束，返回它打印的全部内容
    pub fn run(&self, source: &str, chunk_name: &str) -> ExecResult<String> {
        self.lua
            .load(source)
            .set_name(format!("={}", chunk_name))
            .exec()
            .map_err(|err| ExecError::Script(err.to_string()))?;
        Ok(self.output())
    }

    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }
}

fn join(args: &[HostValue]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 用全局注册表和自动发现的配置运行 `source`
pub fn execute(ctx: ExecContext, source: &str, client: HostValue) -> ExecResult<String> {
    execute_with(
        RuntimeConfig::load_or_default(),
        TypeRegistry::global(),
        ctx,
        source,
        client,
    )
}

/// 在全新的解释器中运行 `source`；宿主 panic 以
/// [`ExecError::Panicked`] 的形式返回。
pub fn execute_with(
    config: RuntimeConfig,
    registry: Arc<TypeRegistry>,
    ctx: ExecContext,
    source: &str,
    client: HostValue,
) -> ExecResult<String> {
    let name = ctx.fqn();
    tracing::info!(target: "script", script = %name, "Executing script");

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let runtime = ScriptRuntime::new(config, registry)?;
        runtime.bind(ctx, &client)?;
        runtime.run(source, &name)
    }))
    .unwrap_or_else(|payload| Err(ExecError::Panicked(panic_message(payload.as_ref()))));

    match &result {
        Ok(_) => tracing::info!(target: "script", script = %name, "Script executed"),
        Err(err) => tracing::error!(target: "script", script = %name, error = %err, "Script failed"),
    }
    result
}

/// 先编译方言程序，再像 [`execute_with`] 一样运行
pub fn compile_and_execute(
    config: RuntimeConfig,
    registry: Arc<TypeRegistry>,
    ctx: ExecContext,
    dialect_source: &str,
    client: HostValue,
) -> ExecResult<String> {
    let source = DialectCompiler::from_config(&config).compile(dialect_source)?;
    execute_with(config, registry, ctx, &source, client)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
