//! 方言编译
//!
//! 在内嵌解释器里运行方言自带的编译器，把 MoonScript（或模块布局相同的其他方言）
//! 编译为 Lua。宿主只负责注入源码、调用 `parse.string` 与 `compile.tree`，
//! 并读回 `(payload, error)` 二元组。
//!
//! 无论从哪条路径退出都会执行清理：清除注入的全局变量，从模块缓存中移除编译器
//! 模块，并强制一次完整的垃圾回收。

use mlua::{Function, Lua, MultiValue, Table, Value};

use super::loader::{ModuleIndex, ModuleResolver};
use crate::config::{DialectConfig, ModulesConfig, RuntimeConfig};
use crate::core::error::{CompileError, CompileResult};

/// 编译期间保存源码文本的全局变量
pub const SOURCE_GLOBAL: &str = "__dialect_source";

#[derive(Debug, Clone, Default)]
pub struct DialectCompiler {
    modules: ModulesConfig,
    dialect: DialectConfig,
}

impl DialectCompiler {
    pub fn new(modules: ModulesConfig, dialect: DialectConfig) -> Self {
        Self { modules, dialect }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.modules.clone(), config.dialect.clone())
    }

    /// 在一次性解释器中编译 `source`
    pub fn compile(&self, source: &str) -> CompileResult<String> {
        let lua = Lua::new();
        let resolver = ModuleResolver::new(ModuleIndex::from_config(&self.modules));
        resolver
            .install(&lua)
            .map_err(|err| CompileError::Lua(err.into()))?;
        self.compile_in(&lua, source)
    }

    /// 在 `lua` 中编译 `source`；`lua` 必须能 `require` 到方言模块
    pub fn compile_in(&self, lua: &Lua, source: &str) -> CompileResult<String> {
        let _teardown = Teardown {
            lua,
            modules: self.cached_modules(),
        };
        lua.globals().set(SOURCE_GLOBAL, source)?;

        let parse = require_field(lua, &self.dialect.parse_module, "string")?;
        let compile = require_field(lua, &self.dialect.compile_module, "tree")?;

        let input: Value = lua.globals().get(SOURCE_GLOBAL)?;
        let (tree, parse_err) = pair(parse.call::<MultiValue>(input)?);
        if !truthy(&tree) {
            let message = describe(lua, &parse_err);
            tracing::debug!(target: "dialect", error = %message, "Parse failed");
            return Err(CompileError::Parse(message));
        }

        let (code, compile_err) = pair(compile.call::<MultiValue>(tree)?);
        let code = match code {
            Value::String(code) if !code.as_bytes().is_empty() => code.to_string_lossy().into(),
            _ => {
                let message = describe(lua, &compile_err);
                tracing::debug!(target: "dialect", error = %message, "Compile failed");
                return Err(CompileError::Compile(message));
            }
        };

        tracing::debug!(target: "dialect", bytes = source.len(), "Dialect compiled");
        Ok(code)
    }

    /// 清理时移除的模块名，包括方言的根包
    fn cached_modules(&self) -> Vec<String> {
        let mut names = vec![
            self.dialect.parse_module.clone(),
            self.dialect.compile_module.clone(),
        ];
        for module in [&self.dialect.parse_module, &self.dialect.compile_module] {
            if let Some((root, _)) = module.split_once('.') {
                if !names.iter().any(|name| name == root) {
                    names.push(root.to_string());
                }
            }
        }
        names
    }
}

struct Teardown<'a> {
    lua: &'a Lua,
    modules: Vec<String>,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lua.globals().raw_set(SOURCE_GLOBAL, Value::Nil) {
            tracing::warn!(target: "dialect", error = %err, "Failed to clear dialect source");
        }
        for module in &self.modules {
            if let Err(err) = forget(self.lua, module) {
                tracing::warn!(target: "dialect", module = %module, error = %err, "Failed to evict module");
            }
        }
        if let Err(err) = self.lua.gc_collect() {
            tracing::warn!(target: "dialect", error = %err, "Garbage collection failed");
        }
        tracing::trace!(target: "dialect", "Teardown complete");
    }
}

fn forget(lua: &Lua, name: &str) -> mlua::Result<()> {
    if let Some(resolver) = ModuleResolver::installed(lua) {
        return Ok(resolver.forget(lua, name)?);
    }
    let package: Option<Table> = lua.globals().get("package")?;
    if let Some(package) = package {
        package.get::<Table>("loaded")?.raw_set(name, Value::Nil)?;
    }
    Ok(())
}

fn require_field(lua: &Lua, module: &str, field: &str) -> CompileResult<Function> {
    let require: Function = lua.globals().get("require")?;
    let table: Table = require.call(module)?;
    table.get::<Option<Function>>(field)?.ok_or_else(|| {
        CompileError::Lua(mlua::Error::runtime(format!(
            "{} has no function {}",
            module, field
        )))
    })
}

fn pair(values: MultiValue) -> (Value, Value) {
    let mut values = values.into_iter();
    (
        values.next().unwrap_or(Value::Nil),
        values.next().unwrap_or(Value::Nil),
    )
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

fn describe(lua: &Lua, value: &Value) -> String {
    match lua.coerce_string(value.clone()) {
        Ok(Some(text)) => text.to_string_lossy().into(),
        _ if value.is_nil() => "unknown error".to_string(),
        _ => format!("{} error value", value.type_name()),
    }
}
