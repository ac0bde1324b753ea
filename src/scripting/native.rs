//! 原生解释器桥接
//!
//! 有些库（LPeg）只以 C 模块的形式存在。桥接层另开一个加载全部标准库的非安全模式解释器，
//! 在其中 require 该库，再把模块表作为纯数据复制过来。
//!
//! [`NativeSession`] 持有这个第二解释器，复制完成后立即释放。会话存活期间，宿主代码可以用
//! 字符串参数调用库中的函数；复制进脚本后，这些函数变为调用即报错的占位函数。

use std::collections::HashSet;
use std::fmt;

use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value, Variadic};

use super::loader::ModuleResolver;
use crate::bindings::marshal;
use crate::config::{BridgeConfig, ModulesConfig};
use crate::core::error::{BridgeError, BridgeResult};
use crate::host::HostValue;

/// 位于 [`NativeSession`] 中的函数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHandle {
    index: usize,
    path: String,
}

impl FunctionHandle {
    /// 模块内的点分位置，例如 `lpeg.match`
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// 原生解释器中某个值的静态副本
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignValue {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Table(Vec<(ForeignValue, ForeignValue)>),
    Function(FunctionHandle),
}

impl ForeignValue {
    /// 在表中按字符串键查找
    pub fn get(&self, key: &str) -> Option<&ForeignValue> {
        match self {
            ForeignValue::Table(entries) => entries.iter().find_map(|(k, v)| match k {
                ForeignValue::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionHandle> {
        match self {
            ForeignValue::Function(handle) => Some(handle),
            _ => None,
        }
    }

    fn key_text(&self) -> String {
        match self {
            ForeignValue::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignValue::Nil => write!(f, "nil"),
            ForeignValue::Bool(b) => write!(f, "{}", b),
            ForeignValue::Int(i) => write!(f, "{}", i),
            ForeignValue::Number(x) => write!(f, "{}", x),
            ForeignValue::Str(s) => write!(f, "{:?}", s),
            ForeignValue::Table(entries) => write!(f, "table({} entries)", entries.len()),
            ForeignValue::Function(handle) => write!(f, "function: {}", handle.path),
        }
    }
}

/// 作用域限于一次桥接调用的第二个非安全模式解释器
pub struct NativeSession {
    lua: Lua,
    functions: Vec<Function>,
}

impl NativeSession {
    /// 按配置的搜索路径打开新的解释器
    pub fn open(config: &ModulesConfig) -> BridgeResult<Self> {
        // SAFETY: 该实例只用于加载 C 模块，从不接收宿主回调，
        // 并随会话一同释放
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::default()) };

        let package: Table = lua.globals().get("package")?;
        if let Some(path) = config.script_path() {
            package.set("path", path)?;
        }
        if let Some(cpath) = config.native_path() {
            package.set("cpath", cpath)?;
        }

        tracing::debug!(target: "bridge", "Native interpreter opened");
        Ok(Self {
            lua,
            functions: Vec::new(),
        })
    }

    /// 以原生方式 require `module` 并为其表生成快照
    pub fn require(&mut self, module: &str) -> BridgeResult<ForeignValue> {
        let require: Function = self.lua.globals().get("require")?;
        let mut value: Value = require.call(module).map_err(|source| BridgeError::Call {
            function: format!("require({})", module),
            source,
        })?;
        if !matches!(value, Value::Table(_)) {
            value = self.lua.globals().get(module)?;
        }
        if !matches!(value, Value::Table(_)) {
            return Err(BridgeError::NotATable(module.to_string()));
        }

        let mut visiting = HashSet::new();
        let snapshot = self.snapshot(&value, module, &mut visiting)?;
        tracing::debug!(
            target: "bridge",
            module,
            functions = self.functions.len(),
            "Native module copied"
        );
        Ok(snapshot)
    }

    fn snapshot(
        &mut self,
        value: &Value,
        path: &str,
        visiting: &mut HashSet<usize>,
    ) -> BridgeResult<ForeignValue> {
        Ok(match value {
            Value::Nil => ForeignValue::Nil,
            Value::Boolean(b) => ForeignValue::Bool(*b),
            Value::Integer(i) => ForeignValue::Int(*i),
            Value::Number(x) => match marshal::number(*x) {
                Value::Integer(i) => ForeignValue::Int(i),
                _ => ForeignValue::Number(*x),
            },
            Value::String(s) => ForeignValue::Str(s.to_string_lossy().into()),
            Value::Function(function) => {
                self.functions.push(function.clone());
                ForeignValue::Function(FunctionHandle {
                    index: self.functions.len() - 1,
                    path: path.to_string(),
                })
            }
            Value::Table(table) => {
                let id = table.to_pointer() as usize;
                if !visiting.insert(id) {
                    tracing::trace!(target: "bridge", path, "Skipping recursive table reference");
                    return Ok(ForeignValue::Nil);
                }
                let mut entries = Vec::new();
                for pair in table.pairs::<Value, Value>() {
                    let (key, item) = pair?;
                    let key = self.snapshot(&key, path, visiting)?;
                    let child = format!("{}.{}", path, key.key_text());
                    let item = self.snapshot(&item, &child, visiting)?;
                    if item != ForeignValue::Nil {
                        entries.push((key, item));
                    }
                }
                visiting.remove(&id);
                ForeignValue::Table(entries)
            }
            Value::Thread(_) => return Err(BridgeError::Thread(path.to_string())),
            other => {
                return Err(BridgeError::Unsupported {
                    path: path.to_string(),
                    kind: other.type_name(),
                })
            }
        })
    }

    /// 用字符串参数调用原生函数，恰好返回 `nresults` 个结果，
    /// 每个结果都转为字符串。
    pub fn call(
        &self,
        function: &FunctionHandle,
        args: &[HostValue],
        nresults: usize,
    ) -> BridgeResult<Vec<String>> {
        let target = self
            .functions
            .get(function.index)
            .ok_or(BridgeError::UnknownFunction(function.index))?;

        let args = args
            .iter()
            .enumerate()
            .map(|(i, arg)| match arg {
                HostValue::Str(s) => Ok(s.clone()),
                _ => Err(BridgeError::NonStringArgument(i + 1)),
            })
            .collect::<BridgeResult<Vec<_>>>()?;

        let results: MultiValue =
            target
                .call(Variadic::from_iter(args))
                .map_err(|source| BridgeError::Call {
                    function: function.path.clone(),
                    source,
                })?;

        let mut results = results.into_iter();
        (1..=nresults)
            .map(|index| {
                let value = results.next().unwrap_or(Value::Nil);
                let kind = value.type_name();
                match self.lua.coerce_string(value)? {
                    Some(s) => Ok(s.to_string_lossy().into()),
                    None => Err(BridgeError::NonStringResult {
                        function: function.path.clone(),
                        index,
                        kind,
                    }),
                }
            })
            .collect()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        tracing::debug!(target: "bridge", "Native interpreter closed");
    }
}

/// 把快照复制到 `target`；函数变为调用即报错的占位函数
pub fn copy_into(target: &Lua, value: &ForeignValue) -> BridgeResult<Value> {
    Ok(match value {
        ForeignValue::Nil => Value::Nil,
        ForeignValue::Bool(b) => Value::Boolean(*b),
        ForeignValue::Int(i) => Value::Integer(*i),
        ForeignValue::Number(x) => Value::Number(*x),
        ForeignValue::Str(s) => Value::String(target.create_string(s)?),
        ForeignValue::Table(entries) => {
            let table = target.create_table_with_capacity(0, entries.len())?;
            for (key, item) in entries {
                table.raw_set(copy_into(target, key)?, copy_into(target, item)?)?;
            }
            Value::Table(table)
        }
        ForeignValue::Function(handle) => {
            let path = handle.path.clone();
            Value::Function(target.create_function(move |_, _: MultiValue| -> mlua::Result<()> {
                Err(mlua::Error::runtime(format!(
                    "native function {} cannot be called from the embedded interpreter",
                    path
                )))
            })?)
        }
    })
}

/// 向内嵌解释器提供配置的原生模块
#[derive(Debug, Clone)]
pub struct NativeBridge {
    config: ModulesConfig,
    modules: Vec<String>,
}

impl NativeBridge {
    pub fn new(config: ModulesConfig, bridge: &BridgeConfig) -> Self {
        Self {
            config,
            modules: bridge.modules.clone(),
        }
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// 对新会话执行 `f`；任何退出路径都会关闭会话
    pub fn with_session<R>(
        &self,
        f: impl FnOnce(&mut NativeSession) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let mut session = NativeSession::open(&self.config)?;
        f(&mut session)
    }

    /// 以原生方式 require `module`，返回它在 `target` 中的副本
    pub fn load_into(&self, target: &Lua, module: &str) -> BridgeResult<Value> {
        self.with_session(|session| {
            let snapshot = session.require(module)?;
            copy_into(target, &snapshot)
        })
    }

    /// 把每个桥接模块注册为 `resolver` 的预加载器
    pub fn install(&self, resolver: &ModuleResolver) {
        for module in &self.modules {
            let bridge = self.clone();
            resolver.preload(module.clone(), move |lua, name| {
                tracing::info!(target: "bridge", module = name, "Bridging native module");
                Ok(bridge.load_into(lua, name)?)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FAKE_PEG: &str = r#"
        local M = { version = "1.1.0", ratio = 2.0, half = 0.5 }
        M.nested = { depth = 1 }
        function M.match(subject, pattern)
            local s, e = string.find(subject, pattern)
            return s, e
        end
        function M.upper(s) return string.upper(s) end
        return M
    "#;

    fn config(dir: &std::path::Path) -> ModulesConfig {
        ModulesConfig {
            path: Some(format!("{}/?.lua", dir.display())),
            cpath: Some(String::new()),
            ..ModulesConfig::default()
        }
    }

    #[test]
    fn test_snapshot_and_call() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fakepeg.lua"), FAKE_PEG).unwrap();

        let mut session = NativeSession::open(&config(dir.path())).unwrap();
        let module = session.require("fakepeg").unwrap();
        assert_eq!(module.get("version"), Some(&ForeignValue::Str("1.1.0".into())));
        assert_eq!(module.get("ratio"), Some(&ForeignValue::Int(2)));
        assert_eq!(module.get("half"), Some(&ForeignValue::Number(0.5)));
        assert_eq!(
            module.get("nested").and_then(|n| n.get("depth")),
            Some(&ForeignValue::Int(1))
        );

        let find = module.get("match").and_then(ForeignValue::as_function).unwrap();
        assert_eq!(find.path(), "fakepeg.match");
        let out = session
            .call(find, &[HostValue::str("hello world"), HostValue::str("wor")], 2)
            .unwrap();
        assert_eq!(out, vec!["7".to_string(), "9".to_string()]);

        let upper = module.get("upper").and_then(ForeignValue::as_function).unwrap();
        let err = session.call(upper, &[HostValue::Int(1)], 1).unwrap_err();
        assert!(matches!(err, BridgeError::NonStringArgument(1)));

        let err = session.call(find, &[HostValue::str("abc"), HostValue::str("z")], 1).unwrap_err();
        assert!(matches!(err, BridgeError::NonStringResult { index: 1, kind: "nil", .. }));
    }

    #[test]
    fn test_thread_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("threaded.lua"),
            "return { co = coroutine.create(function() end) }",
        )
        .unwrap();
        let mut session = NativeSession::open(&config(dir.path())).unwrap();
        let err = session.require("threaded").unwrap_err();
        assert!(matches!(err, BridgeError::Thread(ref path) if path == "threaded.co"));
    }

    #[test]
    fn test_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = NativeSession::open(&config(dir.path())).unwrap();
        let err = session.require("nowhere").unwrap_err();
        assert!(matches!(err, BridgeError::Call { .. }));
    }

    #[test]
    fn test_placeholders_raise_in_embedded_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fakepeg.lua"), FAKE_PEG).unwrap();
        let bridge = NativeBridge::new(
            config(dir.path()),
            &BridgeConfig {
                modules: vec!["fakepeg".to_string()],
            },
        );

        let lua = Lua::new();
        let resolver = ModuleResolver::new(Default::default());
        resolver.install(&lua).unwrap();
        bridge.install(&resolver);

        let version: String = lua.load("return require('fakepeg').version").eval().unwrap();
        assert_eq!(version, "1.1.0");
        let ok: bool = lua
            .load("return math.type(require('fakepeg').ratio) == 'integer'")
            .eval()
            .unwrap();
        assert!(ok);
        let err = lua.load("require('fakepeg').upper('x')").exec().unwrap_err();
        assert!(err.to_string().contains("native function fakepeg.upper cannot be called"));
    }
}
