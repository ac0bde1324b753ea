//! 绑定生成器
//!
//! 为宿主函数、对象和类型生成可供脚本调用的包装。
//!
//! | 宿主项 | 脚本形态 |
//! |-----------|--------------|
//! | 自由函数 | 函数，参数原样传入不检查个数 |
//! | 对象（指针） | 代理表，每个方法一个包装，用 `.` 调用 |
//! | 类型 | 类表，带 `new`、`get`、`set` 和 `:` 风格方法 |
//! | 包 | 命名空间表，收纳该包的函数和类 |

use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Table, Value};

use super::marshal::{self, AssignPolicy};
use crate::core::error::{BindError, BindResult, HostResult};
use crate::host::{qualify, Entry, HostValue, MethodInfo, ObjectRef, TypeInfo, TypeRegistry};

/// 向单个解释器实例安装宿主绑定
pub struct Binder<'lua> {
    lua: &'lua Lua,
    registry: Arc<TypeRegistry>,
    policy: AssignPolicy,
}

impl<'lua> Binder<'lua> {
    pub fn new(lua: &'lua Lua, registry: Arc<TypeRegistry>) -> BindResult<Self> {
        marshal::prepare(lua)?;
        Ok(Self {
            lua,
            registry,
            policy: AssignPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: AssignPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// 把宿主闭包包装成脚本函数
    ///
    /// 参数逐个经过转换器，闭包拿到全部参数，
    /// 每个结果作为独立的返回值返回。
    pub fn function<F>(&self, f: F) -> BindResult<Function>
    where
        F: Fn(Vec<HostValue>) -> HostResult<Vec<HostValue>> + 'static,
    {
        Ok(self.lua.create_function(move |lua, args: MultiValue| {
            let args = host_args(lua, &args)?;
            script_results(lua, f(args)?)
        })?)
    }

    /// 把 `f` 暴露为 `name`，放在全局或 `namespace` 下
    pub fn expose_function<F>(
        &self,
        namespace: Option<&Table>,
        name: &str,
        f: F,
    ) -> BindResult<Function>
    where
        F: Fn(Vec<HostValue>) -> HostResult<Vec<HostValue>> + 'static,
    {
        let function = self.function(f)?;
        match namespace {
            Some(table) => table.set(name, function.clone())?,
            None => self.lua.globals().set(name, function.clone())?,
        }
        tracing::trace!(target: "binding", name, "Exposed function");
        Ok(function)
    }

    /// 把宿主指针暴露为全局变量 `name`
    ///
    /// 该全局是指针代理：每个方法一个包装，另外带上对象所属包里
    /// 注册的全部函数和类型。
    pub fn expose_object(&self, name: &str, value: &HostValue) -> BindResult<Table> {
        let package = match value {
            HostValue::Ptr(Some(obj)) => obj.type_info().package,
            _ => "",
        };
        self.expose_object_in(name, value, package)
    }

    /// 同 [`Binder::expose_object`]，但扫描 `package` 而不是对象自己的包
    pub fn expose_object_in(
        &self,
        name: &str,
        value: &HostValue,
        package: &str,
    ) -> BindResult<Table> {
        let obj = match value {
            HostValue::Ptr(Some(obj)) => obj,
            HostValue::Ptr(None) => return Err(BindError::NilObject(name.to_string())),
            other => {
                return Err(BindError::NotPointer {
                    name: name.to_string(),
                    kind: other.kind_name(),
                })
            }
        };

        let table = marshal::pointer_proxy(self.lua, Some(obj))?;
        let info = obj.type_info();
        for method in info.methods {
            table.set(method.name, self.bound_method(obj.clone(), method)?)?;
        }
        self.expose_package(&table, package)?;

        self.lua.globals().set(name, table.clone())?;
        tracing::debug!(
            target: "binding",
            name,
            type_name = %info.full_name(),
            methods = info.methods.len(),
            "Exposed object"
        );
        Ok(table)
    }

    /// 已绑定接收者的包装；参数个数必须完全一致
    fn bound_method(&self, receiver: ObjectRef, method: &'static MethodInfo) -> BindResult<Function> {
        Ok(self.lua.create_function(move |lua, args: MultiValue| {
            if args.len() != method.arity {
                return Err(arity_error(method, args.len()));
            }
            let args = host_args(lua, &args)?;
            script_results(lua, (method.call)(&receiver, args)?)
        })?)
    }

    /// 为 `info` 构建类表：`new`、`get`、`set` 以及每个方法一个 `:` 风格包装。
    /// 类表自身就是 `__index`。
    pub fn expose_type(&self, info: &'static TypeInfo) -> BindResult<Table> {
        let lua = self.lua;
        let class = lua.create_table()?;
        class.set("__index", class.clone())?;

        let get = lua.create_function(move |lua, args: MultiValue| {
            if args.len() != 1 {
                return Err(mlua::Error::runtime("get expects exactly one argument"));
            }
            let obj = receiver(lua, args.front())?;
            let snapshot = lua.create_table()?;
            for (name, value) in obj.public_fields()? {
                snapshot.raw_set(name, marshal::to_script(lua, &value)?)?;
            }
            Ok(snapshot)
        })?;
        class.set("get", get)?;

        let policy = self.policy;
        let set = lua.create_function(move |lua, args: MultiValue| {
            let obj = receiver(lua, args.front())?;
            let Some(Value::Table(values)) = args.get(1) else {
                return Err(mlua::Error::runtime("set expects a table as argument"));
            };
            marshal::assign_fields(lua, &obj, values, policy)?;
            Ok(())
        })?;
        class.set("set", set)?;

        let new = lua.create_function(move |lua, args: MultiValue| {
            if args.is_empty() || args.len() > 2 {
                return Err(mlua::Error::runtime(format!(
                    "new expects no arguments or exactly one table, got {}",
                    args.len().saturating_sub(1)
                )));
            }
            let Some(Value::Table(class)) = args.front() else {
                return Err(mlua::Error::runtime(format!(
                    "new must be called as {}:new(...)",
                    info.name
                )));
            };
            let instance = marshal::pointer_proxy(lua, Some(&(info.construct)()))?;
            instance.set_metatable(Some(class.clone()));
            if let Some(init) = args.get(1) {
                let set: Function = class.get("set")?;
                set.call::<()>((instance.clone(), init.clone()))?;
            }
            Ok(instance)
        })?;
        class.set("new", new)?;

        for method in info.methods {
            let wrapper = lua.create_function(move |lua, args: MultiValue| {
                if args.len() != method.arity + 1 {
                    return Err(arity_error(method, args.len().saturating_sub(1)));
                }
                let obj = receiver(lua, args.front())?;
                let args = host_args(lua, &args.iter().skip(1).cloned().collect())?;
                script_results(lua, (method.call)(&obj, args)?)
            })?;
            class.set(method.name, wrapper)?;
        }

        tracing::trace!(target: "binding", type_name = %info.full_name(), "Exposed type");
        Ok(class)
    }

    /// 把 `package` 中注册的函数和类型全部加入 `namespace`
    pub fn expose_package(&self, namespace: &Table, package: &str) -> BindResult<usize> {
        let entries = self.registry.package(package);
        for entry in &entries {
            match *entry {
                Entry::Function(info) => {
                    self.expose_function(Some(namespace), info.name, info.call)?;
                }
                Entry::Type(info) => {
                    namespace.set(info.name, self.expose_type(info)?)?;
                }
            }
        }
        if !package.is_empty() {
            tracing::debug!(target: "binding", package, entries = entries.len(), "Exposed package");
        }
        Ok(entries.len())
    }

    /// 创建空的全局命名空间表
    pub fn add_namespace(&self, name: &str) -> BindResult<Table> {
        let table = self.lua.create_table()?;
        self.lua.globals().set(name, table.clone())?;
        Ok(table)
    }

    /// 创建持有 `package` 的全局命名空间 `name`
    pub fn namespace(&self, name: &str, package: &str) -> BindResult<Table> {
        let table = self.lua.create_table()?;
        let count = self.expose_package(&table, package)?;
        if count == 0 {
            tracing::warn!(target: "binding", name, package, "Namespace has no registered entries");
        }
        self.lua.globals().set(name, table.clone())?;
        Ok(table)
    }

    /// 按全限定名暴露单个注册项
    pub fn expose_registered(&self, namespace: &Table, full_name: &str) -> BindResult<bool> {
        match self.registry.lookup(full_name) {
            Some(Entry::Function(info)) => {
                self.expose_function(Some(namespace), info.name, info.call)?;
                Ok(true)
            }
            Some(Entry::Type(info)) => {
                namespace.set(info.name, self.expose_type(info)?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn host_args(lua: &Lua, args: &MultiValue) -> mlua::Result<Vec<HostValue>> {
    args.iter()
        .map(|value| marshal::to_host(lua, value).map_err(mlua::Error::from))
        .collect()
}

fn script_results(lua: &Lua, results: Vec<HostValue>) -> mlua::Result<MultiValue> {
    let values = results
        .iter()
        .map(|value| marshal::to_script(lua, value).map_err(mlua::Error::from))
        .collect::<mlua::Result<Vec<_>>>()?;
    Ok(MultiValue::from_vec(values))
}

fn arity_error(method: &MethodInfo, got: usize) -> mlua::Error {
    mlua::Error::runtime(format!(
        "method {} expects {} arguments, got {}",
        method.name, method.arity, got
    ))
}

/// 取回作为 `self` 传入的代理背后的宿主对象
fn receiver(lua: &Lua, value: Option<&Value>) -> mlua::Result<ObjectRef> {
    let Some(Value::Table(table)) = value else {
        return Err(mlua::Error::runtime("Invalid object"));
    };
    match marshal::unwrap_proxy(lua, table)? {
        Some(HostValue::Struct(obj)) | Some(HostValue::Ptr(Some(obj))) => Ok(obj),
        _ => Err(mlua::Error::runtime("Invalid object")),
    }
}

/// 代理 `table` 所代表对象的 `pkg::Name`
pub fn proxy_type_name(lua: &Lua, table: &Table) -> BindResult<Option<String>> {
    Ok(marshal::type_of(lua, table)?.map(|info| qualify(info.package, info.name)))
}
