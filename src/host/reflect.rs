//! 静态类型描述符
//!
//! Rust 没有运行时反射，所以每个可暴露的类型都带一个由
//! [`host_type!`](crate::host_type) 在编译期生成的描述符。描述符列出字段的种类与可见性、
//! 方法声明的参数个数，以及创建默认实例的构造函数。

use std::any::Any;
use std::fmt;

use super::value::{HostValue, ObjectRef};
use crate::core::error::HostResult;

/// 可按名称检查和修改的宿主结构体
pub trait Reflect: Any {
    fn type_info(&self) -> &'static TypeInfo;

    /// 不论可见性读取字段；由调用方检查 `FieldInfo::public`
    fn get_field(&self, name: &str) -> Option<HostValue>;

    fn set_field(&mut self, name: &str, value: HostValue) -> HostResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// 由 `host_type!` 与 [`Reflect`] 一起实现
pub trait HostType: Reflect + Default + Clone {
    fn descriptor() -> &'static TypeInfo;
}

/// 结构体字段的声明种类，用于检查脚本发来的赋值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    List,
    Map,
    Struct,
    Ptr,
    Opaque,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::List => "slice",
            FieldKind::Map => "map",
            FieldKind::Struct => "struct",
            FieldKind::Ptr => "ptr",
            FieldKind::Opaque => "opaque",
        }
    }

    /// 脚本能否通过 `set` 给这种字段赋值
    pub fn is_assignable(self) -> bool {
        matches!(
            self,
            FieldKind::Str | FieldKind::Int | FieldKind::Float | FieldKind::Bool
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub name: &'static str,
    pub kind: FieldKind,
    pub public: bool,
}

pub type MethodFn = fn(&ObjectRef, Vec<HostValue>) -> HostResult<Vec<HostValue>>;
pub type FreeFn = fn(Vec<HostValue>) -> HostResult<Vec<HostValue>>;

#[derive(Clone, Copy)]
pub struct MethodInfo {
    pub name: &'static str,
    /// 声明的参数个数，不含接收者
    pub arity: usize,
    pub call: MethodFn,
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

pub struct TypeInfo {
    pub name: &'static str,
    pub package: &'static str,
    pub fields: &'static [FieldInfo],
    pub methods: &'static [MethodInfo],
    pub construct: fn() -> ObjectRef,
}

impl TypeInfo {
    pub fn field(&self, name: &str) -> Option<&'static FieldInfo> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&'static MethodInfo> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn full_name(&self) -> String {
        qualify(self.package, self.name)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.full_name())
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

/// 宿主自由函数
#[derive(Clone, Copy)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub package: &'static str,
    /// 声明的参数个数，仅供参考：自由函数从不检查参数个数
    pub arity: usize,
    pub call: FreeFn,
}

impl FunctionInfo {
    pub const fn new(package: &'static str, name: &'static str, arity: usize, call: FreeFn) -> Self {
        FunctionInfo {
            name,
            package,
            arity,
            call,
        }
    }

    pub fn full_name(&self) -> String {
        qualify(self.package, self.name)
    }
}

impl fmt::Debug for FunctionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.full_name(), self.arity)
    }
}

pub fn qualify(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", package, name)
    }
}
