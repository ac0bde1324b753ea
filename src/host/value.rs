//! 宿主侧值模型

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::reflect::{Reflect, TypeInfo};
use crate::core::error::{HostError, HostResult};

/// 宿主程序持有的值
///
/// `Struct` 与 `Ptr` 都持有 [`ObjectRef`]，区别只在转换器如何呈现它们：
/// 结构体代理带字段快照，指针代理只带标记。
#[derive(Clone)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<HostValue>),
    /// 有序键值对。从脚本取回的键总是字符串
    Map(Vec<(HostValue, HostValue)>),
    Struct(ObjectRef),
    Ptr(Option<ObjectRef>),
    /// 没有脚本表示的宿主值（通道、原始句柄等）
    Opaque(&'static str),
}

impl HostValue {
    pub fn str(value: impl Into<String>) -> Self {
        HostValue::Str(value.into())
    }

    pub fn ptr(object: ObjectRef) -> Self {
        HostValue::Ptr(Some(object))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "string",
            HostValue::List(_) => "slice",
            HostValue::Map(_) => "map",
            HostValue::Struct(_) => "struct",
            HostValue::Ptr(_) => "ptr",
            HostValue::Opaque(kind) => kind,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// 在映射值中按字符串键查找
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                HostValue::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// 结构体或非空指针背后的对象
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            HostValue::Struct(obj) | HostValue::Ptr(Some(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Nil
    }
}

/// 对象按身份比较，其余按结构比较
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => a == b,
            (HostValue::Struct(a), HostValue::Struct(b)) => ObjectRef::ptr_eq(a, b),
            (HostValue::Ptr(Some(a)), HostValue::Ptr(Some(b))) => ObjectRef::ptr_eq(a, b),
            (HostValue::Ptr(None), HostValue::Ptr(None)) => true,
            (HostValue::Opaque(a), HostValue::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => write!(f, "nil"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Float(x) => write!(f, "{}", x),
            HostValue::Str(s) => write!(f, "{}", s),
            HostValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            HostValue::Map(entries) => {
                write!(f, "map[")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "]")
            }
            HostValue::Struct(obj) => write!(f, "{}", obj),
            HostValue::Ptr(Some(obj)) => write!(f, "&{}", obj),
            HostValue::Ptr(None) => write!(f, "<nil>"),
            HostValue::Opaque(kind) => write!(f, "<{}>", kind),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Str(s) => write!(f, "{:?}", s),
            HostValue::Struct(obj) => write!(f, "Struct({})", obj),
            HostValue::Ptr(Some(obj)) => write!(f, "Ptr({})", obj),
            other => write!(f, "{}", other),
        }
    }
}

/// 可反射宿主对象的共享句柄
#[derive(Clone)]
pub struct ObjectRef {
    cell: Rc<RefCell<dyn Reflect>>,
    info: &'static TypeInfo,
}

impl ObjectRef {
    pub fn new<T: Reflect>(value: T) -> Self {
        let info = value.type_info();
        ObjectRef {
            cell: Rc::new(RefCell::new(value)),
            info,
        }
    }

    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        Rc::ptr_eq(&a.cell, &b.cell)
    }

    pub fn type_info(&self) -> &'static TypeInfo {
        self.info
    }

    pub fn borrow(&self) -> HostResult<Ref<'_, dyn Reflect>> {
        self.cell.try_borrow().map_err(|_| HostError::Busy(self.info.name))
    }

    pub fn borrow_mut(&self) -> HostResult<RefMut<'_, dyn Reflect>> {
        self.cell
            .try_borrow_mut()
            .map_err(|_| HostError::Busy(self.info.name))
    }

    /// 当具体类型是 `T` 时对其执行 `f`
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.cell.try_borrow().ok()?;
        guard.as_any().downcast_ref::<T>().map(f)
    }

    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> HostResult<R> {
        let mut guard = self.borrow_mut()?;
        guard
            .as_any_mut()
            .downcast_mut::<T>()
            .map(f)
            .ok_or(HostError::Receiver(self.info.name))
    }

    /// 读取公有字段；私有和未知字段返回 `None`
    pub fn field(&self, name: &str) -> HostResult<Option<HostValue>> {
        if !self.info.field(name).is_some_and(|field| field.public) {
            return Ok(None);
        }
        Ok(self.borrow()?.get_field(name))
    }

    /// 按声明顺序列出全部公有字段
    pub fn public_fields(&self) -> HostResult<Vec<(&'static str, HostValue)>> {
        let guard = self.borrow()?;
        Ok(self
            .info
            .fields
            .iter()
            .filter(|field| field.public)
            .filter_map(|field| guard.get_field(field.name).map(|value| (field.name, value)))
            .collect())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(fields) = self.public_fields() else {
            return write!(f, "{}{{..}}", self.info.name);
        };
        write!(f, "{}{{", self.info.name)?;
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", name, value)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self)
    }
}
