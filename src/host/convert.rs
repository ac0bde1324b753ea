//! Rust 类型与 [`HostValue`] 之间的转换
//!
//! | Rust 类型 | HostValue |
//! |-----------|-----------|
//! | `()` | `Nil` |
//! | `bool` | `Bool` |
//! | `i32`, `i64`, `u32`, `usize` | `Int` |
//! | `f32`, `f64` | `Float` |
//! | `String`, `&str` | `Str` |
//! | `Vec<T>` | `List` |
//! | `BTreeMap<String, T>`, `HashMap<String, T>` | `Map` |
//! | `Option<T>` | `T` 或 `Nil` |
//! | `ObjectRef` | `Ptr` |

use std::collections::{BTreeMap, HashMap};

use super::value::{HostValue, ObjectRef};
use crate::core::error::{HostError, HostResult};

/// 把 Rust 类型转换为 `HostValue`
pub trait IntoHost {
    fn into_host(self) -> HostValue;
}

/// 把 `HostValue` 转换为 Rust 类型
pub trait FromHost: Sized {
    fn from_host(value: HostValue) -> HostResult<Self>;
}

fn mismatch<T>(expected: &'static str, found: &HostValue) -> HostResult<T> {
    Err(HostError::Conversion {
        expected,
        found: found.kind_name(),
    })
}

// ============================================================================
// IntoHost 实现
// ============================================================================

impl IntoHost for HostValue {
    fn into_host(self) -> HostValue {
        self
    }
}

impl IntoHost for () {
    fn into_host(self) -> HostValue {
        HostValue::Nil
    }
}

impl IntoHost for bool {
    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }
}

impl IntoHost for i64 {
    fn into_host(self) -> HostValue {
        HostValue::Int(self)
    }
}

impl IntoHost for i32 {
    fn into_host(self) -> HostValue {
        HostValue::Int(self as i64)
    }
}

impl IntoHost for u32 {
    fn into_host(self) -> HostValue {
        HostValue::Int(self as i64)
    }
}

impl IntoHost for usize {
    fn into_host(self) -> HostValue {
        HostValue::Int(self as i64)
    }
}

impl IntoHost for f64 {
    fn into_host(self) -> HostValue {
        HostValue::Float(self)
    }
}

impl IntoHost for f32 {
    fn into_host(self) -> HostValue {
        HostValue::Float(self as f64)
    }
}

impl IntoHost for String {
    fn into_host(self) -> HostValue {
        HostValue::Str(self)
    }
}

impl IntoHost for &str {
    fn into_host(self) -> HostValue {
        HostValue::Str(self.to_string())
    }
}

impl IntoHost for ObjectRef {
    fn into_host(self) -> HostValue {
        HostValue::Ptr(Some(self))
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> HostValue {
        match self {
            Some(v) => v.into_host(),
            None => HostValue::Nil,
        }
    }
}

impl<T: IntoHost> IntoHost for Vec<T> {
    fn into_host(self) -> HostValue {
        HostValue::List(self.into_iter().map(IntoHost::into_host).collect())
    }
}

impl<T: IntoHost> IntoHost for BTreeMap<String, T> {
    fn into_host(self) -> HostValue {
        HostValue::Map(
            self.into_iter()
                .map(|(k, v)| (HostValue::Str(k), v.into_host()))
                .collect(),
        )
    }
}

// 排序后脚本侧看到的顺序才稳定
impl<T: IntoHost> IntoHost for HashMap<String, T> {
    fn into_host(self) -> HostValue {
        let sorted: BTreeMap<String, T> = self.into_iter().collect();
        sorted.into_host()
    }
}

// ============================================================================
// FromHost 实现
// ============================================================================

impl FromHost for HostValue {
    fn from_host(value: HostValue) -> HostResult<Self> {
        Ok(value)
    }
}

impl FromHost for bool {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FromHost for i64 {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Int(i) => Ok(i),
            other => mismatch("int", &other),
        }
    }
}

impl FromHost for i32 {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Int(i) => i32::try_from(i).map_err(|_| HostError::Conversion {
                expected: "int32",
                found: "int",
            }),
            other => mismatch("int32", &other),
        }
    }
}

impl FromHost for usize {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Int(i) => usize::try_from(i).map_err(|_| HostError::Conversion {
                expected: "uint",
                found: "int",
            }),
            other => mismatch("uint", &other),
        }
    }
}

impl FromHost for f64 {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Float(x) => Ok(x),
            HostValue::Int(i) => Ok(i as f64),
            other => mismatch("float", &other),
        }
    }
}

impl FromHost for f32 {
    fn from_host(value: HostValue) -> HostResult<Self> {
        f64::from_host(value).map(|x| x as f32)
    }
}

impl FromHost for String {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Str(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FromHost for ObjectRef {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Struct(obj) | HostValue::Ptr(Some(obj)) => Ok(obj),
            other => mismatch("object", &other),
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Nil | HostValue::Ptr(None) => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::List(items) => items.into_iter().map(T::from_host).collect(),
            other => mismatch("slice", &other),
        }
    }
}

impl<T: FromHost> FromHost for BTreeMap<String, T> {
    fn from_host(value: HostValue) -> HostResult<Self> {
        match value {
            HostValue::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k.to_string(), T::from_host(v)?)))
                .collect(),
            // 空的脚本表读回为空列表
            HostValue::List(items) if items.is_empty() => Ok(BTreeMap::new()),
            other => mismatch("map", &other),
        }
    }
}

impl<T: FromHost> FromHost for HashMap<String, T> {
    fn from_host(value: HostValue) -> HostResult<Self> {
        BTreeMap::<String, T>::from_host(value).map(|map| map.into_iter().collect())
    }
}

/// 取宿主调用的第 `index` 个位置参数
///
/// 缺少的参数读作 `nil`，所以 `Option<T>` 参数是可选的。
pub fn arg<T: FromHost>(args: &[HostValue], index: usize) -> HostResult<T> {
    let value = args.get(index).cloned().unwrap_or(HostValue::Nil);
    if value.is_nil() && args.len() <= index {
        return T::from_host(value).map_err(|_| HostError::MissingArgument(index + 1));
    }
    T::from_host(value)
}
