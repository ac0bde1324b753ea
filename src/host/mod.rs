//! 绑定层的宿主侧
//!
//! 宿主程序持有的值、替代运行时反射的静态描述符，
//! 以及绑定生成器查询的注册表。

pub mod context;
pub mod convert;
pub mod reflect;
pub mod registry;
pub mod store;
pub mod value;

pub use context::ExecContext;
pub use convert::{arg, FromHost, IntoHost};
pub use reflect::{
    qualify, FieldInfo, FieldKind, FreeFn, FunctionInfo, HostType, MethodFn, MethodInfo, Reflect,
    TypeInfo,
};
pub use registry::{Entry, RegistryBuilder, TypeRegistry};
pub use store::{Resource, Store};
pub use value::{HostValue, ObjectRef};
