//! 语言绑定层
//!
//! 宿主值与内嵌 Lua 解释器之间的一切往来都经过本模块。
//!
//! 架构：
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Lua script                          │
//! │     ctx / client / namespaces / require / print / log    │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             v
//! ┌──────────────────────────────────────────────────────────┐
//! │   Binder (generator.rs)                                  │
//! │   functions, object proxies, classes, packages           │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             v
//! ┌──────────────────────────────────────────────────────────┐
//! │   Value Marshaler (marshal.rs)                           │
//! │   HostValue <-> mlua::Value, proxy handles, set()        │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                             v
//! ┌──────────────────────────────────────────────────────────┐
//! │   Host objects + TypeRegistry (crate::host)              │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod generator;
pub mod marshal;

pub use generator::Binder;
pub use marshal::{AssignPolicy, HandleArena};
