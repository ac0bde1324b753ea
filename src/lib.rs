//! # hostlua
//!
//! 把 Lua 5.4 嵌入宿主程序，让脚本无需编写任何宿主语言胶水代码就能读取和修改宿主管理的对象。
//!
//! ## 功能特性
//!
//! - **值转换器**：宿主值与 Lua 值双向转换，通过隐藏的代理句柄保持对象身份
//! - **绑定生成器**：函数、带方法的对象代理、带 `new`/`get`/`set` 的类，以及整个包作为命名空间
//! - **模块解析器**：基于索引搜索路径的实例级 `require`，支持原生 C 模块
//! - **原生解释器桥接**：通过短生命周期的第二解释器使用 LPeg 等纯 C 库
//! - **方言编译**：借助方言自带的编译器把 MoonScript 编译为 Lua
//!
//! ## 架构设计
//!
//! 宿主类型通过 [`host_type!`] 静态描述自身，描述符汇集在进程级只读的 [`host::TypeRegistry`] 中。
//! 每次脚本运行都有自己的解释器、模块缓存和句柄表，并发运行之间只共享注册表。
//!
//! ### 示例
//!
//! ```no_run
//! use hostlua::host::{ExecContext, HostValue, ObjectRef, Store};
//!
//! let client = HostValue::ptr(ObjectRef::new(Store::new("demo")));
//! let ctx = ExecContext::new("default", "hello");
//! let output = hostlua::execute(ctx, r#"client.Put("greeting", "hi") print(client.Len())"#, client)?;
//! assert_eq!(output, "1\n");
//! # Ok::<(), hostlua::core::error::ExecError>(())
//! ```
//!
//! ## 模块
//!
//! - [`core`]: 错误、日志、宏
//! - [`host`]: 宿主值模型、反射、注册表、内置宿主类型
//! - [`bindings`]: 值转换器与绑定生成器
//! - [`scripting`]: 运行时、模块解析器、原生桥接、方言编译
//! - [`config`]: 配置

/// 错误、日志与宏
#[macro_use]
pub mod core;
/// 宿主值模型与类型注册表
pub mod host;
/// 脚本语言绑定
pub mod bindings;
/// 脚本运行时与模块加载
pub mod scripting;
/// 配置系统
pub mod config;

pub use crate::core::error::{Error, Result};
pub use scripting::{compile_and_execute, execute, execute_with, RunStatus, ScriptRuntime};
