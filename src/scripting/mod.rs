//! 脚本系统
//!
//! - `engine` - 运行时与 `execute` 入口
//! - `loader` - `require` 模块解析
//! - `native` - 原生解释器桥接
//! - `dialect` - 方言编译

pub mod dialect;
pub mod engine;
pub mod loader;
pub mod native;

pub use dialect::DialectCompiler;
pub use engine::{compile_and_execute, execute, execute_with, RunStatus, ScriptRuntime};
pub use loader::{ModuleIndex, ModuleResolver, ModuleSource};
pub use native::{ForeignValue, FunctionHandle, NativeBridge, NativeSession};
