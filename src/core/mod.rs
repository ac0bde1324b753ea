//! 核心模块
//!
//! 包含运行时的基础设施：
//! - `error` - 错误类型定义
//! - `logging` - 日志初始化
//! - `macros` - `impl_default!` 与 `host_type!`

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{
    BindError, BindResult, BridgeError, BridgeResult, CompileError, CompileResult, Error,
    ExecError, ExecResult, HostError, HostResult, MarshalError, MarshalResult, ModuleError,
    ModuleResult, RegistryError, Result,
};

pub use logging::init_logging;
