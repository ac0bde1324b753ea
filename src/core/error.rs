//! 统一错误处理模块
//!
//! 绑定运行时各层的错误类型。
//!
//! ## 错误类型分层
//!
//! - **装配错误**（`BindError`）：暴露请求不合法，在任何脚本代码运行前返回给调用方。
//! - **模块错误**（`ModuleError`）：在 `require` 内部抛出，脚本可见。
//! - **转换错误**（`MarshalError`）：调用时转换值失败。
//! - **宿主错误**（`HostError`）：暴露的宿主函数和方法内部失败。
//!
//! `Error` 汇总上述全部错误，供只需要一种类型的调用方使用。

use std::path::PathBuf;

use thiserror::Error;

/// 库级错误类型
#[derive(Error, Debug)]
pub enum Error {
    #[error("Binding error: {0}")]
    Bind(#[from] BindError),

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// 宿主函数和方法抛出的失败
///
/// 它们以普通运行时错误的形式到达脚本，不附带宿主调用栈。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("expected {expected}, found {found}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing argument #{0}")]
    MissingArgument(usize),

    #[error("receiver is not a {0}")]
    Receiver(&'static str),

    #[error("{0} is already in use")]
    Busy(&'static str),

    #[error("{type_name} has no field {field}")]
    NoField {
        type_name: &'static str,
        field: String,
    },

    #[error("{0}")]
    Custom(String),
}

impl HostError {
    pub fn custom(message: impl Into<String>) -> Self {
        HostError::Custom(message.into())
    }
}

/// 宿主值与脚本值之间的转换错误
#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("unsupported host value kind: {0}")]
    Unsupported(&'static str),

    #[error("invalid table key: {0}")]
    InvalidKey(String),

    #[error("unsupported field type for {field}: {kind}")]
    UnsupportedField { field: String, kind: &'static str },

    #[error("field {field} expects {expected}, got {found}")]
    FieldMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("cannot convert a table that contains itself")]
    Cyclic,

    #[error("table nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// 装配期错误：返回时尚未安装任何东西
#[derive(Error, Debug)]
pub enum BindError {
    #[error("object must be pointer: {name} is {kind}")]
    NotPointer { name: String, kind: &'static str },

    #[error("object {0} is a nil pointer")]
    NilObject(String),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// 模块解析错误
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("module not found: {0}")]
    NotFound(String),

    #[error("loop or previous error loading module '{0}'")]
    Cycle(String),

    #[error("error reading module {name} from {path}: {source}")]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error loading module {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: mlua::Error,
    },

    #[error("failed to open native module {path}: {reason}")]
    Library { path: PathBuf, reason: String },

    #[error("no {symbol} function found in {path}")]
    Symbol { symbol: String, path: PathBuf },
}

/// 原生解释器桥接错误
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("cannot handle thread at {0}")]
    Thread(String),

    #[error("unsupported {kind} value at {path}")]
    Unsupported { path: String, kind: &'static str },

    #[error("native module {0} did not produce a table")]
    NotATable(String),

    #[error("argument #{0} is not a string")]
    NonStringArgument(usize),

    #[error("result #{index} of {function} is a {kind}")]
    NonStringResult {
        function: String,
        index: usize,
        kind: &'static str,
    },

    #[error("error calling native function {function}: {source}")]
    Call {
        function: String,
        #[source]
        source: mlua::Error,
    },

    #[error("unknown native function handle {0}")]
    UnknownFunction(usize),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// 方言编译错误
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// 类型注册表错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("type registry already initialised")]
    AlreadyInstalled,

    #[error("duplicate registry entry: {0}")]
    Duplicate(String),
}

/// 脚本运行报告的错误
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("setup failed: {0}")]
    Setup(#[from] BindError),

    #[error("{0}")]
    Script(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("host panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type HostResult<T> = std::result::Result<T, HostError>;
pub type MarshalResult<T> = std::result::Result<T, MarshalError>;
pub type BindResult<T> = std::result::Result<T, BindError>;
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
pub type CompileResult<T> = std::result::Result<T, CompileError>;
pub type ExecResult<T> = std::result::Result<T, ExecError>;

// 回调返回 mlua::Result；以下转换让它们可以对本库错误使用 `?`

impl From<MarshalError> for mlua::Error {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Lua(err) => err,
            other => mlua::Error::external(other),
        }
    }
}

impl From<HostError> for mlua::Error {
    fn from(err: HostError) -> Self {
        mlua::Error::external(err)
    }
}

impl From<ModuleError> for mlua::Error {
    fn from(err: ModuleError) -> Self {
        mlua::Error::external(err)
    }
}

impl From<BridgeError> for mlua::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Lua(err) => err,
            other => mlua::Error::external(other),
        }
    }
}
