/// 统一配置系统
///
/// 提供TOML/JSON配置文件和环境变量覆盖
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod binding;
pub mod modules;

pub use binding::{BindingConfig, BridgeConfig, DialectConfig, NamespaceConfig};
pub use modules::ModulesConfig;

use crate::bindings::AssignPolicy;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 运行时主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 模块搜索配置
    pub modules: ModulesConfig,

    /// 绑定配置
    pub binding: BindingConfig,

    /// 原生解释器桥接配置
    pub bridge: BridgeConfig,

    /// 方言编译配置
    pub dialect: DialectConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// 应用通过 `lookup` 读到的 `HOSTLUA_*` 覆盖项
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("HOSTLUA_LUA_PATH") {
            self.modules.path = Some(val);
        }
        if let Some(val) = lookup("HOSTLUA_LUA_CPATH") {
            self.modules.cpath = Some(val);
        }
        if let Some(val) = lookup("HOSTLUA_NATIVE_MODULES") {
            self.modules.native_modules = val.parse().unwrap_or(self.modules.native_modules);
        }
        if let Some(val) = lookup("HOSTLUA_ASSIGN_POLICY") {
            match val.to_ascii_lowercase().as_str() {
                "lenient" => self.binding.assign_policy = AssignPolicy::Lenient,
                "strict" => self.binding.assign_policy = AssignPolicy::Strict,
                other => tracing::warn!(value = other, "Ignoring unknown HOSTLUA_ASSIGN_POLICY"),
            }
        }
        if let Some(val) = lookup("HOSTLUA_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.modules.validate()?;
        self.binding.validate()?;
        self.dialect.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./hostlua.toml
    /// 2. ./hostlua.json
    /// 3. <config dir>/hostlua/config.toml
    /// 4. 使用默认配置
    ///
    /// 环境变量覆盖项作用于最终胜出的配置。
    pub fn load_or_default() -> Self {
        let mut config = Self::find().unwrap_or_else(|| {
            tracing::debug!("Using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn find() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("hostlua.toml") {
            tracing::info!("Loaded config from hostlua.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("hostlua.json") {
            tracing::info!("Loaded config from hostlua.json");
            return Some(config);
        }

        let config_path: PathBuf = dirs::config_dir()?.join("hostlua").join("config.toml");
        match Self::from_toml_file(&config_path) {
            Ok(config) => {
                tracing::info!(path = ?config_path, "Loaded config");
                Some(config)
            }
            Err(_) => None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出ANSI颜色
    pub ansi: bool,
}

use crate::impl_default;

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    ansi: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `EnvFilter` 能识别的过滤指令
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modules.path_var, "LUA_PATH");
        assert_eq!(config.bridge.modules, vec!["lpeg".to_string()]);
        assert_eq!(config.binding.assign_policy, AssignPolicy::Lenient);
    }

    #[test]
    fn test_toml_serialization() {
        let config = RuntimeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_json_serialization() {
        let config = RuntimeConfig::default();
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = RuntimeConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [binding]
            assign_policy = "strict"
            namespaces = [{ name = "store", package = "store" }]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.binding.assign_policy, AssignPolicy::Strict);
        assert_eq!(config.binding.namespaces[0].package, "store");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.modules.suffix, ".lua");
    }

    #[test]
    fn test_overrides() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| match key {
            "HOSTLUA_LUA_PATH" => Some("/opt/lua/?.lua".to_string()),
            "HOSTLUA_ASSIGN_POLICY" => Some("Strict".to_string()),
            "HOSTLUA_NATIVE_MODULES" => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(config.modules.script_path().as_deref(), Some("/opt/lua/?.lua"));
        assert_eq!(config.binding.assign_policy, AssignPolicy::Strict);
        assert!(!config.modules.native_modules);
    }

    #[test]
    fn test_validation() {
        let mut config = RuntimeConfig::default();
        config.binding.namespaces.push(NamespaceConfig {
            name: "client".to_string(),
            package: "store".to_string(),
        });
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.modules.suffix = "lua".to_string();
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.dialect.parse_module = "moonscript..parse".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostlua.toml");
        let mut config = RuntimeConfig::default();
        config.bridge.modules.push("lfs".to_string());
        config.save_toml(&path).unwrap();
        assert_eq!(RuntimeConfig::from_toml_file(&path).unwrap(), config);
    }
}
