/// 绑定、桥接与方言配置

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult};
use crate::bindings::AssignPolicy;

/// 运行时自己安装的全局变量
const RESERVED: &[&str] = &["ctx", "client", "print", "log", "require"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// 命名空间表的全局名称
    pub name: String,

    /// 其中暴露的注册表包
    pub package: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// `set` 如何处理类型不符的值
    pub assign_policy: AssignPolicy,

    /// 暴露给每个脚本的额外命名空间
    pub namespaces: Vec<NamespaceConfig>,
}

impl BindingConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = Vec::new();
        for ns in &self.namespaces {
            if !is_identifier(&ns.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid namespace name: {:?}",
                    ns.name
                )));
            }
            if RESERVED.contains(&ns.name.as_str()) || seen.contains(&&ns.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Namespace name already in use: {}",
                    ns.name
                )));
            }
            seen.push(&ns.name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 由原生解释器提供的模块
    pub modules: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            modules: vec!["lpeg".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectConfig {
    /// 提供 `string(source) -> tree, err` 的模块
    pub parse_module: String,

    /// 提供 `tree(tree) -> code, err, pos` 的模块
    pub compile_module: String,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self {
            parse_module: "moonscript.parse".to_string(),
            compile_module: "moonscript.compile".to_string(),
        }
    }
}

impl DialectConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        for module in [&self.parse_module, &self.compile_module] {
            if module.is_empty() || !module.split('.').all(is_identifier) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid dialect module name: {:?}",
                    module
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
