/// 模块搜索配置

use serde::{Deserialize, Serialize};
use std::env;

use super::{ConfigError, ConfigResult};

/// `require` 查找脚本模块和原生模块的位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// 保存脚本搜索路径的环境变量
    pub path_var: String,

    /// 保存原生搜索路径的环境变量
    pub cpath_var: String,

    /// 显式脚本搜索路径，优先于 `path_var`
    pub path: Option<String>,

    /// 显式原生搜索路径，优先于 `cpath_var`
    pub cpath: Option<String>,

    /// 脚本模块文件后缀
    pub suffix: String,

    /// 原生模块文件后缀
    pub native_suffix: String,

    /// 是否在配置的根目录之后扫描工作目录
    pub include_cwd: bool,

    /// 是否索引原生模块
    pub native_modules: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            path_var: "LUA_PATH".to_string(),
            cpath_var: "LUA_CPATH".to_string(),
            path: None,
            cpath: None,
            suffix: ".lua".to_string(),
            native_suffix: env::consts::DLL_SUFFIX.to_string(),
            include_cwd: true,
            native_modules: true,
        }
    }
}

impl ModulesConfig {
    /// 实际生效的脚本搜索路径
    pub fn script_path(&self) -> Option<String> {
        self.path.clone().or_else(|| env::var(&self.path_var).ok())
    }

    /// 实际生效的原生搜索路径
    pub fn native_path(&self) -> Option<String> {
        self.cpath.clone().or_else(|| env::var(&self.cpath_var).ok())
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, suffix) in [("suffix", &self.suffix), ("native_suffix", &self.native_suffix)] {
            if !suffix.starts_with('.') || suffix.len() < 2 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid module {}: {:?}",
                    name, suffix
                )));
            }
        }
        if self.suffix == self.native_suffix {
            return Err(ConfigError::ValidationError(
                "Script and native module suffixes must differ".to_string(),
            ));
        }
        Ok(())
    }
}
