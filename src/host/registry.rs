//! 进程级类型注册表
//!
//! 把全限定名（`package::Name`）映射到类型描述符和自由函数。只构建一次，
//! 之后在所有解释器实例间只读共享；它替代了对源码包的扫描。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::reflect::{FunctionInfo, HostType, TypeInfo};
use super::{context, store};
use crate::core::error::RegistryError;

/// 注册表条目
#[derive(Debug, Clone, Copy)]
pub enum Entry {
    Type(&'static TypeInfo),
    Function(FunctionInfo),
}

impl Entry {
    pub fn name(&self) -> &'static str {
        match self {
            Entry::Type(info) => info.name,
            Entry::Function(info) => info.name,
        }
    }

    pub fn full_name(&self) -> String {
        match self {
            Entry::Type(info) => info.full_name(),
            Entry::Function(info) => info.full_name(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<String, Entry>,
    /// 包路径 -> 按注册顺序排列的全限定名
    packages: HashMap<&'static str, Vec<String>>,
}

static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

impl TypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// 包含本库内置宿主类型的注册表
    pub fn builtin() -> Self {
        Self::builder().with_builtins().build()
    }

    /// 进程级注册表；若 [`TypeRegistry::install`] 未先执行，
    /// 则由 [`TypeRegistry::builtin`] 惰性构建。
    pub fn global() -> Arc<TypeRegistry> {
        GLOBAL.get_or_init(|| Arc::new(Self::builtin())).clone()
    }

    /// 安装进程级注册表。只有第一次调用成功，
    /// 且必须早于任何 [`TypeRegistry::global`] 调用。
    pub fn install(registry: TypeRegistry) -> Result<Arc<TypeRegistry>, RegistryError> {
        let registry = Arc::new(registry);
        GLOBAL
            .set(registry.clone())
            .map_err(|_| RegistryError::AlreadyInstalled)?;
        tracing::info!(target: "binding", entries = registry.len(), "Type registry installed");
        Ok(registry)
    }

    pub fn lookup(&self, full_name: &str) -> Option<Entry> {
        self.entries.get(full_name).copied()
    }

    pub fn lookup_type(&self, full_name: &str) -> Option<&'static TypeInfo> {
        match self.lookup(full_name)? {
            Entry::Type(info) => Some(info),
            Entry::Function(_) => None,
        }
    }

    pub fn lookup_function(&self, full_name: &str) -> Option<FunctionInfo> {
        match self.lookup(full_name)? {
            Entry::Function(info) => Some(info),
            Entry::Type(_) => None,
        }
    }

    /// `package` 声明的条目，按注册顺序
    pub fn package(&self, package: &str) -> Vec<Entry> {
        self.packages
            .get(package)
            .map(|names| names.iter().filter_map(|name| self.lookup(name)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    registry: TypeRegistry,
    duplicates: Vec<String>,
}

impl RegistryBuilder {
    pub fn with_builtins(self) -> Self {
        self.register_type::<context::ExecContext>()
            .register_type::<store::Store>()
            .register_type::<store::Resource>()
            .register_fn(store::NEW_RESOURCE)
            .register_fn(store::VERSION)
    }

    pub fn register_type<T: HostType>(self) -> Self {
        self.insert(Entry::Type(T::descriptor()))
    }

    pub fn register_fn(self, function: FunctionInfo) -> Self {
        self.insert(Entry::Function(function))
    }

    fn insert(mut self, entry: Entry) -> Self {
        let full_name = entry.full_name();
        let package = match entry {
            Entry::Type(info) => info.package,
            Entry::Function(info) => info.package,
        };
        if self.registry.entries.insert(full_name.clone(), entry).is_some() {
            self.duplicates.push(full_name);
            return self;
        }
        self.registry
            .packages
            .entry(package)
            .or_default()
            .push(full_name);
        self
    }

    /// 构建注册表；重复注册的名称保留最后一个条目
    pub fn build(self) -> TypeRegistry {
        for name in &self.duplicates {
            tracing::warn!(target: "binding", name = %name, "Duplicate registry entry replaced");
        }
        self.registry
    }

    /// 同 [`RegistryBuilder::build`]，但拒绝重复名称
    pub fn try_build(self) -> Result<TypeRegistry, RegistryError> {
        match self.duplicates.first() {
            Some(name) => Err(RegistryError::Duplicate(name.clone())),
            None => Ok(self.registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = TypeRegistry::builtin();
        assert!(registry.lookup_type("store::Resource").is_some());
        assert!(registry.lookup_function("store::NewResource").is_some());
        assert!(registry.lookup("store::Missing").is_none());
    }

    #[test]
    fn test_package_order() {
        let registry = TypeRegistry::builtin();
        let names: Vec<_> = registry.package("store").iter().map(Entry::name).collect();
        assert_eq!(names, vec!["Store", "Resource", "NewResource", "Version"]);
        assert!(registry.package("nowhere").is_empty());
    }

    #[test]
    fn test_duplicates_rejected() {
        let result = TypeRegistry::builder()
            .register_fn(store::VERSION)
            .register_fn(store::VERSION)
            .try_build();
        assert_eq!(
            result.unwrap_err(),
            RegistryError::Duplicate("store::Version".to_string())
        );
    }

    #[test]
    fn test_registry_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypeRegistry>();
    }
}
