//! 以 `client` 句柄交给脚本的内存对象存储
//!
//! 代替集群访问：脚本可以读写和删除具名对象，
//! 也可以通过 `store` 包构造新的 [`Resource`]。

use std::collections::BTreeMap;

use super::convert::{arg, IntoHost};
use super::reflect::{FunctionInfo, HostType};
use super::value::{HostValue, ObjectRef};
use crate::core::error::HostResult;
use crate::host_type;

#[derive(Debug, Clone, Default)]
pub struct Store {
    pub name: String,
    entries: BTreeMap<String, HostValue>,
}

impl Store {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: HostValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn entry(&self, key: &str) -> Option<&HostValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        let key: String = arg(&args, 0)?;
        Ok(vec![self.entries.get(&key).cloned().unwrap_or_default()])
    }

    fn put(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        let key: String = arg(&args, 0)?;
        let value = args.get(1).cloned().unwrap_or_default();
        // 每次写入资源都推进它的修订号
        if let Some(obj) = value.as_object() {
            if std::ptr::eq(obj.type_info(), Resource::descriptor()) {
                obj.with_mut(|resource: &mut Resource| resource.revision += 1)?;
            }
        }
        tracing::debug!(target: "script", store = %self.name, key = %key, "put");
        self.entries.insert(key, value);
        Ok(Vec::new())
    }

    fn delete(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        let key: String = arg(&args, 0)?;
        Ok(vec![self.entries.remove(&key).is_some().into_host()])
    }

    fn keys(&mut self, _args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        Ok(vec![self.entries.keys().cloned().collect::<Vec<_>>().into_host()])
    }

    fn count(&mut self, _args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        Ok(vec![self.entries.len().into_host()])
    }
}

host_type! {
    Store in "store" {
        fields { name: Str }
        private { entries }
        methods {
            Get(1) => Store::get,
            Put(2) => Store::put,
            Delete(1) => Store::delete,
            Keys(0) => Store::keys,
            Len(0) => Store::count,
        }
    }
}

/// 保存在 [`Store`] 中的具名对象
#[derive(Debug, Clone, Default)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub replicas: i64,
    pub weight: f64,
    pub ready: bool,
    pub labels: BTreeMap<String, String>,
    revision: u64,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: "default".to_string(),
            ..Self::default()
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

host_type! {
    Resource in "store" {
        fields {
            kind: Str,
            name: Str,
            namespace: Str,
            replicas: Int,
            weight: Float,
            ready: Bool,
            labels: Map,
        }
        private { revision }
    }
}

fn new_resource(args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
    let kind: String = arg(&args, 0)?;
    let name: String = arg(&args, 1)?;
    Ok(vec![ObjectRef::new(Resource::new(kind, name)).into_host()])
}

fn version(_args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
    Ok(vec!["v1".into_host()])
}

pub const NEW_RESOURCE: FunctionInfo = FunctionInfo::new("store", "NewResource", 2, new_resource);
pub const VERSION: FunctionInfo = FunctionInfo::new("store", "Version", 0, version);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_keeps_identity() {
        let store = ObjectRef::new(Store::new("test"));
        let resource = ObjectRef::new(Resource::new("Deployment", "web"));
        let info = Store::descriptor();

        let put = info.method("Put").unwrap();
        (put.call)(
            &store,
            vec![HostValue::str("web"), HostValue::ptr(resource.clone())],
        )
        .unwrap();

        let get = info.method("Get").unwrap();
        let out = (get.call)(&store, vec![HostValue::str("web")]).unwrap();
        assert_eq!(out, vec![HostValue::ptr(resource)]);
    }

    #[test]
    fn test_put_bumps_revision() {
        let store = ObjectRef::new(Store::new("test"));
        let resource = ObjectRef::new(Resource::new("Deployment", "web"));
        let put = Store::descriptor().method("Put").unwrap();

        for key in ["a", "b"] {
            (put.call)(&store, vec![HostValue::str(key), HostValue::ptr(resource.clone())]).unwrap();
        }
        assert_eq!(resource.with(|r: &Resource| r.revision()), Some(2));

        // 非资源对象（包括存储自身）原样保存
        (put.call)(&store, vec![HostValue::str("self"), HostValue::ptr(store.clone())]).unwrap();
        assert_eq!(store.with(|s: &Store| s.len()), Some(3));
    }

    #[test]
    fn test_new_resource_defaults() {
        let out = (NEW_RESOURCE.call)(vec![HostValue::str("Service"), HostValue::str("api")]).unwrap();
        let obj = out[0].as_object().unwrap();
        assert_eq!(obj.field("namespace"), Ok(Some(HostValue::str("default"))));
        assert_eq!(obj.field("revision"), Ok(None));
    }
}
