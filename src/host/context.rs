//! 以 `ctx` 暴露给脚本的执行上下文

use std::collections::BTreeMap;

use super::convert::{arg, IntoHost};
use super::value::HostValue;
use crate::core::error::HostResult;
use crate::host_type;

/// 标识一次脚本运行，并携带调用方提供的标签
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub script: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

impl ExecContext {
    pub fn new(namespace: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// 全限定脚本名，`namespace/script`
    pub fn fqn(&self) -> String {
        format!("{}/{}", self.namespace, self.script)
    }

    fn value(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        let key: String = arg(&args, 0)?;
        Ok(vec![self.labels.get(&key).cloned().into_host()])
    }

    // 绑定层内部从不取消运行
    fn err(&mut self, _args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
        Ok(vec![HostValue::Nil])
    }
}

host_type! {
    ExecContext in "context" {
        fields { script: Str, namespace: Str, labels: Map }
        methods {
            Value(1) => ExecContext::value,
            Err(0) => ExecContext::err,
        }
    }
}
