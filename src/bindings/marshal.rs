//! 值编组器
//!
//! 在宿主值（[`HostValue`]）与 Lua 值之间转换。
//!
//! 结构体和指针会变成代理表。代理的身份标记从不放在表字段里：每个代理在一张
//! 弱键表（挂在 Lua 注册表中）里对应一个句柄 userdata，句柄指向本解释器的
//! [`HandleArena`] 槽位，槽位保存原始宿主值及其类型描述。因此 `pairs()` 只能
//! 看到真实字段，`to_host` 作用于代理时返回的是同一个宿主对象。代理被回收后，
//! 句柄随之回收并释放槽位。
//!
//! 数值：整数值的浮点数进入 Lua 时变为整数；Lua 中整数值的数字回到宿主时为
//! `Int`，其余浮点数原样传递。

use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::{Rc, Weak};

use mlua::{AnyUserData, Lua, Table, UserData, Value};
use serde::{Deserialize, Serialize};

use crate::core::error::{MarshalError, MarshalResult};
use crate::host::{FieldKind, HostValue, ObjectRef, TypeInfo};

const PROXY_REGISTRY: &str = "hostlua.proxies";

/// 脚本表转换为宿主值时允许的最大嵌套层数
pub const MAX_DEPTH: usize = 128;

/// `set` 遇到类型与字段不符的值时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignPolicy {
    /// 丢弃该赋值并记录警告
    #[default]
    Lenient,
    /// 抛出脚本错误
    Strict,
}

struct Slot {
    value: HostValue,
    ty: Option<&'static TypeInfo>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Option<Slot>>,
    free: Vec<usize>,
    live: usize,
}

impl Slots {
    fn insert(&mut self, slot: Slot) -> usize {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(slot);
                index
            }
            None => {
                self.entries.push(Some(slot));
                self.entries.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            if entry.take().is_some() {
                self.live -= 1;
                self.free.push(index);
            }
        }
    }

    fn get(&self, index: usize) -> Option<&Slot> {
        self.entries.get(index).and_then(Option::as_ref)
    }
}

/// 单个解释器实例中仍存活的代理所引用的宿主值
///
/// 作为 Lua app data 保存，与解释器同寿命。槽位在代理被回收时释放并复用。
#[derive(Default)]
pub struct HandleArena {
    slots: Rc<RefCell<Slots>>,
}

impl HandleArena {
    fn insert(&self, value: HostValue, ty: Option<&'static TypeInfo>) -> MarshalResult<ProxyHandle> {
        let mut slots = self
            .slots
            .try_borrow_mut()
            .map_err(|_| MarshalError::InvalidObject("handle arena busy".into()))?;
        let index = slots.insert(Slot { value, ty });
        Ok(ProxyHandle {
            index,
            slots: Rc::downgrade(&self.slots),
        })
    }

    fn with_slot<R>(&self, index: usize, f: impl FnOnce(&Slot) -> R) -> MarshalResult<Option<R>> {
        let slots = self
            .slots
            .try_borrow()
            .map_err(|_| MarshalError::InvalidObject("handle arena busy".into()))?;
        Ok(slots.get(index).map(f))
    }

    /// 当前占用的槽位数
    pub fn len(&self) -> usize {
        self.slots.try_borrow().map(|slots| slots.live).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 弱键表中代理对应的值；被 Lua 回收时释放槽位
struct ProxyHandle {
    index: usize,
    slots: Weak<RefCell<Slots>>,
}

impl UserData for ProxyHandle {}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        match slots.try_borrow_mut() {
            Ok(mut slots) => slots.release(self.index),
            Err(_) => tracing::warn!(target: "binding", slot = self.index, "Handle arena busy, slot leaked"),
        };
    }
}

/// 确保 `lua` 带有本实例的编组状态
pub fn prepare(lua: &Lua) -> MarshalResult<()> {
    if lua.app_data_ref::<HandleArena>().is_none() {
        lua.set_app_data(HandleArena::default());
    }
    proxy_registry(lua)?;
    Ok(())
}

fn proxy_registry(lua: &Lua) -> MarshalResult<Table> {
    if let Some(table) = lua.named_registry_value::<Option<Table>>(PROXY_REGISTRY)? {
        return Ok(table);
    }
    let table = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.raw_set("__mode", "k")?;
    table.set_metatable(Some(meta));
    lua.set_named_registry_value(PROXY_REGISTRY, table.clone())?;
    Ok(table)
}

fn attach(lua: &Lua, proxy: &Table, value: HostValue, ty: Option<&'static TypeInfo>) -> MarshalResult<()> {
    if lua.app_data_ref::<HandleArena>().is_none() {
        lua.set_app_data(HandleArena::default());
    }
    // 借用在进入 Lua 之前结束，回收句柄时才能拿到槽位表
    let handle = {
        let arena = lua
            .app_data_ref::<HandleArena>()
            .ok_or_else(|| MarshalError::InvalidObject("handle arena unavailable".into()))?;
        arena.insert(value, ty)?
    };
    let handle = lua.create_userdata(handle)?;
    proxy_registry(lua)?.raw_set(proxy.clone(), handle)?;
    Ok(())
}

fn handle_of(lua: &Lua, table: &Table) -> MarshalResult<Option<usize>> {
    let Some(registry) = lua.named_registry_value::<Option<Table>>(PROXY_REGISTRY)? else {
        return Ok(None);
    };
    let Some(handle) = registry.raw_get::<Option<AnyUserData>>(table.clone())? else {
        return Ok(None);
    };
    let index = handle.borrow::<ProxyHandle>()?.index;
    Ok(Some(index))
}

fn with_handle<R>(lua: &Lua, table: &Table, f: impl FnOnce(&Slot) -> R) -> MarshalResult<Option<R>> {
    let Some(index) = handle_of(lua, table)? else {
        return Ok(None);
    };
    let arena = lua
        .app_data_ref::<HandleArena>()
        .ok_or_else(|| MarshalError::InvalidObject("handle arena unavailable".into()))?;
    arena.with_slot(index, f)
}

/// 代理表所代表的宿主值；`table` 不是代理时为 `None`
pub fn unwrap_proxy(lua: &Lua, table: &Table) -> MarshalResult<Option<HostValue>> {
    with_handle(lua, table, |slot| slot.value.clone())
}

/// 代理表的类型标记
pub fn type_of(lua: &Lua, table: &Table) -> MarshalResult<Option<&'static TypeInfo>> {
    Ok(with_handle(lua, table, |slot| slot.ty)?.flatten())
}

// ============================================================================
// 宿主 -> 脚本
// ============================================================================

/// 转换浮点数，整数值折叠为 Lua 整数
pub fn number(x: f64) -> Value {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if x.is_finite() && x.fract() == 0.0 && (-LIMIT..LIMIT).contains(&x) {
        Value::Integer(x as i64)
    } else {
        Value::Number(x)
    }
}

pub fn to_script(lua: &Lua, value: &HostValue) -> MarshalResult<Value> {
    Ok(match value {
        HostValue::Nil => Value::Nil,
        HostValue::Bool(b) => Value::Boolean(*b),
        HostValue::Int(i) => Value::Integer(*i),
        HostValue::Float(x) => number(*x),
        HostValue::Str(s) => Value::String(lua.create_string(s)?),
        HostValue::List(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_script(lua, item)?)?;
            }
            Value::Table(table)
        }
        HostValue::Map(entries) => {
            let table = lua.create_table_with_capacity(0, entries.len())?;
            for (key, item) in entries {
                table.raw_set(table_key(lua, key)?, to_script(lua, item)?)?;
            }
            Value::Table(table)
        }
        HostValue::Struct(obj) => Value::Table(struct_proxy(lua, obj)?),
        HostValue::Ptr(ptr) => Value::Table(pointer_proxy(lua, ptr.as_ref())?),
        HostValue::Opaque(kind) => return Err(MarshalError::Unsupported(kind)),
    })
}

/// 标量键保持原类型，复合键转为字符串
fn table_key(lua: &Lua, key: &HostValue) -> MarshalResult<Value> {
    match key {
        HostValue::Nil | HostValue::Ptr(None) => Err(MarshalError::InvalidKey("nil".into())),
        HostValue::Float(x) if x.is_nan() => Err(MarshalError::InvalidKey("NaN".into())),
        HostValue::Bool(_) | HostValue::Int(_) | HostValue::Float(_) | HostValue::Str(_) => {
            to_script(lua, key)
        }
        compound => Ok(Value::String(lua.create_string(compound.to_string())?)),
    }
}

/// 结构体代理：每个公开字段一项，外加隐藏的标记
pub fn struct_proxy(lua: &Lua, obj: &ObjectRef) -> MarshalResult<Table> {
    let fields = obj.public_fields()?;
    let table = lua.create_table_with_capacity(0, fields.len())?;
    for (name, value) in &fields {
        table.raw_set(*name, to_script(lua, value)?)?;
    }
    attach(lua, &table, HostValue::Struct(obj.clone()), Some(obj.type_info()))?;
    Ok(table)
}

/// 指针代理：没有字段，只有标记。空指针没有类型标记。
pub fn pointer_proxy(lua: &Lua, ptr: Option<&ObjectRef>) -> MarshalResult<Table> {
    let table = lua.create_table()?;
    let ty = ptr.map(ObjectRef::type_info);
    attach(lua, &table, HostValue::Ptr(ptr.cloned()), ty)?;
    Ok(table)
}

// ============================================================================
// 脚本 -> 宿主
// ============================================================================

/// 自引用的表返回 [`MarshalError::Cyclic`]，嵌套超过 [`MAX_DEPTH`] 层返回
/// [`MarshalError::TooDeep`]。同一张子表出现多次（无环）是允许的。
pub fn to_host(lua: &Lua, value: &Value) -> MarshalResult<HostValue> {
    to_host_within(lua, value, &mut Vec::new())
}

fn to_host_within(lua: &Lua, value: &Value, open: &mut Vec<*const c_void>) -> MarshalResult<HostValue> {
    Ok(match value {
        Value::Nil => HostValue::Nil,
        Value::Boolean(b) => HostValue::Bool(*b),
        Value::Integer(i) => HostValue::Int(*i),
        Value::Number(x) => match number(*x) {
            Value::Integer(i) => HostValue::Int(i),
            _ => HostValue::Float(*x),
        },
        Value::String(s) => HostValue::Str(s.to_string_lossy().into()),
        Value::Table(table) => table_to_host(lua, table, open)?,
        other => HostValue::Str(format!("{}: {:p}", other.type_name(), other.to_pointer())),
    })
}

// `open` 是当前递归路径上尚未转换完的表
fn table_to_host(lua: &Lua, table: &Table, open: &mut Vec<*const c_void>) -> MarshalResult<HostValue> {
    if let Some(value) = unwrap_proxy(lua, table)? {
        return Ok(value);
    }

    let id = table.to_pointer();
    if open.contains(&id) {
        return Err(MarshalError::Cyclic);
    }
    if open.len() >= MAX_DEPTH {
        return Err(MarshalError::TooDeep(MAX_DEPTH));
    }
    open.push(id);
    let result = table_entries(lua, table, open);
    open.pop();
    result
}

fn table_entries(lua: &Lua, table: &Table, open: &mut Vec<*const c_void>) -> MarshalResult<HostValue> {
    let mut entries = Vec::new();
    let mut indexed = Vec::new();
    let mut is_array = true;
    for pair in table.pairs::<Value, Value>() {
        let (key, item) = pair?;
        if let Value::Integer(i) = key {
            indexed.push((i, item.clone()));
        } else {
            is_array = false;
        }
        entries.push((key, item));
    }

    if is_array {
        indexed.sort_by_key(|(i, _)| *i);
        let items = indexed
            .iter()
            .map(|(_, item)| to_host_within(lua, item, open))
            .collect::<MarshalResult<Vec<_>>>()?;
        return Ok(HostValue::List(items));
    }

    let mut map = Vec::with_capacity(entries.len());
    for (key, item) in &entries {
        let key = HostValue::Str(to_host_within(lua, key, open)?.to_string());
        map.push((key, to_host_within(lua, item, open)?));
    }
    Ok(HostValue::Map(map))
}

// ============================================================================
// 字段赋值
// ============================================================================

/// 把 `table` 中每个字符串键赋给 `target` 的同名公开字段
///
/// 未知字段和私有字段被跳过。类型不符的值按 `policy` 处理；脚本不允许赋值的
/// 字段类型总是报错。
pub fn assign_fields(
    lua: &Lua,
    target: &ObjectRef,
    table: &Table,
    policy: AssignPolicy,
) -> MarshalResult<()> {
    let info = target.type_info();
    for pair in table.pairs::<Value, Value>() {
        let (key, item) = pair?;
        let Value::String(key) = key else {
            continue;
        };
        let name: String = key.to_string_lossy().into();
        let Some(field) = info.field(&name).filter(|field| field.public) else {
            continue;
        };
        if !field.kind.is_assignable() {
            return Err(MarshalError::UnsupportedField {
                field: name,
                kind: field.kind.name(),
            });
        }

        let value = to_host(lua, &item)?;
        let found = value.kind_name();
        let Some(value) = coerce(field.kind, value) else {
            match policy {
                AssignPolicy::Lenient => {
                    tracing::warn!(
                        target: "binding",
                        type_name = info.name,
                        field = %name,
                        expected = field.kind.name(),
                        found,
                        "Dropped field assignment with mismatched type"
                    );
                    continue;
                }
                AssignPolicy::Strict => {
                    return Err(MarshalError::FieldMismatch {
                        field: name,
                        expected: field.kind.name(),
                        found,
                    })
                }
            }
        };
        target.borrow_mut()?.set_field(&name, value)?;
    }
    Ok(())
}

/// 按字段类型检查并转换；整数可放宽为浮点字段
fn coerce(kind: FieldKind, value: HostValue) -> Option<HostValue> {
    match (kind, value) {
        (FieldKind::Str, v @ HostValue::Str(_)) => Some(v),
        (FieldKind::Int, v @ HostValue::Int(_)) => Some(v),
        (FieldKind::Float, v @ HostValue::Float(_)) => Some(v),
        (FieldKind::Float, HostValue::Int(i)) => Some(HostValue::Float(i as f64)),
        (FieldKind::Bool, v @ HostValue::Bool(_)) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{IntoHost, Resource, Store};

    fn lua() -> Lua {
        let lua = Lua::new();
        prepare(&lua).unwrap();
        lua
    }

    #[test]
    fn test_integral_collapse() {
        let lua = lua();
        let three = to_script(&lua, &HostValue::Float(3.0)).unwrap();
        assert!(matches!(three, Value::Integer(3)));
        let half = to_script(&lua, &HostValue::Float(3.5)).unwrap();
        assert!(matches!(half, Value::Number(x) if x == 3.5));
    }

    #[test]
    fn test_number_back_to_host() {
        let lua = lua();
        assert_eq!(to_host(&lua, &Value::Number(4.0)).unwrap(), HostValue::Int(4));
        assert_eq!(to_host(&lua, &Value::Number(0.25)).unwrap(), HostValue::Float(0.25));
    }

    #[test]
    fn test_list_is_one_based() {
        let lua = lua();
        let list = HostValue::List(vec![HostValue::str("a"), HostValue::str("b")]);
        let Value::Table(table) = to_script(&lua, &list).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.raw_get::<String>(1).unwrap(), "a");
        assert_eq!(table.raw_get::<String>(2).unwrap(), "b");
        assert_eq!(to_host(&lua, &Value::Table(table)).unwrap(), list);
    }

    #[test]
    fn test_compound_key_is_stringified() {
        let lua = lua();
        let key = HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]);
        let map = HostValue::Map(vec![(key, HostValue::Bool(true))]);
        let Value::Table(table) = to_script(&lua, &map).unwrap() else {
            panic!("expected table");
        };
        assert!(table.raw_get::<bool>("[1 2]").unwrap());
    }

    #[test]
    fn test_struct_round_trip_is_identical() {
        let lua = lua();
        let obj = ObjectRef::new(Resource::new("Deployment", "web"));
        let value = HostValue::Struct(obj.clone());
        let proxy = to_script(&lua, &value).unwrap();
        let Value::Table(table) = &proxy else {
            panic!("expected table");
        };
        assert_eq!(table.raw_get::<String>("name").unwrap(), "web");

        let back = to_host(&lua, &proxy).unwrap();
        assert!(ObjectRef::ptr_eq(back.as_object().unwrap(), &obj));
    }

    #[test]
    fn test_markers_are_not_fields() {
        let lua = lua();
        let proxy = to_script(&lua, &Resource::new("Pod", "db").into_host()).unwrap();
        lua.globals().set("proxy", proxy).unwrap();
        let keys: Vec<String> = lua
            .load("local keys = {} for k in pairs(proxy) do keys[#keys + 1] = k end table.sort(keys) return keys")
            .eval()
            .unwrap();
        assert_eq!(
            keys,
            vec!["kind", "labels", "name", "namespace", "ready", "replicas", "weight"]
        );
    }

    #[test]
    fn test_nil_pointer() {
        let lua = lua();
        let proxy = to_script(&lua, &HostValue::Ptr(None)).unwrap();
        let Value::Table(table) = &proxy else {
            panic!("expected table");
        };
        assert!(type_of(&lua, table).unwrap().is_none());
        assert_eq!(to_host(&lua, &proxy).unwrap(), HostValue::Ptr(None));
    }

    #[test]
    fn test_opaque_is_rejected() {
        let lua = lua();
        let err = to_script(&lua, &HostValue::Opaque("chan")).unwrap_err();
        assert!(matches!(err, MarshalError::Unsupported("chan")));
    }

    #[test]
    fn test_plain_map_to_host() {
        let lua = lua();
        let value: Value = lua.load("return { a = 1, b = 'x' }").eval().unwrap();
        let host = to_host(&lua, &value).unwrap();
        assert_eq!(host.get("a"), Some(&HostValue::Int(1)));
        assert_eq!(host.get("b"), Some(&HostValue::str("x")));
    }

    #[test]
    fn test_assign_fields_lenient_and_strict() {
        let lua = lua();
        let obj = ObjectRef::new(Resource::default());
        let table: Table = lua
            .load("return { name = 'api', replicas = 'three', weight = 2, ready = true, bogus = 1 }")
            .eval()
            .unwrap();

        assign_fields(&lua, &obj, &table, AssignPolicy::Lenient).unwrap();
        assert_eq!(obj.field("name"), Ok(Some(HostValue::str("api"))));
        assert_eq!(obj.field("replicas"), Ok(Some(HostValue::Int(0))));
        assert_eq!(obj.field("weight"), Ok(Some(HostValue::Float(2.0))));
        assert_eq!(obj.field("ready"), Ok(Some(HostValue::Bool(true))));

        let err = assign_fields(&lua, &obj, &table, AssignPolicy::Strict).unwrap_err();
        assert!(matches!(err, MarshalError::FieldMismatch { ref field, .. } if field == "replicas"));
    }

    #[test]
    fn test_assign_unsupported_kind_raises() {
        let lua = lua();
        let obj = ObjectRef::new(Resource::default());
        let table: Table = lua.load("return { labels = { a = 'b' } }").eval().unwrap();
        let err = assign_fields(&lua, &obj, &table, AssignPolicy::Lenient).unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedField { kind: "map", .. }));
    }

    #[test]
    fn test_assign_skips_private_fields() {
        let lua = lua();
        let obj = ObjectRef::new(Store::new("s"));
        let table: Table = lua.load("return { entries = 5, name = 'renamed' }").eval().unwrap();
        assign_fields(&lua, &obj, &table, AssignPolicy::Strict).unwrap();
        assert_eq!(obj.field("name"), Ok(Some(HostValue::str("renamed"))));
    }

    #[test]
    fn test_cyclic_table_is_rejected() {
        let lua = lua();
        let value: Value = lua.load("local t = { a = 1 } t.self = t return t").eval().unwrap();
        assert!(matches!(to_host(&lua, &value), Err(MarshalError::Cyclic)));

        let value: Value = lua.load("local t = {} t[1] = { t } return t").eval().unwrap();
        assert!(matches!(to_host(&lua, &value), Err(MarshalError::Cyclic)));
    }

    #[test]
    fn test_shared_subtable_is_not_a_cycle() {
        let lua = lua();
        let value: Value = lua
            .load("local shared = { n = 1 } return { a = shared, b = shared }")
            .eval()
            .unwrap();
        let host = to_host(&lua, &value).unwrap();
        assert_eq!(host.get("a"), host.get("b"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let lua = lua();
        let value: Value = lua
            .load("local root = {} local cur = root for i = 1, 500 do cur.next = {} cur = cur.next end return root")
            .eval()
            .unwrap();
        assert!(matches!(to_host(&lua, &value), Err(MarshalError::TooDeep(MAX_DEPTH))));
    }

    #[test]
    fn test_collected_proxies_release_slots() {
        let lua = lua();
        let obj = ObjectRef::new(Store::new("s"));
        for _ in 0..1000 {
            to_script(&lua, &HostValue::ptr(obj.clone())).unwrap();
        }
        let kept = to_script(&lua, &HostValue::ptr(obj.clone())).unwrap();

        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        assert_eq!(lua.app_data_ref::<HandleArena>().unwrap().len(), 1);

        // 仍存活的代理照常还原
        let back = to_host(&lua, &kept).unwrap();
        assert!(ObjectRef::ptr_eq(back.as_object().unwrap(), &obj));

        // 释放的槽位会被复用
        for _ in 0..10 {
            to_script(&lua, &HostValue::ptr(obj.clone())).unwrap();
        }
        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        assert_eq!(lua.app_data_ref::<HandleArena>().unwrap().len(), 1);
    }
}
