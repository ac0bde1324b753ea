//! 核心宏定义
//!
//! 库内共用的宏

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// struct MyStruct {
///     field1: u32,
///     field2: String,
/// }
///
/// hostlua::impl_default!(MyStruct {
///     field1: 0,
///     field2: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

/// 让 `Clone + Default` 结构体对脚本可见
///
/// 生成静态 [`TypeInfo`](crate::host::TypeInfo) 描述符以及 `Reflect`、`HostType`、
/// `IntoHost` 和 `FromHost` 实现。公有字段带上各自的 [`FieldKind`](crate::host::FieldKind)；
/// `private` 字段只出现在描述符里，脚本永远无法读写。方法接收 `&mut Self` 和转换后的参数，
/// 并声明生成的包装所检查的参数个数。
///
/// ```rust
/// use hostlua::host::{arg, HostValue, IntoHost};
/// use hostlua::core::error::HostResult;
///
/// #[derive(Clone, Default)]
/// struct Counter {
///     label: String,
///     count: i64,
///     secret: u64,
/// }
///
/// impl Counter {
///     fn add(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
///         self.count += arg::<i64>(&args, 0)?;
///         Ok(vec![self.count.into_host()])
///     }
/// }
///
/// hostlua::host_type! {
///     Counter in "demo" {
///         fields { label: Str, count: Int }
///         private { secret }
///         methods { Add(1) => Counter::add }
///     }
/// }
/// ```
#[macro_export]
macro_rules! host_type {
    (
        $ty:ident in $pkg:literal {
            fields { $( $field:ident : $kind:ident ),* $(,)? }
            $( private { $( $hidden:ident ),* $(,)? } )?
            $( methods { $( $method:ident ( $arity:literal ) => $call:path ),* $(,)? } )?
        }
    ) => {
        impl $crate::host::HostType for $ty {
            fn descriptor() -> &'static $crate::host::TypeInfo {
                static INFO: $crate::host::TypeInfo = $crate::host::TypeInfo {
                    name: stringify!($ty),
                    package: $pkg,
                    fields: &[
                        $( $crate::host::FieldInfo {
                            name: stringify!($field),
                            kind: $crate::host::FieldKind::$kind,
                            public: true,
                        }, )*
                        $( $( $crate::host::FieldInfo {
                            name: stringify!($hidden),
                            kind: $crate::host::FieldKind::Opaque,
                            public: false,
                        }, )* )?
                    ],
                    methods: &[
                        $( $( $crate::host::MethodInfo {
                            name: stringify!($method),
                            arity: $arity,
                            call: |this, args| this.with_mut(|recv: &mut $ty| $call(recv, args))?,
                        }, )* )?
                    ],
                    construct: || {
                        $crate::host::ObjectRef::new(<$ty as ::std::default::Default>::default())
                    },
                };
                &INFO
            }
        }

        impl $crate::host::Reflect for $ty {
            fn type_info(&self) -> &'static $crate::host::TypeInfo {
                <$ty as $crate::host::HostType>::descriptor()
            }

            #[allow(unused_variables)]
            fn get_field(&self, name: &str) -> ::std::option::Option<$crate::host::HostValue> {
                match name {
                    $( stringify!($field) => ::std::option::Option::Some(
                        $crate::host::IntoHost::into_host(::std::clone::Clone::clone(&self.$field)),
                    ), )*
                    _ => ::std::option::Option::None,
                }
            }

            #[allow(unused_variables)]
            fn set_field(
                &mut self,
                name: &str,
                value: $crate::host::HostValue,
            ) -> $crate::core::error::HostResult<()> {
                match name {
                    $( stringify!($field) => {
                        self.$field = $crate::host::FromHost::from_host(value)?;
                        ::std::result::Result::Ok(())
                    } )*
                    _ => ::std::result::Result::Err($crate::core::error::HostError::NoField {
                        type_name: stringify!($ty),
                        field: name.to_string(),
                    }),
                }
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }

        impl $crate::host::IntoHost for $ty {
            fn into_host(self) -> $crate::host::HostValue {
                $crate::host::HostValue::Struct($crate::host::ObjectRef::new(self))
            }
        }

        impl $crate::host::FromHost for $ty {
            fn from_host(
                value: $crate::host::HostValue,
            ) -> $crate::core::error::HostResult<Self> {
                match value.as_object() {
                    ::std::option::Option::Some(obj) => obj
                        .with(|v: &$ty| ::std::clone::Clone::clone(v))
                        .ok_or($crate::core::error::HostError::Receiver(stringify!($ty))),
                    ::std::option::Option::None => {
                        ::std::result::Result::Err($crate::core::error::HostError::Conversion {
                            expected: stringify!($ty),
                            found: value.kind_name(),
                        })
                    }
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::error::{HostError, HostResult};
    use crate::host::{arg, FieldKind, FromHost, HostType, HostValue, IntoHost, ObjectRef, Reflect};

    #[derive(Clone, Default)]
    struct Gauge {
        label: String,
        level: f64,
        token: u64,
    }

    impl Gauge {
        fn raise(&mut self, args: Vec<HostValue>) -> HostResult<Vec<HostValue>> {
            self.level += arg::<f64>(&args, 0)?;
            Ok(vec![self.level.into_host()])
        }
    }

    host_type! {
        Gauge in "tests::macros" {
            fields { label: Str, level: Float }
            private { token }
            methods { Raise(1) => Gauge::raise }
        }
    }

    #[test]
    fn test_descriptor() {
        let info = Gauge::descriptor();
        assert_eq!(info.full_name(), "tests::macros::Gauge");
        assert_eq!(info.fields.len(), 3);
        assert_eq!(info.field("level").map(|f| f.kind), Some(FieldKind::Float));
        assert!(!info.field("token").is_some_and(|f| f.public));
        assert_eq!(info.method("Raise").map(|m| m.arity), Some(1));
    }

    #[test]
    fn test_private_field_is_unreadable() {
        let gauge = Gauge {
            token: 7,
            ..Gauge::default()
        };
        assert!(gauge.get_field("token").is_none());
        let obj = ObjectRef::new(gauge);
        assert_eq!(obj.field("token"), Ok(None));
    }

    #[test]
    fn test_method_dispatch() {
        let obj = ObjectRef::new(Gauge::default());
        let method = Gauge::descriptor().method("Raise").unwrap();
        let out = (method.call)(&obj, vec![HostValue::Int(2)]).unwrap();
        assert_eq!(out, vec![HostValue::Float(2.0)]);
        assert_eq!(obj.field("level"), Ok(Some(HostValue::Float(2.0))));
    }

    #[test]
    fn test_set_unknown_field() {
        let mut gauge = Gauge::default();
        let err = gauge.set_field("missing", HostValue::Nil).unwrap_err();
        assert!(matches!(err, HostError::NoField { .. }));
    }

    #[test]
    fn test_from_host_clones_value() {
        let value = Gauge {
            label: "g".into(),
            ..Gauge::default()
        }
        .into_host();
        let copy = Gauge::from_host(value).unwrap();
        assert_eq!(copy.label, "g");
    }
}
