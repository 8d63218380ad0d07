//! 请求级属性袋。
//!
//! # 设计背景（Why）
//! - 请求阶段与响应阶段可能运行在不同线程（异步处理、线程池移交），线程局部变量无法可靠地把
//!   起始状态带到响应阶段；属性袋随请求对象一起流转，天然满足“跟着请求走”的要求。
//! - 宿主框架通常已有类似容器（`http::Extensions`、Servlet request attribute），适配层只需桥接。
//!
//! # 契约说明（What）
//! - 键使用 [`TypeId`]，调用方以新类型封装避免碰撞；
//! - 值必须 `'static + Send + Sync`；
//! - [`RequestProperties::remove`] 把所有权交还调用方，实现“恰好取一次”。
//!
//! # 风险提示（Trade-offs）
//! - 默认实现 [`PropertyBag`] 使用一把互斥锁；单个请求上的并发访问极少，锁竞争可忽略。

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use parking_lot::Mutex;

/// 以 [`TypeId`] 为键的对象安全属性袋。
pub trait RequestProperties: Send + Sync {
    /// 插入值，若已存在同类型值则覆盖。
    fn insert(&self, key: TypeId, value: Box<dyn Any + Send + Sync>);

    /// 移除并返回值。
    fn remove(&self, key: &TypeId) -> Option<Box<dyn Any + Send + Sync>>;

    /// 在持有内部锁期间以只读方式访问值。
    fn visit(&self, key: &TypeId, visitor: &mut dyn FnMut(&(dyn Any + Send + Sync)));

    fn contains_key(&self, key: &TypeId) -> bool;

    fn clear(&self);
}

/// 类型化便捷方法，对所有 [`RequestProperties`] 自动可用。
pub trait RequestPropertiesExt: RequestProperties {
    fn insert_typed<T: Any + Send + Sync>(&self, value: T) {
        self.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn take_typed<T: Any + Send + Sync>(&self) -> Option<T> {
        self.remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    fn get_cloned<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        let mut found = None;
        self.visit(&TypeId::of::<T>(), &mut |value| {
            found = value.downcast_ref::<T>().cloned();
        });
        found
    }

    fn contains_typed<T: Any + Send + Sync>(&self) -> bool {
        self.contains_key(&TypeId::of::<T>())
    }
}

impl<P: RequestProperties + ?Sized> RequestPropertiesExt for P {}

/// 默认属性袋实现。
#[derive(Default)]
pub struct PropertyBag {
    entries: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl RequestProperties for PropertyBag {
    fn insert(&self, key: TypeId, value: Box<dyn Any + Send + Sync>) {
        self.entries.lock().insert(key, value);
    }

    fn remove(&self, key: &TypeId) -> Option<Box<dyn Any + Send + Sync>> {
        self.entries.lock().remove(key)
    }

    fn visit(&self, key: &TypeId, visitor: &mut dyn FnMut(&(dyn Any + Send + Sync))) {
        let entries = self.entries.lock();
        if let Some(value) = entries.get(key) {
            visitor(value.as_ref());
        }
    }

    fn contains_key(&self, key: &TypeId) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyBag")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn take_returns_value_exactly_once() {
        let bag = PropertyBag::new();
        bag.insert_typed(Marker(7));

        assert_eq!(bag.get_cloned::<Marker>(), Some(Marker(7)));
        assert_eq!(bag.take_typed::<Marker>(), Some(Marker(7)));
        assert_eq!(bag.take_typed::<Marker>(), None, "第二次取值必须为空");
    }

    #[test]
    fn bag_crosses_threads() {
        let bag = Arc::new(PropertyBag::new());
        bag.insert_typed(Marker(1));

        let remote = Arc::clone(&bag);
        let taken = std::thread::spawn(move || remote.take_typed::<Marker>())
            .join()
            .expect("工作线程不应 panic");

        assert_eq!(taken, Some(Marker(1)));
        assert!(bag.is_empty());
    }
}
