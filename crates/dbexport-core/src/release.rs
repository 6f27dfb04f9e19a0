use std::fmt::Display;
use std::ops::{Deref, DerefMut};

use crate::driver::{DatabaseSession, DriverError, PreparedQuery, RowCursor};

/// 可释放的资源
pub trait Release {
    type Error: Display;

    fn release(&mut self) -> Result<(), Self::Error>;
}

impl Release for Box<dyn DatabaseSession + '_> {
    type Error = DriverError;

    fn release(&mut self) -> Result<(), DriverError> {
        self.close()
    }
}

impl Release for Box<dyn PreparedQuery + '_> {
    type Error = DriverError;

    fn release(&mut self) -> Result<(), DriverError> {
        self.close()
    }
}

impl Release for Box<dyn RowCursor + '_> {
    type Error = DriverError;

    fn release(&mut self) -> Result<(), DriverError> {
        self.close()
    }
}

/// 作用域内持有资源，离开作用域时释放
///
/// 释放失败只记录日志，不会向外传播，也不影响其他资源的释放。多个 `Scoped`
/// 按声明的逆序释放。
pub struct Scoped<T: Release> {
    name: &'static str,
    inner: T,
}

impl<T: Release> Scoped<T> {
    pub fn new(
        name: &'static str,
        inner: T,
    ) -> Self {
        tracing::debug!("获取资源: {}", name);
        Self { name, inner }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Release> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Release> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Release> Drop for Scoped<T> {
    fn drop(&mut self) {
        match self.inner.release() {
            Ok(()) => tracing::debug!("已释放资源: {}", self.name),
            Err(e) => tracing::warn!(resource = self.name, "释放资源失败: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Probe {
        name: &'static str,
        fail: bool,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Release for Probe {
        type Error = String;

        fn release(&mut self) -> Result<(), String> {
            self.log.borrow_mut().push(self.name);
            if self.fail {
                Err(format!("{} 关闭失败", self.name))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn releases_in_reverse_order_even_when_one_fails() {
        let log = Rc::new(RefCell::new(vec![]));
        {
            let probe = |name, fail| Probe {
                name,
                fail,
                log: log.clone(),
            };
            let _connection = Scoped::new("connection", probe("connection", false));
            let _statement = Scoped::new("statement", probe("statement", true));
            let _cursor = Scoped::new("cursor", probe("cursor", false));
            let writer = Scoped::new("writer", probe("writer", true));
            assert_eq!(writer.name(), "writer");
        }
        assert_eq!(*log.borrow(), vec!["writer", "cursor", "statement", "connection"]);
    }

    #[test]
    fn releases_on_early_return() {
        fn fails_midway(log: Rc<RefCell<Vec<&'static str>>>) -> Result<(), String> {
            let _first = Scoped::new(
                "first",
                Probe {
                    name: "first",
                    fail: false,
                    log: log.clone(),
                },
            );
            Err("中途失败".to_string())?;
            let _second = Scoped::new(
                "second",
                Probe {
                    name: "second",
                    fail: false,
                    log,
                },
            );
            Ok(())
        }

        let log = Rc::new(RefCell::new(vec![]));
        assert!(fails_midway(log.clone()).is_err());
        assert_eq!(*log.borrow(), vec!["first"]);
    }
}
