//! 自旋锁，封装了一下 `spin::mutex::spin`
//!
//! 裁剪了一些不太需要的方法，添加 debug 模式下的死锁检测。
//! 缺页处理会在持锁期间做磁盘 I/O，因此检测的阈值放得比较宽

use core::{
    fmt,
    ops::{Deref, DerefMut},
};

/// debug 模式下自旋超过这么多次就认为死锁了
#[cfg(all(debug_assertions, not(test)))]
const DEADLOCK_SPINS: usize = 1 << 30;

pub struct SpinMutex<T: ?Sized> {
    base: spin::mutex::SpinMutex<T>,
}

pub struct SpinMutexGuard<'a, T: ?Sized> {
    inner: spin::mutex::SpinMutexGuard<'a, T>,
}

// Same unsafe impls as `std::sync::Mutex`
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Creates a new [`SpinMutex`] wrapping the supplied data.
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        Self {
            base: spin::mutex::SpinMutex::new(data),
        }
    }

    /// Consumes this [`SpinMutex`] and unwraps the underlying data.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.base.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Locks the [`SpinMutex`] and returns a guard that permits access to the
    /// inner data.
    ///
    /// The returned value may be dereferenced for data access
    /// and the lock will be dropped when the guard falls out of scope.
    #[inline]
    #[track_caller]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        #[cfg(all(debug_assertions, not(test)))]
        let mut spins = 0usize;
        #[cfg(test)]
        let begin = std::time::Instant::now();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            while self.is_locked() {
                core::hint::spin_loop();
                #[cfg(all(debug_assertions, not(test)))]
                {
                    spins += 1;
                    if spins >= DEADLOCK_SPINS {
                        panic!("deadlock detected");
                    }
                }
                #[cfg(test)]
                if begin.elapsed().as_millis() >= 2000 {
                    panic!("deadlock detected");
                }
            }
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function provides no synchronization guarantees and so its result
    /// should be considered 'out of date' the instant it is called. Do not
    /// use it for synchronization purposes. However, it may be useful as a
    /// heuristic.
    #[inline(always)]
    fn is_locked(&self) -> bool {
        self.base.is_locked()
    }

    /// Try to lock this [`SpinMutex`], returning a lock guard if successful.
    #[inline(always)]
    fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.base.try_lock().map(|inner| SpinMutexGuard { inner })
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f
                .debug_struct("SpinMutex")
                .field("data", &&*guard)
                .finish(),
            None => f.write_str("SpinMutex { <locked> }"),
        }
    }
}

impl<'a, T: ?Sized> Deref for SpinMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // We know statically that only we are referencing data
        &self.inner
    }
}

impl<'a, T: ?Sized> DerefMut for SpinMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
