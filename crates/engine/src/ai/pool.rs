use std::collections::VecDeque;
use std::fmt;

/// Reusable instances. Acquiring from an empty pool builds a fresh one.
pub struct ObjectPool<T> {
    free: VecDeque<T>,
    factory: Box<dyn FnMut() -> T>,
    created: usize,
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.free.len())
            .field("created", &self.created)
            .finish()
    }
}

impl<T> ObjectPool<T> {
    pub fn new(prewarm: usize, factory: impl FnMut() -> T + 'static) -> Self {
        let mut pool = Self {
            free: VecDeque::with_capacity(prewarm),
            factory: Box::new(factory),
            created: 0,
        };
        for _ in 0..prewarm {
            let instance = pool.build();
            pool.free.push_back(instance);
        }
        pool
    }

    pub fn acquire(&mut self) -> T {
        match self.free.pop_front() {
            Some(instance) => instance,
            None => self.build(),
        }
    }

    pub fn acquire_many(&mut self, count: usize) -> Vec<T> {
        (0..count).map(|_| self.acquire()).collect()
    }

    pub fn release(&mut self, instance: T) {
        self.free.push_back(instance);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Instances built over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created
    }

    fn build(&mut self) -> T {
        self.created += 1;
        (self.factory)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prewarmed_instances_are_reused() {
        let mut next_id = 0u32;
        let mut pool = ObjectPool::new(2, move || {
            next_id += 1;
            next_id
        });
        assert_eq!(pool.available(), 2);

        let first = pool.acquire();
        assert_eq!(first, 1);
        pool.release(first);
        assert_eq!(pool.acquire(), 2);
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn empty_pool_grows_on_demand() {
        let mut pool = ObjectPool::new(1, || String::from("fx"));
        let batch = pool.acquire_many(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(pool.created(), 3);
        assert_eq!(pool.available(), 0);
        for instance in batch {
            pool.release(instance);
        }
        assert_eq!(pool.available(), 3);
    }
}
