use std::sync::atomic::{AtomicUsize, Ordering};

static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Process-wide identity for values compared by reference.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct UniqueId(usize);
impl UniqueId {
    pub fn new() -> Self {
        UniqueId(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct() {
        assert_ne!(UniqueId::new(), UniqueId::new());
    }
}
