//! Containers shared by the extraction passes

use unordered::UnorderedMap;

/// Interns graph nodes: each distinct value gets a stable index, handed out in order of first
/// insertion, which is also its position in [`Self::into_vec`]. Data-flow graphs use these indices
/// as DOT node ids, so the numbering must not depend on hashing.
#[derive(Default)]
pub struct InsertionOrderedSet<T: Eq + std::hash::Hash + Ord + Clone> {
    data: Vec<T>,
    index_of: UnorderedMap<T, usize>,
}

impl<T: Eq + std::hash::Hash + Ord + Clone> InsertionOrderedSet<T> {
    pub fn new() -> Self {
        Self {
            data: vec![],
            index_of: UnorderedMap::new(),
        }
    }

    /// The interned values, indexed as returned by [`Self::insert`]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// The index of `v`, interning it first if it is new
    pub fn insert(&mut self, v: T) -> usize {
        if let Some(idx) = self.index_of.get(&v) {
            return *idx;
        }
        let idx = self.data.len();
        self.data.push(v.clone());
        self.index_of.insert(v, idx);
        idx
    }
}

/// Lookup-only maps and sets (name tables, visited sets of the graph walks). Nothing emitted is
/// ever read out of them in iteration order, so they may be hash-based; the
/// `deterministic_containers` feature swaps in B-trees for reproducible debugging.
pub mod unordered {
    #[cfg(not(feature = "deterministic_containers"))]
    type BaseMap<K, V> = std::collections::HashMap<K, V>;
    #[cfg(feature = "deterministic_containers")]
    type BaseMap<K, V> = std::collections::BTreeMap<K, V>;
    #[cfg(not(feature = "deterministic_containers"))]
    type BaseSet<T> = std::collections::HashSet<T>;
    #[cfg(feature = "deterministic_containers")]
    type BaseSet<T> = std::collections::BTreeSet<T>;

    /// Keyed lookup without iteration. Its debug view is always sorted.
    #[derive(Clone, PartialEq, Eq)]
    pub struct UnorderedMap<K: std::hash::Hash + Ord + Eq, V> {
        map: BaseMap<K, V>,
    }

    impl<K: std::hash::Hash + Ord + Eq, V> UnorderedMap<K, V> {
        pub fn new() -> Self {
            Self {
                map: BaseMap::new(),
            }
        }

        pub fn get<Q: ?Sized>(&self, k: &Q) -> Option<&V>
        where
            K: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.map.get(k)
        }

        /// Returns the value previously at `k`, if any
        pub fn insert(&mut self, k: K, v: V) -> Option<V> {
            self.map.insert(k, v)
        }
    }

    impl<K: std::hash::Hash + Ord + Eq, V> Default for UnorderedMap<K, V> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<K: std::hash::Hash + Ord + Eq, V> FromIterator<(K, V)> for UnorderedMap<K, V> {
        fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
            Self {
                map: iter.into_iter().collect(),
            }
        }
    }

    impl<K: std::hash::Hash + Ord + Eq + std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug
        for UnorderedMap<K, V>
    {
        #[cfg(not(feature = "deterministic_containers"))]
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            self.map
                .iter()
                .collect::<std::collections::BTreeMap<_, _>>()
                .fmt(f)
        }
        #[cfg(feature = "deterministic_containers")]
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            self.map.fmt(f)
        }
    }

    /// Membership tests without iteration. Its debug view is always sorted.
    #[derive(Clone, PartialEq, Eq)]
    pub struct UnorderedSet<T: std::hash::Hash + Ord + Eq> {
        set: BaseSet<T>,
    }

    impl<T: std::hash::Hash + Ord + Eq> UnorderedSet<T> {
        pub fn new() -> Self {
            Self {
                set: BaseSet::new(),
            }
        }

        /// Whether `value` was newly added
        pub fn insert(&mut self, value: T) -> bool {
            self.set.insert(value)
        }

        /// Whether `value` was present
        pub fn remove<Q: ?Sized>(&mut self, value: &Q) -> bool
        where
            T: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.set.remove(value)
        }

        pub fn contains<Q: ?Sized>(&self, value: &Q) -> bool
        where
            T: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.set.contains(value)
        }
    }

    impl<T: std::hash::Hash + Ord + Eq> Default for UnorderedSet<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T: std::hash::Hash + Ord + Eq + std::fmt::Debug> std::fmt::Debug for UnorderedSet<T> {
        #[cfg(not(feature = "deterministic_containers"))]
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            self.set
                .iter()
                .collect::<std::collections::BTreeSet<_>>()
                .fmt(f)
        }
        #[cfg(feature = "deterministic_containers")]
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            self.set.fmt(f)
        }
    }

    impl<T: std::hash::Hash + Ord + Eq> FromIterator<T> for UnorderedSet<T> {
        fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
            Self {
                set: iter.into_iter().collect(),
            }
        }
    }
}
