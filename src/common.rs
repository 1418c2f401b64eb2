use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub(crate) type HashSet<T> = hashbrown::HashSet<T, BuildHasherDefault<FxHasher>>;

/// Newtypes wrapping an integer id. Ordering and hashing follow the wrapped
/// representation.
macro_rules! define_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($repr:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name {
            rep: $repr,
        }

        impl $name {
            $vis const fn new(rep: $repr) -> $name {
                $name { rep }
            }

            $vis fn from_usize(index: usize) -> $name {
                assert!(
                    index <= <$repr>::MAX as usize,
                    concat!("index overflows ", stringify!($name))
                );
                $name::new(index as $repr)
            }

            /// The wrapped representation as a table index.
            $vis fn index(self) -> usize {
                self.rep as usize
            }

            $vis fn rep(self) -> $repr {
                self.rep
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), self.rep)
            }
        }
    };
}

define_id! {
    /// An interned value. The engine treats terms as opaque except for
    /// equality and ordering; the dictionary mapping them to strings lives
    /// outside this crate.
    pub struct Term(u64);
}

define_id! {
    /// A variable occurring in a rule literal.
    pub struct Variable(u32);
}

define_id! {
    /// A predicate of the extensional or intensional database.
    pub struct PredicateId(u32);
}

/// Upper bound on predicate arity, and on the number of source-to-output
/// mappings a sink accepts. Everything arity-shaped in this crate fits in
/// inline storage of this size.
pub const MAX_ARITY: usize = 8;
