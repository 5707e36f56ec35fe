//! Typed structural diff between two snapshots of the same record
//!
//! Every record implementing [`Diffable`] produces a parallel tree whose
//! leaves carry the previous and current value of one field. A leaf whose
//! previous value is `None` had no baseline and always counts as changed.
//!
//! Records get their diff type from [`diff_record!`](crate::diff_record),
//! which expands to a plain struct with one diff node per listed field.

use std::collections::BTreeMap;

/// A node in a diff tree
pub trait DiffNode {
    /// True if any leaf at or below this node differs
    fn is_changed(&self) -> bool;
}

/// A value that can be compared against an optional previous snapshot
pub trait Diffable {
    type Diff: DiffNode;

    /// Compare `new` against `old`; `old == None` marks every leaf as new
    fn diff(old: Option<&Self>, new: &Self) -> Self::Diff;
}

/// Previous and current value of one scalar field
///
/// `old` is `None` when there was no prior snapshot (or the prior
/// container had no such entry).
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<T> {
    pub old: Option<T>,
    pub new: T,
}

impl<T: PartialEq> Leaf<T> {
    /// `true` if there was no baseline or the value changed
    pub fn is_different(&self) -> bool {
        self.old.as_ref() != Some(&self.new)
    }
}

impl<T: PartialEq> DiffNode for Leaf<T> {
    fn is_changed(&self) -> bool {
        self.is_different()
    }
}

macro_rules! impl_leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Diffable for $ty {
                type Diff = Leaf<$ty>;

                fn diff(old: Option<&Self>, new: &Self) -> Leaf<$ty> {
                    Leaf {
                        old: old.cloned(),
                        new: new.clone(),
                    }
                }
            }
        )*
    };
}

impl_leaf!(bool, i32, i64, u32, u64, usize, f64, String);

/// Per-index diff of a sequence
///
/// Indices missing from the previous sequence diff against `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListDiff<D> {
    pub len: Leaf<usize>,
    pub items: Vec<D>,
}

impl<D: DiffNode> DiffNode for ListDiff<D> {
    fn is_changed(&self) -> bool {
        self.len.is_different() || self.items.iter().any(DiffNode::is_changed)
    }
}

impl<T: Diffable> Diffable for Vec<T> {
    type Diff = ListDiff<T::Diff>;

    fn diff(old: Option<&Self>, new: &Self) -> Self::Diff {
        ListDiff {
            len: Leaf {
                old: old.map(Vec::len),
                new: new.len(),
            },
            items: new
                .iter()
                .enumerate()
                .map(|(i, item)| T::diff(old.and_then(|o| o.get(i)), item))
                .collect(),
        }
    }
}

/// Per-key diff of a string-keyed map
///
/// Only keys present in the new map are represented.
#[derive(Debug, Clone, PartialEq)]
pub struct MapDiff<D>(pub BTreeMap<String, D>);

impl<D> MapDiff<D> {
    pub fn get(&self, key: &str) -> Option<&D> {
        self.0.get(key)
    }
}

impl<D: DiffNode> DiffNode for MapDiff<D> {
    fn is_changed(&self) -> bool {
        self.0.values().any(DiffNode::is_changed)
    }
}

impl<T: Diffable> Diffable for BTreeMap<String, T> {
    type Diff = MapDiff<T::Diff>;

    fn diff(old: Option<&Self>, new: &Self) -> Self::Diff {
        MapDiff(
            new.iter()
                .map(|(key, value)| (key.clone(), T::diff(old.and_then(|o| o.get(key)), value)))
                .collect(),
        )
    }
}

impl<D: DiffNode> DiffNode for Option<D> {
    fn is_changed(&self) -> bool {
        self.as_ref().map_or(false, DiffNode::is_changed)
    }
}

/// An absent composite produces no subtree; a present one diffs against
/// the previous value if that was present too.
impl<T: Diffable> Diffable for Option<T> {
    type Diff = Option<T::Diff>;

    fn diff(old: Option<&Self>, new: &Self) -> Self::Diff {
        new.as_ref()
            .map(|value| T::diff(old.and_then(Option::as_ref), value))
    }
}

/// Generate a typed diff struct and a [`Diffable`] impl for a record
///
/// ```ignore
/// diff_record! {
///     pub struct OptionsDiff for Options {
///         shuffling_context: bool,
///         repeating_track: bool,
///     }
/// }
/// ```
///
/// Every listed field must itself implement [`Diffable`]. Fields left out
/// of the list are not compared.
#[macro_export]
macro_rules! diff_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $diff:ident for $record:ty {
            $($field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $diff {
            $(pub $field: <$fty as $crate::diff::Diffable>::Diff,)*
        }

        impl $crate::diff::DiffNode for $diff {
            fn is_changed(&self) -> bool {
                false $(|| $crate::diff::DiffNode::is_changed(&self.$field))*
            }
        }

        impl $crate::diff::Diffable for $record {
            type Diff = $diff;

            fn diff(old: Option<&Self>, new: &Self) -> $diff {
                $diff {
                    $($field: <$fty as $crate::diff::Diffable>::diff(
                        old.map(|o| &o.$field),
                        &new.$field,
                    ),)*
                }
            }
        }
    };
}
