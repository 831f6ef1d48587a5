//! An ordered map and set implemented with an AVL tree.
//!
//! Each tree node stores a balance factor, the height of its right subtree
//! minus the height of its left subtree. Insertion and removal restore the
//! AVL condition (every balance factor in {-1, 0, +1}) with at most two
//! rotations per update, walking parent links from the update position toward
//! the root and stopping as soon as the subtree height is known to be
//! unchanged. Heights are never stored or recounted.
//!
//! ```
//! use avlmap::{AvlTreeMap, AvlTreeSet};
//!
//! let mut map = AvlTreeMap::new();
//! map.insert(1, "one");
//! map.insert(2, "two");
//! assert_eq!(map.get(&1), Some(&"one"));
//! map.remove(&1);
//! assert!(map.get(&1).is_none());
//!
//! let mut set = AvlTreeSet::new();
//! set.insert(42);
//! assert!(set.contains(&42));
//! ```

pub mod map;
pub mod set;

pub use map::AvlTreeMap;
pub use set::AvlTreeSet;


#[cfg(test)]
mod proptests;
