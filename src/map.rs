//! An ordered map implemented with an AVL tree.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FromIterator;
use std::marker::PhantomData;
use std::mem;
use std::ops;
use std::ptr::NonNull;

/// An ordered map implemented with an AVL tree.
///
/// Balance is tracked per node as a balance factor, the height of the right
/// subtree minus the height of the left subtree. Rebalancing walks parent
/// links from the update position toward the root and stops as soon as the
/// local subtree height is known to be unchanged.
///
/// ```
/// use avlmap::AvlTreeMap;
/// let mut map = AvlTreeMap::new();
/// map.insert(0, "zero");
/// map.insert(1, "one");
/// map.insert(2, "two");
/// assert_eq!(map.get(&1), Some(&"one"));
/// map.remove(&1);
/// assert!(map.get(&1).is_none());
/// ```
pub struct AvlTreeMap<K, V> {
    root: Link<K, V>,
    num_nodes: usize,
}

struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    parent: Link<K, V>,
    balance: i8,
}

type NodePtr<K, V> = NonNull<Node<K, V>>;
type Link<K, V> = Option<NodePtr<K, V>>;
type LinkPtr<K, V> = NonNull<Link<K, V>>;

#[allow(clippy::enum_variant_names)]
enum Direction {
    FromParent,
    FromLeft,
    FromRight,
}

/// An iterator over the entries of a map in key order.
pub struct Iter<'a, K, V> {
    front: Link<K, V>,
    back: Link<K, V>,
    marker: PhantomData<&'a (K, V)>,
}

/// A mutable iterator over the entries of a map in key order.
pub struct IterMut<'a, K, V> {
    front: Link<K, V>,
    back: Link<K, V>,
    marker: PhantomData<&'a mut (K, V)>,
}

/// An owning iterator over the entries of a map in key order.
pub struct IntoIter<K, V> {
    map: AvlTreeMap<K, V>,
}

impl<K, V> AvlTreeMap<K, V> {
    /// Creates an empty map.
    /// No memory is allocated until the first item is inserted.
    pub fn new() -> Self {
        Self {
            root: None,
            num_nodes: 0,
        }
    }

    /// Returns true if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the number of elements in the map.
    pub fn len(&self) -> usize {
        self.num_nodes
    }

    /// Clears the map, deallocating all memory.
    pub fn clear(&mut self) {
        self.postorder(|node_ptr| unsafe {
            Node::destroy(node_ptr);
        });
        self.root = None;
        self.num_nodes = 0;
    }

    /// Gets an iterator over the entries of the map, sorted by key.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            front: leftmost(self.root),
            back: rightmost(self.root),
            marker: PhantomData,
        }
    }

    /// Gets a mutable iterator over the entries of the map, sorted by key.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            front: leftmost(self.root),
            back: rightmost(self.root),
            marker: PhantomData,
        }
    }

    /// Relinks the single surviving child of a node into the node's former
    /// position under its parent. The node itself is left dangling.
    fn replace_in_parent(&mut self, node_ptr: NodePtr<K, V>, child: Link<K, V>) {
        unsafe {
            if let Some(mut child_ptr) = child {
                child_ptr.as_mut().parent = node_ptr.as_ref().parent;
            }
            match node_ptr.as_ref().parent {
                None => self.root = child,
                Some(mut parent_ptr) => {
                    if parent_ptr.as_ref().left == Some(node_ptr) {
                        parent_ptr.as_mut().left = child;
                    } else {
                        parent_ptr.as_mut().right = child;
                    }
                }
            }
        }
    }

    fn postorder<F: FnMut(NodePtr<K, V>)>(&self, f: F) {
        self.traverse(|_| {}, |_| {}, f);
    }

    fn traverse<Pre, In, Post>(&self, mut preorder: Pre, mut inorder: In, mut postorder: Post)
    where
        Pre: FnMut(NodePtr<K, V>),
        In: FnMut(NodePtr<K, V>),
        Post: FnMut(NodePtr<K, V>),
    {
        if let Some(mut node_ptr) = self.root {
            let mut dir = Direction::FromParent;
            loop {
                match dir {
                    Direction::FromParent => {
                        preorder(node_ptr);
                        if let Some(left_ptr) = unsafe { node_ptr.as_ref().left } {
                            node_ptr = left_ptr;
                        } else {
                            dir = Direction::FromLeft;
                        }
                    }
                    Direction::FromLeft => {
                        inorder(node_ptr);
                        if let Some(right_ptr) = unsafe { node_ptr.as_ref().right } {
                            node_ptr = right_ptr;
                            dir = Direction::FromParent;
                        } else {
                            dir = Direction::FromRight;
                        }
                    }
                    Direction::FromRight => {
                        // Post order traversal is used for node deletion,
                        // so make sure not to use node pointer after postorder call.
                        if let Some(parent_ptr) = unsafe { node_ptr.as_ref().parent } {
                            if Some(node_ptr) == unsafe { parent_ptr.as_ref().left } {
                                dir = Direction::FromLeft;
                            } else {
                                dir = Direction::FromRight;
                            }
                            postorder(node_ptr);
                            node_ptr = parent_ptr;
                        } else {
                            postorder(node_ptr);
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<K: Ord, V> AvlTreeMap<K, V> {
    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but the
    /// ordering on the borrowed form *must* match the ordering on the key type.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if let Some(node_ptr) = self.find(key) {
            return Some(&unsafe { &*node_ptr.as_ptr() }.value);
        }
        None
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if let Some(node_ptr) = self.find(key) {
            return Some(&mut unsafe { &mut *node_ptr.as_ptr() }.value);
        }
        None
    }

    /// Returns references to the key-value pair corresponding to the key.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if let Some(node_ptr) = self.find(key) {
            return Some((
                &unsafe { &*node_ptr.as_ptr() }.key,
                &unsafe { &*node_ptr.as_ptr() }.value,
            ));
        }
        None
    }

    /// Returns true if the map contains a value for the given key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the key is already present its value is overwritten in place and
    /// the previous value is returned. The tree structure is untouched in
    /// that case and no rebalancing happens.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.find_insert_pos(&key) {
            Err(node_ptr) => {
                let node = unsafe { &mut *node_ptr.as_ptr() };
                Some(mem::replace(&mut node.value, value))
            }
            Ok((parent, mut link_ptr)) => {
                let node_ptr = Node::create(parent, key, value);
                unsafe {
                    *link_ptr.as_mut() = Some(node_ptr);
                }
                self.num_nodes += 1;
                if let Some(mut parent_ptr) = parent {
                    unsafe {
                        if parent_ptr.as_ref().balance != 0 {
                            // The other side already had a child, so the new
                            // leaf fills the short side. Subtree height is
                            // unchanged and nothing propagates.
                            parent_ptr.as_mut().balance = 0;
                        } else {
                            parent_ptr.as_mut().balance =
                                if parent_ptr.as_ref().left == Some(node_ptr) {
                                    -1
                                } else {
                                    1
                                };
                            self.insertion_fix(parent_ptr, node_ptr);
                        }
                    }
                }
                None
            }
        }
    }

    /// Removes a key from the map.
    /// Returns the value at the key if the key was previously in the map.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes a key from the map, returning the stored key-value pair.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let node_ptr = self.find(key)?;
        debug_assert!(self.num_nodes >= 1);
        Some(self.remove_node(node_ptr))
    }

    /// Asserts that the internal tree structure is consistent:
    /// parent links, search order, node count and every balance factor
    /// checked against independently measured subtree heights.
    #[cfg(any(test, feature = "consistency_check"))]
    pub fn check_consistency(&self) {
        unsafe {
            if let Some(root_ptr) = self.root {
                assert!(root_ptr.as_ref().parent.is_none());
            }
            let (_, num_nodes) = Self::check_subtree(self.root);
            assert_eq!(num_nodes, self.num_nodes);
        }
    }

    /// Number of edges on the longest root-to-leaf path, measured by brute
    /// force. Zero for an empty tree and for a single node.
    #[cfg(any(test, feature = "consistency_check"))]
    pub fn height(&self) -> usize {
        unsafe { std::cmp::max(subtree_height(self.root), 0) as usize }
    }

    #[cfg(any(test, feature = "consistency_check"))]
    unsafe fn check_subtree(link: Link<K, V>) -> (isize, usize) {
        match link {
            None => (-1, 0),
            Some(node_ptr) => {
                let node = &*node_ptr.as_ptr();

                // Check links and search order for child nodes
                if let Some(left_ptr) = node.left {
                    assert!(left_ptr.as_ref().parent == Some(node_ptr));
                    assert!(left_ptr.as_ref().key < node.key);
                }
                if let Some(right_ptr) = node.right {
                    assert!(right_ptr.as_ref().parent == Some(node_ptr));
                    assert!(right_ptr.as_ref().key > node.key);
                }

                let (left_height, left_count) = Self::check_subtree(node.left);
                let (right_height, right_count) = Self::check_subtree(node.right);

                // Check AVL condition and balance factor bookkeeping
                assert!((-1..=1).contains(&node.balance));
                assert_eq!(node.balance as isize, right_height - left_height);

                (
                    1 + std::cmp::max(left_height, right_height),
                    1 + left_count + right_count,
                )
            }
        }
    }

    fn find<Q>(&self, key: &Q) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root;
        while let Some(node_ptr) = current {
            current = unsafe {
                match key.cmp(node_ptr.as_ref().key.borrow()) {
                    Ordering::Equal => break,
                    Ordering::Less => node_ptr.as_ref().left,
                    Ordering::Greater => node_ptr.as_ref().right,
                }
            }
        }
        current
    }

    /// Walks down to the position a key belongs at. Returns the link to
    /// splice a new leaf into together with its parent, or the existing node
    /// if the key is already present.
    fn find_insert_pos(&mut self, key: &K) -> Result<(Link<K, V>, LinkPtr<K, V>), NodePtr<K, V>> {
        let mut parent: Link<K, V> = None;
        let mut link_ptr: LinkPtr<K, V> = unsafe { LinkPtr::new_unchecked(&mut self.root) };
        unsafe {
            while let Some(mut node_ptr) = *link_ptr.as_ref() {
                match key.cmp(&node_ptr.as_ref().key) {
                    Ordering::Equal => return Err(node_ptr),
                    Ordering::Less => {
                        parent = Some(node_ptr);
                        link_ptr = LinkPtr::new_unchecked(&mut node_ptr.as_mut().left);
                    }
                    Ordering::Greater => {
                        parent = Some(node_ptr);
                        link_ptr = LinkPtr::new_unchecked(&mut node_ptr.as_mut().right);
                    }
                }
            }
        }
        Ok((parent, link_ptr))
    }

    fn remove_node(&mut self, node_ptr: NodePtr<K, V>) -> (K, V) {
        unsafe {
            if node_ptr.as_ref().left.is_some() && node_ptr.as_ref().right.is_some() {
                // Two children: trade places with the in-order predecessor,
                // which has no right child, so the node to unlink ends up
                // with at most one child.
                let pred_ptr = predecessor(node_ptr).unwrap();
                debug_assert!(pred_ptr.as_ref().right.is_none());
                self.swap_nodes(node_ptr, pred_ptr);
            }
            debug_assert!(node_ptr.as_ref().left.is_none() || node_ptr.as_ref().right.is_none());

            // The height signal is relative to the side the node occupies
            // under its parent after any swap: +1 if the left subtree is
            // about to shrink, -1 if the right one is.
            let parent = node_ptr.as_ref().parent;
            let diff: i8 = match parent {
                Some(parent_ptr) if parent_ptr.as_ref().left == Some(node_ptr) => 1,
                _ => -1,
            };

            let child = node_ptr.as_ref().left.or(node_ptr.as_ref().right);
            self.replace_in_parent(node_ptr, child);
            self.num_nodes -= 1;
            let entry = Node::destroy(node_ptr);
            self.removal_fix(parent, diff);
            entry
        }
    }

    /// Exchanges the tree positions of two nodes: parent and child links, the
    /// root pointer if involved, and the balance factors, which belong to the
    /// position rather than to the key-value pair.
    fn swap_nodes(&mut self, mut n1: NodePtr<K, V>, mut n2: NodePtr<K, V>) {
        if n1 == n2 {
            return;
        }
        unsafe {
            let n1_parent = n1.as_ref().parent;
            let n1_left = n1.as_ref().left;
            let n1_right = n1.as_ref().right;
            let n1_is_left = matches!(n1_parent, Some(p) if p.as_ref().left == Some(n1));
            let n2_parent = n2.as_ref().parent;
            let n2_left = n2.as_ref().left;
            let n2_right = n2.as_ref().right;
            let n2_is_left = matches!(n2_parent, Some(p) if p.as_ref().left == Some(n2));

            let balance = n1.as_ref().balance;
            n1.as_mut().balance = n2.as_ref().balance;
            n2.as_mut().balance = balance;

            n1.as_mut().parent = n2_parent;
            n2.as_mut().parent = n1_parent;
            n1.as_mut().left = n2_left;
            n2.as_mut().left = n1_left;
            n1.as_mut().right = n2_right;
            n2.as_mut().right = n1_right;

            // Nodes that were adjacent now reference themselves; relink them
            // to each other instead.
            if n1_right == Some(n2) {
                n2.as_mut().right = Some(n1);
                n1.as_mut().parent = Some(n2);
            } else if n2_right == Some(n1) {
                n1.as_mut().right = Some(n2);
                n2.as_mut().parent = Some(n1);
            } else if n1_left == Some(n2) {
                n2.as_mut().left = Some(n1);
                n1.as_mut().parent = Some(n2);
            } else if n2_left == Some(n1) {
                n1.as_mut().left = Some(n2);
                n2.as_mut().parent = Some(n1);
            }

            // Update back-references of the surrounding nodes.
            if let Some(mut parent_ptr) = n1_parent {
                if parent_ptr != n2 {
                    if n1_is_left {
                        parent_ptr.as_mut().left = Some(n2);
                    } else {
                        parent_ptr.as_mut().right = Some(n2);
                    }
                }
            }
            if let Some(mut left_ptr) = n1_left {
                if left_ptr != n2 {
                    left_ptr.as_mut().parent = Some(n2);
                }
            }
            if let Some(mut right_ptr) = n1_right {
                if right_ptr != n2 {
                    right_ptr.as_mut().parent = Some(n2);
                }
            }
            if let Some(mut parent_ptr) = n2_parent {
                if parent_ptr != n1 {
                    if n2_is_left {
                        parent_ptr.as_mut().left = Some(n1);
                    } else {
                        parent_ptr.as_mut().right = Some(n1);
                    }
                }
            }
            if let Some(mut left_ptr) = n2_left {
                if left_ptr != n1 {
                    left_ptr.as_mut().parent = Some(n1);
                }
            }
            if let Some(mut right_ptr) = n2_right {
                if right_ptr != n1 {
                    right_ptr.as_mut().parent = Some(n1);
                }
            }

            if self.root == Some(n1) {
                self.root = Some(n2);
            } else if self.root == Some(n2) {
                self.root = Some(n1);
            }
        }
    }

    /// Promotes the right child into the node's position. Balance factors
    /// are untouched; assigning them is the caller's responsibility.
    fn rotate_left(&mut self, mut node_ptr: NodePtr<K, V>) {
        unsafe {
            if let Some(mut right_ptr) = node_ptr.as_ref().right {
                node_ptr.as_mut().right = right_ptr.as_ref().left;
                if let Some(mut right_left_ptr) = right_ptr.as_mut().left {
                    right_left_ptr.as_mut().parent = Some(node_ptr);
                }

                right_ptr.as_mut().parent = node_ptr.as_ref().parent;
                match node_ptr.as_ref().parent {
                    None => self.root = Some(right_ptr),
                    Some(mut parent_ptr) => {
                        if parent_ptr.as_ref().left == Some(node_ptr) {
                            parent_ptr.as_mut().left = Some(right_ptr);
                        } else {
                            parent_ptr.as_mut().right = Some(right_ptr);
                        }
                    }
                }

                right_ptr.as_mut().left = Some(node_ptr);
                node_ptr.as_mut().parent = Some(right_ptr);
            }
        }
    }

    /// Promotes the left child into the node's position. Mirror image of
    /// [`rotate_left`](Self::rotate_left).
    fn rotate_right(&mut self, mut node_ptr: NodePtr<K, V>) {
        unsafe {
            if let Some(mut left_ptr) = node_ptr.as_ref().left {
                node_ptr.as_mut().left = left_ptr.as_ref().right;
                if let Some(mut right_ptr) = left_ptr.as_ref().right {
                    right_ptr.as_mut().parent = Some(node_ptr);
                }

                left_ptr.as_mut().parent = node_ptr.as_ref().parent;
                match node_ptr.as_ref().parent {
                    None => self.root = Some(left_ptr),
                    Some(mut parent_ptr) => {
                        if parent_ptr.as_ref().left == Some(node_ptr) {
                            parent_ptr.as_mut().left = Some(left_ptr);
                        } else {
                            parent_ptr.as_mut().right = Some(left_ptr);
                        }
                    }
                }

                left_ptr.as_mut().right = Some(node_ptr);
                node_ptr.as_mut().parent = Some(left_ptr);
            }
        }
    }

    /// Restores the AVL condition after a new leaf has been spliced in.
    ///
    /// On entry `parent` carries the already updated balance (+1 or -1) of
    /// the insertion side and `child` is the node the height increase came
    /// through. The walk adjusts each grandparent in turn: a resulting
    /// balance of 0 means the subtree height is unchanged and the walk
    /// stops; +1/-1 means the height grew by one and the walk continues;
    /// +2/-2 is resolved with one or two rotations, which always restore the
    /// pre-insertion subtree height, so the walk stops there.
    fn insertion_fix(&mut self, parent: NodePtr<K, V>, child: NodePtr<K, V>) {
        let mut p = parent;
        let mut b = child;
        unsafe {
            while let Some(mut g) = p.as_ref().parent {
                if g.as_ref().left == Some(p) {
                    g.as_mut().balance -= 1;
                    match g.as_ref().balance {
                        0 => return,
                        -1 => {
                            b = p;
                            p = g;
                        }
                        _ => {
                            debug_assert_eq!(g.as_ref().balance, -2);
                            if p.as_ref().balance == -1 {
                                // zig-zig: one right rotation
                                self.rotate_right(g);
                                p.as_mut().balance = 0;
                                g.as_mut().balance = 0;
                            } else {
                                // zig-zag: rotate the middle node up; final
                                // balances depend on which side of it the
                                // height increase came through
                                debug_assert_eq!(p.as_ref().balance, 1);
                                self.rotate_left(p);
                                self.rotate_right(g);
                                match b.as_ref().balance {
                                    -1 => {
                                        p.as_mut().balance = 0;
                                        g.as_mut().balance = 1;
                                    }
                                    0 => {
                                        p.as_mut().balance = 0;
                                        g.as_mut().balance = 0;
                                    }
                                    _ => {
                                        p.as_mut().balance = -1;
                                        g.as_mut().balance = 0;
                                    }
                                }
                                b.as_mut().balance = 0;
                            }
                            return;
                        }
                    }
                } else {
                    g.as_mut().balance += 1;
                    match g.as_ref().balance {
                        0 => return,
                        1 => {
                            b = p;
                            p = g;
                        }
                        _ => {
                            debug_assert_eq!(g.as_ref().balance, 2);
                            if p.as_ref().balance == 1 {
                                // zig-zig: one left rotation
                                self.rotate_left(g);
                                p.as_mut().balance = 0;
                                g.as_mut().balance = 0;
                            } else {
                                debug_assert_eq!(p.as_ref().balance, -1);
                                self.rotate_right(p);
                                self.rotate_left(g);
                                match b.as_ref().balance {
                                    1 => {
                                        p.as_mut().balance = 0;
                                        g.as_mut().balance = -1;
                                    }
                                    0 => {
                                        p.as_mut().balance = 0;
                                        g.as_mut().balance = 0;
                                    }
                                    _ => {
                                        p.as_mut().balance = 1;
                                        g.as_mut().balance = 0;
                                    }
                                }
                                b.as_mut().balance = 0;
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Restores the AVL condition after a structural removal.
    ///
    /// `diff` signals which subtree of the starting node lost one unit of
    /// height: +1 for the left side, -1 for the right side. Each step either
    /// absorbs the change (new balance +1/-1: subtree height unchanged,
    /// stop), records a shrink (new balance 0: continue with the parent), or
    /// rebalances a +2/-2 node. A rebalancing rotation may itself shrink the
    /// subtree, in which case the walk continues; the zig-zig case with a
    /// perfectly balanced child preserves the height and stops.
    fn removal_fix(&mut self, start: Link<K, V>, diff: i8) {
        let mut current = start;
        let mut diff = diff;
        unsafe {
            while let Some(mut node) = current {
                let parent = node.as_ref().parent;
                // Signal into the parent, in case the walk continues.
                let ndiff: i8 = match parent {
                    Some(parent_ptr) if parent_ptr.as_ref().left == Some(node) => 1,
                    _ => -1,
                };
                match node.as_ref().balance + diff {
                    -2 => {
                        let mut c = node.as_ref().left.unwrap();
                        if c.as_ref().balance == -1 {
                            // zig-zig, subtree shrinks by one
                            self.rotate_right(node);
                            node.as_mut().balance = 0;
                            c.as_mut().balance = 0;
                        } else if c.as_ref().balance == 0 {
                            // zig-zig, subtree height preserved
                            self.rotate_right(node);
                            node.as_mut().balance = -1;
                            c.as_mut().balance = 1;
                            return;
                        } else {
                            // zig-zag, subtree shrinks by one
                            let mut g = c.as_ref().right.unwrap();
                            self.rotate_left(c);
                            self.rotate_right(node);
                            match g.as_ref().balance {
                                1 => {
                                    node.as_mut().balance = 0;
                                    c.as_mut().balance = -1;
                                }
                                0 => {
                                    node.as_mut().balance = 0;
                                    c.as_mut().balance = 0;
                                }
                                _ => {
                                    node.as_mut().balance = 1;
                                    c.as_mut().balance = 0;
                                }
                            }
                            g.as_mut().balance = 0;
                        }
                    }
                    2 => {
                        let mut c = node.as_ref().right.unwrap();
                        if c.as_ref().balance == 1 {
                            self.rotate_left(node);
                            node.as_mut().balance = 0;
                            c.as_mut().balance = 0;
                        } else if c.as_ref().balance == 0 {
                            self.rotate_left(node);
                            node.as_mut().balance = 1;
                            c.as_mut().balance = -1;
                            return;
                        } else {
                            let mut g = c.as_ref().left.unwrap();
                            self.rotate_right(c);
                            self.rotate_left(node);
                            match g.as_ref().balance {
                                -1 => {
                                    node.as_mut().balance = 0;
                                    c.as_mut().balance = 1;
                                }
                                0 => {
                                    node.as_mut().balance = 0;
                                    c.as_mut().balance = 0;
                                }
                                _ => {
                                    node.as_mut().balance = -1;
                                    c.as_mut().balance = 0;
                                }
                            }
                            g.as_mut().balance = 0;
                        }
                    }
                    0 => {
                        // The taller side shrank level with the other: this
                        // subtree lost one unit of height, keep walking.
                        node.as_mut().balance = 0;
                    }
                    new_balance => {
                        // The shorter side shrank: absorbed without any
                        // subtree height change.
                        debug_assert!(new_balance == -1 || new_balance == 1);
                        node.as_mut().balance = new_balance;
                        return;
                    }
                }
                current = parent;
                diff = ndiff;
            }
        }
    }
}

impl<K, V> Drop for AvlTreeMap<K, V> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K, V> Default for AvlTreeMap<K, V> {
    /// Creates an empty map.
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for AvlTreeMap<K, V> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Clone, V: Clone> Clone for AvlTreeMap<K, V> {
    fn clone(&self) -> Self {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for AvlTreeMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq> Eq for AvlTreeMap<K, V> {}

impl<K: Ord, V> FromIterator<(K, V)> for AvlTreeMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<K: Ord, V> Extend<(K, V)> for AvlTreeMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, Q, V> ops::Index<&Q> for AvlTreeMap<K, V>
where
    K: Borrow<Q> + Ord,
    Q: Ord + ?Sized,
{
    type Output = V;

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present in the map.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<'a, K, V> IntoIterator for &'a AvlTreeMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V> IntoIterator for &'a mut AvlTreeMap<K, V> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<K, V> IntoIterator for AvlTreeMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;
    fn into_iter(self) -> Self::IntoIter {
        IntoIter { map: self }
    }
}

// Auto derived clone would demand K: Clone and V: Clone.
impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            front: self.front,
            back: self.back,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node_ptr = self.front?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.front = successor(node_ptr);
        }
        let node = unsafe { &*node_ptr.as_ptr() };
        Some((&node.key, &node.value))
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let node_ptr = self.back?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.back = predecessor(node_ptr);
        }
        let node = unsafe { &*node_ptr.as_ptr() };
        Some((&node.key, &node.value))
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let node_ptr = self.front?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.front = successor(node_ptr);
        }
        let node = unsafe { &mut *node_ptr.as_ptr() };
        Some((&node.key, &mut node.value))
    }
}

impl<'a, K, V> DoubleEndedIterator for IterMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let node_ptr = self.back?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.back = predecessor(node_ptr);
        }
        let node = unsafe { &mut *node_ptr.as_ptr() };
        Some((&node.key, &mut node.value))
    }
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        unsafe {
            let mut node_ptr = self.map.root?;
            while let Some(left_ptr) = node_ptr.as_ref().left {
                node_ptr = left_ptr;
            }
            // The tree is being consumed, so the minimum is unlinked without
            // any rebalancing.
            let child = node_ptr.as_ref().right;
            self.map.replace_in_parent(node_ptr, child);
            self.map.num_nodes -= 1;
            Some(Node::destroy(node_ptr))
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.map.len(), Some(self.map.len()))
    }
}

impl<K, V> DoubleEndedIterator for IntoIter<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        unsafe {
            let mut node_ptr = self.map.root?;
            while let Some(right_ptr) = node_ptr.as_ref().right {
                node_ptr = right_ptr;
            }
            let child = node_ptr.as_ref().left;
            self.map.replace_in_parent(node_ptr, child);
            self.map.num_nodes -= 1;
            Some(Node::destroy(node_ptr))
        }
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {
    fn len(&self) -> usize {
        self.map.len()
    }
}

impl<K, V> Node<K, V> {
    fn create(parent: Link<K, V>, key: K, value: V) -> NodePtr<K, V> {
        let boxed = Box::new(Node {
            key,
            value,
            parent,
            left: None,
            right: None,
            balance: 0,
        });
        unsafe { NodePtr::new_unchecked(Box::into_raw(boxed)) }
    }

    unsafe fn destroy(node_ptr: NodePtr<K, V>) -> (K, V) {
        let boxed = Box::from_raw(node_ptr.as_ptr());
        (boxed.key, boxed.value)
    }
}

fn leftmost<K, V>(link: Link<K, V>) -> Link<K, V> {
    let mut node_ptr = link?;
    unsafe {
        while let Some(left_ptr) = node_ptr.as_ref().left {
            node_ptr = left_ptr;
        }
    }
    Some(node_ptr)
}

fn rightmost<K, V>(link: Link<K, V>) -> Link<K, V> {
    let mut node_ptr = link?;
    unsafe {
        while let Some(right_ptr) = node_ptr.as_ref().right {
            node_ptr = right_ptr;
        }
    }
    Some(node_ptr)
}

/// In-order successor: leftmost node of the right subtree, or the first
/// ancestor reached from a left child.
fn successor<K, V>(node_ptr: NodePtr<K, V>) -> Link<K, V> {
    unsafe {
        if node_ptr.as_ref().right.is_some() {
            return leftmost(node_ptr.as_ref().right);
        }
        let mut current = node_ptr;
        while let Some(parent_ptr) = current.as_ref().parent {
            if parent_ptr.as_ref().left == Some(current) {
                return Some(parent_ptr);
            }
            current = parent_ptr;
        }
        None
    }
}

/// In-order predecessor, the mirror image of [`successor`].
fn predecessor<K, V>(node_ptr: NodePtr<K, V>) -> Link<K, V> {
    unsafe {
        if node_ptr.as_ref().left.is_some() {
            return rightmost(node_ptr.as_ref().left);
        }
        let mut current = node_ptr;
        while let Some(parent_ptr) = current.as_ref().parent {
            if parent_ptr.as_ref().right == Some(current) {
                return Some(parent_ptr);
            }
            current = parent_ptr;
        }
        None
    }
}

#[cfg(any(test, feature = "consistency_check"))]
unsafe fn subtree_height<K, V>(link: Link<K, V>) -> isize {
    match link {
        None => -1,
        Some(node_ptr) => {
            1 + std::cmp::max(
                subtree_height(node_ptr.as_ref().left),
                subtree_height(node_ptr.as_ref().right),
            )
        }
    }
}
