/// Shared, immutable dependency sets.
///
/// A [`DepSet`] is a handle to a node in a small DAG: each node holds its
/// direct elements and the child sets it was composed from. Composing a new
/// set is O(direct elements + children) and never copies what the children
/// hold, so one large set (a toolchain, a standard library) can be referenced
/// by thousands of actions at no extra cost.
///
/// Nodes are never mutated after construction. The digest of a node is
/// computed once, on first request, and published through a `OnceLock` owned
/// by the node itself, so the memoization is keyed by node identity and
/// concurrent first callers never observe a partial value.
mod builder;
mod order;

pub use builder::DepSetBuilder;
pub use order::Order;

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::fingerprint::{DigestBytes, Fingerprint, Fingerprintable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepSetError {
    #[error("cannot nest a {child} set inside a {parent} set")]
    IncompatibleOrder { parent: Order, child: Order },

    #[error("unknown dependency set order: {0}")]
    UnknownOrder(String),
}

struct Node<T> {
    order: Order,
    direct: Box<[T]>,
    children: Box<[DepSet<T>]>,
    digest: OnceLock<DigestBytes>,
}

impl<T> Drop for Node<T> {
    /// Unlinks uniquely owned descendants one at a time, so dropping a deep
    /// chain uses constant stack
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children).into_vec();
        while let Some(set) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(set.node) {
                pending.extend(std::mem::take(&mut node.children).into_vec());
            }
        }
    }
}

/// Cheap-to-clone handle to an immutable dependency set node
pub struct DepSet<T> {
    node: Arc<Node<T>>,
}

impl<T> Clone for DepSet<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for DepSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepSet")
            .field("order", &self.node.order)
            .field("direct", &self.node.direct.len())
            .field("children", &self.node.children.len())
            .finish()
    }
}

impl<T> DepSet<T> {
    fn from_parts(order: Order, direct: Vec<T>, children: Vec<DepSet<T>>) -> Self {
        Self {
            node: Arc::new(Node {
                order,
                direct: direct.into_boxed_slice(),
                children: children.into_boxed_slice(),
                digest: OnceLock::new(),
            }),
        }
    }

    pub fn empty(order: Order) -> Self {
        Self::from_parts(order, Vec::new(), Vec::new())
    }

    pub fn order(&self) -> Order {
        self.node.order
    }

    /// Empty sets never hold children: the builder drops empty children
    pub fn is_empty(&self) -> bool {
        self.node.direct.is_empty() && self.node.children.is_empty()
    }

    pub fn direct_count(&self) -> usize {
        self.node.direct.len()
    }

    pub fn child_count(&self) -> usize {
        self.node.children.len()
    }

    /// Identity comparison: true when both handles point at the same node
    pub fn same_node(&self, other: &DepSet<T>) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl<T: Clone + Eq + Hash> DepSet<T> {
    /// Builds a set holding exactly the given elements, deduplicated
    pub fn of(order: Order, items: impl IntoIterator<Item = T>) -> Self {
        let mut builder = DepSetBuilder::new(order);
        builder.add_all(items);
        builder.build()
    }

    /// Unions existing sets without copying them
    pub fn union(
        order: Order,
        sets: impl IntoIterator<Item = DepSet<T>>,
    ) -> Result<Self, DepSetError> {
        let mut builder = DepSetBuilder::new(order);
        for set in sets {
            builder.add_transitive(set)?;
        }
        Ok(builder.build())
    }

    pub fn is_singleton(&self) -> bool {
        self.node.children.is_empty() && self.node.direct.len() == 1
    }

    /// Flattens the set according to its order, deduplicated
    pub fn to_list(&self) -> Vec<T> {
        self.flatten_refs().into_iter().cloned().collect()
    }

    pub fn to_hash_set(&self) -> HashSet<T> {
        self.flatten_refs().into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.flatten_refs().len()
    }

    fn flatten_refs(&self) -> Vec<&T> {
        match self.node.order {
            Order::Stable | Order::Compile => postorder(self.node.as_ref(), false),
            Order::NaiveLink => preorder(self.node.as_ref()),
            Order::Link => {
                let mut items = postorder(self.node.as_ref(), true);
                items.reverse();
                items
            }
        }
    }
}

impl<T: Clone + Eq + Hash + Fingerprintable> DepSet<T> {
    /// Digest over (order, flattened elements); independent of DAG shape
    pub fn digest(&self) -> DigestBytes {
        *self.node.digest.get_or_init(|| {
            let items = self.flatten_refs();
            let mut fp = Fingerprint::new();
            fp.add_str(self.node.order.name());
            fp.add_int(items.len() as u64);
            for item in items {
                fp.add_fingerprintable(item);
            }
            fp.finish_bytes()
        })
    }

    /// Whether the digest of this node has already been computed
    pub fn is_digest_memoized(&self) -> bool {
        self.node.digest.get().is_some()
    }
}

/// Iterative postorder with first-occurrence dedup. `mirrored` walks children
/// right to left and direct elements in reverse.
fn postorder<T: Eq + Hash>(root: &Node<T>, mirrored: bool) -> Vec<&T> {
    let mut out = Vec::new();
    let mut seen: HashSet<&T> = HashSet::new();
    let mut visited: HashSet<*const Node<T>> = HashSet::new();
    let mut stack: Vec<(&Node<T>, usize)> = vec![(root, 0)];
    visited.insert(root as *const Node<T>);

    while let Some(top) = stack.last_mut() {
        let node = top.0;
        if top.1 < node.children.len() {
            let pos = if mirrored {
                node.children.len() - 1 - top.1
            } else {
                top.1
            };
            top.1 += 1;
            let child: &Node<T> = &node.children[pos].node;
            // A visited node cannot contribute unseen elements
            if visited.insert(child as *const Node<T>) {
                stack.push((child, 0));
            }
        } else {
            stack.pop();
            if mirrored {
                emit(node.direct.iter().rev(), &mut seen, &mut out);
            } else {
                emit(node.direct.iter(), &mut seen, &mut out);
            }
        }
    }

    out
}

fn preorder<T: Eq + Hash>(root: &Node<T>) -> Vec<&T> {
    let mut out = Vec::new();
    let mut seen: HashSet<&T> = HashSet::new();
    let mut visited: HashSet<*const Node<T>> = HashSet::new();
    let mut stack: Vec<(&Node<T>, usize)> = vec![(root, 0)];
    visited.insert(root as *const Node<T>);
    emit(root.direct.iter(), &mut seen, &mut out);

    while let Some(top) = stack.last_mut() {
        let node = top.0;
        if top.1 < node.children.len() {
            let child: &Node<T> = &node.children[top.1].node;
            top.1 += 1;
            if visited.insert(child as *const Node<T>) {
                emit(child.direct.iter(), &mut seen, &mut out);
                stack.push((child, 0));
            }
        } else {
            stack.pop();
        }
    }

    out
}

fn emit<'a, T: Eq + Hash>(
    items: impl Iterator<Item = &'a T>,
    seen: &mut HashSet<&'a T>,
    out: &mut Vec<&'a T>,
) {
    for item in items {
        if seen.insert(item) {
            out.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(order: Order, items: &[&str]) -> DepSet<String> {
        DepSet::of(order, items.iter().map(|s| s.to_string()))
    }

    fn names(set: &DepSet<String>) -> Vec<String> {
        set.to_list()
    }

    #[test]
    fn test_composed_duplicates_keep_first_occurrence() {
        let a = set(Order::Compile, &["A"]);
        let b = set(Order::Compile, &["B"]);
        let combined = DepSet::union(Order::Compile, [a.clone(), b, a]).unwrap();
        assert_eq!(names(&combined), vec!["A", "B"]);
    }

    #[test]
    fn test_direct_duplicates_collapse() {
        let s = set(Order::Stable, &["A", "B", "A"]);
        assert_eq!(names(&s), vec!["A", "B"]);
        assert_eq!(s.direct_count(), 2);
    }

    #[test]
    fn test_compile_order_is_postorder() {
        let child = set(Order::Compile, &["c1", "c2"]);
        let mut builder = DepSetBuilder::new(Order::Compile);
        builder.add("root".to_string());
        builder.add_transitive(child).unwrap();
        let root = builder.build();
        // Children before direct elements
        assert_eq!(root.to_list(), vec!["c1", "c2", "root"]);
    }

    #[test]
    fn test_naive_link_order_is_preorder() {
        let left = set(Order::NaiveLink, &["l"]);
        let right = set(Order::NaiveLink, &["r"]);
        let mut builder = DepSetBuilder::new(Order::NaiveLink);
        builder.add("root".to_string());
        builder.add_transitive(left).unwrap();
        builder.add_transitive(right).unwrap();
        assert_eq!(names(&builder.build()), vec!["root", "l", "r"]);
    }

    #[test]
    fn test_link_order_puts_dependents_first() {
        // libA depends on libC; libB depends on libC
        let c = set(Order::Link, &["libC"]);
        let mut a = DepSetBuilder::new(Order::Link);
        a.add("libA".to_string());
        a.add_transitive(c.clone()).unwrap();
        let mut b = DepSetBuilder::new(Order::Link);
        b.add("libB".to_string());
        b.add_transitive(c).unwrap();

        let mut top = DepSetBuilder::new(Order::Link);
        top.add("main".to_string());
        top.add_transitive(a.build()).unwrap();
        top.add_transitive(b.build()).unwrap();
        let flat = names(&top.build());

        assert_eq!(flat.first().map(String::as_str), Some("main"));
        let pos = |name: &str| flat.iter().position(|n| n == name).unwrap();
        assert!(pos("libA") < pos("libC"));
        assert!(pos("libB") < pos("libC"));
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn test_link_order_keeps_last_occurrence() {
        // Read left to right the children list s, p, q, s
        let left = set(Order::Link, &["s", "p"]);
        let right = set(Order::Link, &["q", "s"]);
        let top = DepSet::union(Order::Link, [left, right]).unwrap();
        assert_eq!(names(&top), vec!["p", "q", "s"]);
    }

    #[test]
    fn test_incompatible_orders_rejected() {
        let link = set(Order::Link, &["x"]);
        let mut builder = DepSetBuilder::<String>::new(Order::Compile);
        let err = builder.add_transitive(link).unwrap_err();
        assert_eq!(
            err,
            DepSetError::IncompatibleOrder {
                parent: Order::Compile,
                child: Order::Link
            }
        );
    }

    #[test]
    fn test_stable_nests_anywhere() {
        let stable = set(Order::Stable, &["x"]);
        let mut builder = DepSetBuilder::<String>::new(Order::Link);
        assert!(builder.add_transitive(stable).is_ok());
    }

    #[test]
    fn test_digest_ignores_dag_shape() {
        let flat = set(Order::Compile, &["a", "b", "c"]);

        let ab = set(Order::Compile, &["a", "b"]);
        let mut nested = DepSetBuilder::new(Order::Compile);
        nested.add_transitive(ab).unwrap();
        nested.add("c".to_string());
        let nested = nested.build();

        assert!(!flat.same_node(&nested));
        assert_eq!(flat.to_list(), nested.to_list());
        assert_eq!(flat.digest(), nested.digest());
    }

    #[test]
    fn test_digest_depends_on_order_and_content() {
        let compile = set(Order::Compile, &["a", "b"]);
        let preorder = set(Order::NaiveLink, &["a", "b"]);
        let other = set(Order::Compile, &["a", "c"]);
        assert_ne!(compile.digest(), preorder.digest());
        assert_ne!(compile.digest(), other.digest());
    }

    #[test]
    fn test_digest_is_memoized_per_node() {
        let s = set(Order::Stable, &["a"]);
        let shared = s.clone();
        assert!(!shared.is_digest_memoized());
        let first = s.digest();
        assert!(shared.is_digest_memoized());
        assert_eq!(first, shared.digest());
    }

    #[test]
    fn test_concurrent_digest_agrees() {
        let items: Vec<String> = (0..500).map(|i| format!("file{i}")).collect();
        let s = DepSet::of(Order::Stable, items);
        let digests: Vec<DigestBytes> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| s.digest())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut current = set(Order::Compile, &["leaf"]);
        for i in 0..200_000 {
            let mut builder = DepSetBuilder::new(Order::Compile);
            builder.add(format!("n{i}"));
            builder.add_transitive(current).unwrap();
            current = builder.build();
        }
        assert_eq!(current.len(), 200_001);
        drop(current);
    }

    #[test]
    fn test_drop_keeps_shared_children_alive() {
        let shared = set(Order::Stable, &["a", "b"]);
        let parent =
            DepSet::union(Order::Stable, [shared.clone(), set(Order::Stable, &["c"])]).unwrap();
        drop(parent);
        assert_eq!(names(&shared), vec!["a", "b"]);
    }
}
