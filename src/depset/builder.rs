use std::collections::HashSet;
use std::hash::Hash;

use super::{DepSet, DepSetError, Order};

/// Accumulates direct elements and child sets for a new [`DepSet`] node.
///
/// Building is O(direct + children). Child sets are referenced, not copied.
#[derive(Debug)]
pub struct DepSetBuilder<T> {
    order: Order,
    direct: Vec<T>,
    transitive: Vec<DepSet<T>>,
}

impl<T: Clone + Eq + Hash> DepSetBuilder<T> {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            direct: Vec::new(),
            transitive: Vec::new(),
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.transitive.is_empty()
    }

    pub fn add(&mut self, item: T) -> &mut Self {
        self.direct.push(item);
        self
    }

    pub fn add_all(&mut self, items: impl IntoIterator<Item = T>) -> &mut Self {
        self.direct.extend(items);
        self
    }

    /// Nests an existing set. Empty sets are dropped; the child's order must
    /// be compatible with this builder's order.
    pub fn add_transitive(&mut self, set: DepSet<T>) -> Result<&mut Self, DepSetError> {
        if set.is_empty() {
            return Ok(self);
        }
        if !self.order.is_compatible(set.order()) {
            return Err(DepSetError::IncompatibleOrder {
                parent: self.order,
                child: set.order(),
            });
        }
        self.transitive.push(set);
        Ok(self)
    }

    pub fn build(self) -> DepSet<T> {
        let Self {
            order,
            direct,
            transitive,
        } = self;

        // Wrapping a lone child in a new node would only break sharing
        if let ([], [only]) = (direct.as_slice(), transitive.as_slice()) {
            if only.order() == order {
                return only.clone();
            }
        }

        let mut seen = HashSet::with_capacity(direct.len());
        let direct: Vec<T> = direct
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();

        let mut children: Vec<DepSet<T>> = Vec::with_capacity(transitive.len());
        for set in transitive {
            if !children.iter().any(|c| c.same_node(&set)) {
                children.push(set);
            }
        }

        DepSet::from_parts(order, direct, children)
    }
}
