use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DepSetError;

/// Traversal policy used when a dependency set is flattened.
///
/// Membership never depends on the order; only the sequence produced by
/// [`super::DepSet::to_list`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Deterministic, with no promise beyond that. Compatible with every order.
    #[default]
    Stable,
    /// Postorder: children left to right, then direct elements.
    Compile,
    /// Topological: direct elements precede everything their children hold.
    Link,
    /// Preorder: direct elements, then children left to right.
    NaiveLink,
}

impl Order {
    pub fn name(&self) -> &'static str {
        match self {
            Order::Stable => "stable",
            Order::Compile => "compile",
            Order::Link => "link",
            Order::NaiveLink => "naive_link",
        }
    }

    /// Whether a set of order `other` may be nested inside a set of this order
    pub fn is_compatible(&self, other: Order) -> bool {
        *self == other || *self == Order::Stable || other == Order::Stable
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Order {
    type Err = DepSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" | "default" => Ok(Order::Stable),
            "compile" | "postorder" => Ok(Order::Compile),
            "link" | "topological" => Ok(Order::Link),
            "naive_link" | "preorder" => Ok(Order::NaiveLink),
            other => Err(DepSetError::UnknownOrder(other.to_string())),
        }
    }
}
