//! Expression validation.
//!
//! Every evaluator back end runs [`validate`] before touching an expression,
//! so malformed input surfaces as a descriptive [`UnsupportedNodeError`]
//! instead of a panic deep inside a numeric kernel. Validation is pure and
//! idempotent; re-validating an accepted expression never fails.
//!
//! Most of the checks the reference system needed are unrepresentable here:
//! the [`Node`](crate::expr::Node) enum is closed, indices are `usize`
//! literals, and only θ and x exist to be indexed. What remains is arena
//! well-formedness (children must precede parents) and `Call` arity.

use std::fmt;

use crate::expr::{ExprArena, Node, NodeId};
use crate::float::Float;

/// Upper bound on θ/x indices; derived artifacts store them as `u32`.
const MAX_INDEX: usize = u32::MAX as usize - 1;

/// An expression contains a node the engine cannot evaluate.
///
/// Carries the offending node's textual form; recoverable, always raised
/// before any evaluation begins.
#[derive(Clone, Debug)]
pub struct UnsupportedNodeError {
    node: String,
    reason: &'static str,
}

impl UnsupportedNodeError {
    pub(crate) fn new(node: String, reason: &'static str) -> Self {
        UnsupportedNodeError { node, reason }
    }

    /// Textual form of the offending node.
    pub fn node(&self) -> &str {
        &self.node
    }
}

impl fmt::Display for UnsupportedNodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported node `{}`: {}", self.node, self.reason)
    }
}

impl std::error::Error for UnsupportedNodeError {}

/// Check that the subtree rooted at `root` is evaluable.
///
/// Rejects out-of-arena ids, children that do not precede their parent
/// (which would admit cycles), `Call` nodes whose argument count does not
/// match the function's arity, and θ/x indices too large to store in derived
/// artifacts. Accepts everything else — in particular, a parameter index
/// occurring more than once is *not* rejected; see [`duplicated_params`].
pub fn validate<F: Float>(
    arena: &ExprArena<F>,
    root: NodeId,
) -> Result<(), UnsupportedNodeError> {
    if root.index() >= arena.len() {
        return Err(UnsupportedNodeError::new(
            format!("#{}", root.index()),
            "node id out of arena bounds",
        ));
    }

    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = arena.node(id);

        // Children must exist and precede their parent. Checking order (not
        // just bounds) keeps cross-arena id mixups from forming cycles.
        let check_child = |child: NodeId| -> Result<(), UnsupportedNodeError> {
            if child.index() >= id.index() {
                return Err(UnsupportedNodeError::new(
                    format!("{:?}", node),
                    "child node does not precede its parent",
                ));
            }
            Ok(())
        };

        match *node {
            Node::Const(_) => {}
            Node::Param(i) | Node::Var(i) => {
                if i > MAX_INDEX {
                    return Err(UnsupportedNodeError::new(
                        format!("{}", arena.display(id)),
                        "index too large",
                    ));
                }
            }
            Node::Neg(a) => {
                check_child(a)?;
                stack.push(a);
            }
            Node::Bin(_, a, b) => {
                check_child(a)?;
                check_child(b)?;
                stack.push(a);
                stack.push(b);
            }
            Node::Call(f, a, b) => {
                check_child(a)?;
                if let Some(b) = b {
                    check_child(b)?;
                }
                let given = 1 + b.is_some() as usize;
                if given != f.arity() {
                    return Err(UnsupportedNodeError::new(
                        format!("{}", arena.display(id)),
                        if f.arity() == 1 {
                            "function takes exactly one argument"
                        } else {
                            "function takes exactly two arguments"
                        },
                    ));
                }
                stack.push(a);
                if let Some(b) = b {
                    stack.push(b);
                }
            }
        }
    }
    Ok(())
}

/// Parameter indices that occur more than once in the expression.
///
/// Occurrences are counted per tree position, so a shared `Param` subtree
/// referenced from two parents counts twice — exactly how the tape and the
/// compiled kernel see it. The Jacobian accumulators use `+=` throughout, so
/// multi-use parameters are differentiated correctly; callers whose own
/// contract assumes each θ index appears once can use this to detect the
/// divergence up front.
pub fn duplicated_params<F: Float>(arena: &ExprArena<F>, root: NodeId) -> Vec<usize> {
    let mut counts: Vec<usize> = Vec::new();
    count_params(arena, root, &mut counts);
    let mut dup: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 1)
        .map(|(i, _)| i)
        .collect();
    dup.sort_unstable();
    dup
}

fn count_params<F: Float>(arena: &ExprArena<F>, id: NodeId, counts: &mut Vec<usize>) {
    match *arena.node(id) {
        Node::Const(_) | Node::Var(_) => {}
        Node::Param(i) => {
            if counts.len() <= i {
                counts.resize(i + 1, 0);
            }
            counts[i] += 1;
        }
        Node::Neg(a) => count_params(arena, a, counts),
        Node::Bin(_, a, b) => {
            count_params(arena, a, counts);
            count_params(arena, b, counts);
        }
        Node::Call(_, a, b) => {
            count_params(arena, a, counts);
            if let Some(b) = b {
                count_params(arena, b, counts);
            }
        }
    }
}
