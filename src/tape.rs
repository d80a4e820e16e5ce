//! Flattening an expression tree into a postorder tape.
//!
//! A tape is one flat array: each entry records an opcode, its argument
//! count, and the *length* of the subtree it roots (itself included).
//! Children carry no pointers — for entry `i` the rightmost argument roots
//! the subtree ending at `i - 1`, and each further sibling is found by
//! subtracting the previous sibling's length ([`Tape::args`]). That single
//! arithmetic trick is what the batched interpreter and the kernel compiler
//! both lean on: the tape stays cache-friendly, array-addressable, and
//! trivially serializable.
//!
//! Shared subtree ids are flattened once per occurrence. Jacobian
//! accumulation uses `+=`, so the duplication is invisible in results; it
//! trades a little tape length for never having to track fan-out.

use crate::expr::{ExprArena, Node, NodeId};
use crate::float::Float;
use crate::opcode::OpCode;

/// One entry of a flattened tape.
///
/// `idx` is the θ/x index for `Param`/`Var` entries; `value` is the payload
/// for `Const` entries. Both are zero otherwise.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TapeEntry<F> {
    /// Operation code.
    pub op: OpCode,
    /// Number of arguments (0 for leaves, 1 or 2 otherwise).
    pub argc: u8,
    /// Length of the subtree rooted here, this entry included.
    pub len: u32,
    /// θ/x index for `Param`/`Var`.
    pub idx: u32,
    /// Constant payload for `Const`.
    pub value: F,
}

/// Postorder tape for one expression; see the module docs for the layout.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tape<F> {
    entries: Vec<TapeEntry<F>>,
}

impl<F: Float> Tape<F> {
    /// Number of entries. The root is always the last entry.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for the empty tape (never produced by [`flatten`]).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slice view of all entries in postorder.
    #[inline]
    pub fn entries(&self) -> &[TapeEntry<F>] {
        &self.entries
    }

    /// Positions of entry `i`'s arguments, in argument order.
    ///
    /// Walks backward from `i - 1`, hopping over each sibling subtree by its
    /// recorded length. Unused slots are `usize::MAX`.
    #[inline]
    pub fn args(&self, i: usize) -> [usize; 2] {
        let argc = self.entries[i].argc as usize;
        let mut pos = [usize::MAX; 2];
        if argc == 0 {
            return pos;
        }
        let mut c = i - 1;
        for k in (0..argc).rev() {
            pos[k] = c;
            if k > 0 {
                c -= self.entries[c].len as usize;
            }
        }
        pos
    }

    /// Largest θ index referenced, if any parameter is.
    pub fn max_param(&self) -> Option<usize> {
        self.entries
            .iter()
            .filter(|e| e.op == OpCode::Param)
            .map(|e| e.idx as usize)
            .max()
    }

    /// Largest x index referenced, if any variable is.
    pub fn max_var(&self) -> Option<usize> {
        self.entries
            .iter()
            .filter(|e| e.op == OpCode::Var)
            .map(|e| e.idx as usize)
            .max()
    }
}

/// Flatten the subtree rooted at `root` into a postorder tape.
///
/// Assumes the expression has been [validated](crate::validate::validate);
/// the evaluator constructors do this before calling in. An unvalidated,
/// malformed expression panics here rather than producing a wrong tape.
pub fn flatten<F: Float>(arena: &ExprArena<F>, root: NodeId) -> Tape<F> {
    let mut entries = Vec::new();
    flatten_into(arena, root, &mut entries);
    Tape { entries }
}

fn flatten_into<F: Float>(arena: &ExprArena<F>, id: NodeId, entries: &mut Vec<TapeEntry<F>>) {
    let start = entries.len();
    let (op, argc, idx, value) = match *arena.node(id) {
        Node::Const(v) => (OpCode::Const, 0u8, 0u32, v),
        Node::Param(i) => (OpCode::Param, 0, i as u32, F::zero()),
        Node::Var(i) => (OpCode::Var, 0, i as u32, F::zero()),
        Node::Neg(a) => {
            flatten_into(arena, a, entries);
            (OpCode::Neg, 1, 0, F::zero())
        }
        Node::Bin(op, a, b) => {
            flatten_into(arena, a, entries);
            flatten_into(arena, b, entries);
            (OpCode::from_bin(op), 2, 0, F::zero())
        }
        Node::Call(f, a, b) => {
            flatten_into(arena, a, entries);
            let mut argc = 1u8;
            if let Some(b) = b {
                flatten_into(arena, b, entries);
                argc = 2;
            }
            (OpCode::from_func(f), argc, 0, F::zero())
        }
    };
    let len = (entries.len() - start + 1) as u32;
    entries.push(TapeEntry {
        op,
        argc,
        len,
        idx,
        value,
    });
}
