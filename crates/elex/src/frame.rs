//! Runtime activation records and block-level lexical state.
//!
//! A `Frame` holds one slot per symbol of its `Scope`. Captured symbols are
//! backed by shared cells so a lambda observes assignments made in the
//! enclosing frame after its creation. `LexicalBlock` tracks which symbols a
//! block declared, driving redefinition errors and lexical shading.

use std::sync::{Arc, RwLock};

use smallvec::SmallVec;

use crate::{
    scope::Scope,
    tree::{Ast, NodeId},
    value::Value,
};

/// Shared storage for a captured variable.
///
/// Capture is by reference: the enclosing frame and every closure over the
/// symbol read and write the same cell.
pub(crate) type CaptureCell = Arc<RwLock<CellValue>>;

#[derive(Debug)]
pub(crate) enum CellValue {
    /// Declared but not yet assigned.
    Declared,
    Value(Value),
}

/// A lambda closed over its defining environment.
#[derive(Debug)]
pub struct Closure {
    pub(crate) ast: Arc<Ast>,
    /// The lambda node inside `ast`.
    pub(crate) node: NodeId,
    pub(crate) scope: Arc<Scope>,
    /// One cell per `scope.captures()` entry, bound at creation time.
    pub(crate) cells: Vec<CaptureCell>,
}

impl Closure {
    /// Ordered parameter names of the lambda.
    pub fn parameters(&self) -> impl Iterator<Item = &Arc<str>> {
        self.scope.parameters()
    }
}

/// One symbol slot in a frame.
#[derive(Debug)]
enum Slot {
    /// The declaring statement has not executed yet.
    Undeclared,
    /// Declared, no value assigned.
    Declared,
    Value(Value),
    Cell(CaptureCell),
}

/// Result of a frame read.
#[derive(Debug)]
pub(crate) enum FrameGet {
    Value(Value),
    Undeclared,
    /// Declared but never assigned.
    Undefined,
    /// Declared in a block that has since exited under lexical shading.
    Shaded,
}

/// Assignment rejection.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameSetError {
    /// The symbol is `const` and already initialised.
    Const,
}

#[derive(Debug)]
pub(crate) struct Frame {
    scope: Arc<Scope>,
    slots: Vec<Slot>,
    shaded: Vec<bool>,
}

impl Frame {
    /// A frame for a script body; every slot starts undeclared.
    pub fn for_script(scope: Arc<Scope>) -> Self {
        let len = scope.len();
        Self {
            scope,
            slots: (0..len).map(|_| Slot::Undeclared).collect(),
            shaded: vec![false; len],
        }
    }

    /// A frame for a closure call: parameters bound to arguments in order,
    /// captured slots bound to the closure's cells, the rest undeclared.
    ///
    /// Missing arguments leave their parameters declared-undefined; extra
    /// arguments are ignored.
    pub fn for_closure(closure: &Closure, args: Vec<Value>) -> Self {
        let scope = closure.scope.clone();
        let len = scope.len();
        let params = scope.param_count();
        let mut slots: Vec<Slot> = Vec::with_capacity(len);
        let mut args = args.into_iter();
        for index in 0..len {
            if index < params {
                slots.push(match args.next() {
                    Some(value) => Slot::Value(value),
                    None => Slot::Declared,
                });
            } else {
                slots.push(Slot::Undeclared);
            }
        }
        for (capture, cell) in scope.captures().iter().zip(&closure.cells) {
            slots[capture.local as usize] = Slot::Cell(cell.clone());
        }
        Self {
            scope,
            shaded: vec![false; len],
            slots,
        }
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn get(&self, symbol: u32) -> FrameGet {
        if self.shaded[symbol as usize] {
            return FrameGet::Shaded;
        }
        match &self.slots[symbol as usize] {
            Slot::Undeclared => FrameGet::Undeclared,
            Slot::Declared => FrameGet::Undefined,
            Slot::Value(value) => FrameGet::Value(value.clone()),
            Slot::Cell(cell) => match &*cell.read().expect("capture cell poisoned") {
                CellValue::Declared => FrameGet::Undefined,
                CellValue::Value(value) => FrameGet::Value(value.clone()),
            },
        }
    }

    /// Whether the symbol currently holds a value.
    pub fn has(&self, symbol: u32) -> bool {
        matches!(self.get(symbol), FrameGet::Value(_))
    }

    /// Marks the symbol declared, resetting any previous value. Used when a
    /// `var` statement executes, including re-execution inside loops.
    pub fn declare(&mut self, symbol: u32) {
        self.shaded[symbol as usize] = false;
        match &mut self.slots[symbol as usize] {
            Slot::Cell(cell) => {
                *cell.write().expect("capture cell poisoned") = CellValue::Declared;
            }
            slot => *slot = Slot::Declared,
        }
    }

    pub fn set(&mut self, symbol: u32, value: Value) -> Result<(), FrameSetError> {
        if self.scope.symbol(symbol).constant && self.has(symbol) {
            return Err(FrameSetError::Const);
        }
        match &mut self.slots[symbol as usize] {
            Slot::Cell(cell) => {
                *cell.write().expect("capture cell poisoned") = CellValue::Value(value);
            }
            slot => *slot = Slot::Value(value),
        }
        Ok(())
    }

    /// Makes the symbol invisible to later lookups in this frame.
    pub fn shade(&mut self, symbol: u32) {
        self.shaded[symbol as usize] = true;
    }

    /// The shared cell backing a symbol, hoisting the current slot contents
    /// into a fresh cell on first capture.
    pub fn capture_cell(&mut self, symbol: u32) -> CaptureCell {
        let slot = &mut self.slots[symbol as usize];
        if let Slot::Cell(cell) = slot {
            return cell.clone();
        }
        let current = std::mem::replace(slot, Slot::Undeclared);
        let cell: CaptureCell = Arc::new(RwLock::new(match current {
            Slot::Value(value) => CellValue::Value(value),
            Slot::Undeclared | Slot::Declared => CellValue::Declared,
            Slot::Cell(_) => unreachable!("handled above"),
        }));
        *slot = Slot::Cell(cell.clone());
        cell
    }
}

/// Block-level declaration tracking.
///
/// One record per entered block, linked to the enclosing block. A symbol may
/// be declared once per block; nested blocks may shadow.
#[derive(Debug, Default)]
pub(crate) struct LexicalBlock {
    declared: SmallVec<[u32; 4]>,
    parent: Option<Box<LexicalBlock>>,
}

impl LexicalBlock {
    pub fn nest(parent: Option<Box<Self>>) -> Box<Self> {
        Box::new(Self {
            declared: SmallVec::new(),
            parent,
        })
    }

    /// Records a declaration in this block. Returns `false` when the same
    /// block already declared the symbol.
    pub fn define(&mut self, symbol: u32) -> bool {
        if self.declared.contains(&symbol) {
            return false;
        }
        self.declared.push(symbol);
        true
    }

    pub fn symbols(&self) -> &[u32] {
        &self.declared
    }

    pub fn into_parent(self) -> Option<Box<Self>> {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with(names: &[&str]) -> Arc<Scope> {
        let mut scope = Scope::new();
        for name in names {
            scope.declare_var(Arc::from(*name), false, false).unwrap();
        }
        Arc::new(scope)
    }

    #[test]
    fn lifecycle_states() {
        let mut frame = Frame::for_script(scope_with(&["x"]));
        assert!(matches!(frame.get(0), FrameGet::Undeclared));
        frame.declare(0);
        assert!(matches!(frame.get(0), FrameGet::Undefined));
        frame.set(0, Value::Int(1)).unwrap();
        assert!(matches!(frame.get(0), FrameGet::Value(Value::Int(1))));
        frame.shade(0);
        assert!(matches!(frame.get(0), FrameGet::Shaded));
        // redeclaration lifts the shade
        frame.declare(0);
        assert!(matches!(frame.get(0), FrameGet::Undefined));
    }

    #[test]
    fn const_blocks_second_assignment() {
        let mut scope = Scope::new();
        scope.declare_var("k".into(), true, true).unwrap();
        let mut frame = Frame::for_script(Arc::new(scope));
        frame.declare(0);
        frame.set(0, Value::Int(1)).unwrap();
        assert_eq!(frame.set(0, Value::Int(2)), Err(FrameSetError::Const));
    }

    #[test]
    fn capture_cell_shares_later_assignments() {
        let mut frame = Frame::for_script(scope_with(&["x"]));
        frame.declare(0);
        frame.set(0, Value::Int(1)).unwrap();
        let cell = frame.capture_cell(0);
        frame.set(0, Value::Int(5)).unwrap();
        match &*cell.read().unwrap() {
            CellValue::Value(Value::Int(5)) => {}
            other => panic!("expected shared 5, got {other:?}"),
        }
    }

    #[test]
    fn block_rejects_same_block_redeclaration() {
        let mut block = LexicalBlock::nest(None);
        assert!(block.define(3));
        assert!(!block.define(3));
        let mut inner = LexicalBlock::nest(Some(block));
        // shadowing in a nested block is fine
        assert!(inner.define(3));
    }
}
