use fxhash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::value::MacroValue;

type Frame = Rc<RefCell<FxHashMap<String, MacroValue>>>;

/// Scoped variable environment for the evaluator.
///
/// Frames are shared, so a closure that captured an environment sees later
/// assignments to the variables it closed over (and can call itself
/// recursively). Declared names are already unique fresh names; the
/// outermost frame also holds free globals by their written name.
#[derive(Clone)]
pub struct Environment {
    /// Stack of frames (innermost last)
    scopes: Vec<Frame>,
}

impl Environment {
    /// Create a new environment with a single global frame
    pub fn new() -> Self {
        Self {
            scopes: vec![Frame::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Frame::default());
    }

    /// Pop the innermost frame. The global frame is never popped.
    pub fn pop_scope(&mut self) -> bool {
        if self.scopes.len() > 1 {
            self.scopes.pop();
            true
        } else {
            false
        }
    }

    /// Look up a variable, innermost frame first
    pub fn get(&self, name: &str) -> Option<MacroValue> {
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.borrow().get(name).cloned())
    }

    /// Update an existing variable. Returns false when it is not defined.
    pub fn set(&mut self, name: &str, value: MacroValue) -> bool {
        for frame in self.scopes.iter().rev() {
            let mut frame = frame.borrow_mut();
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// Define a variable in the innermost frame
    pub fn define(&mut self, name: &str, value: MacroValue) {
        if let Some(frame) = self.scopes.last() {
            frame.borrow_mut().insert(name.to_string(), value);
        }
    }

    /// Define a variable in the global frame
    pub fn define_global(&mut self, name: &str, value: MacroValue) {
        if let Some(frame) = self.scopes.first() {
            frame.borrow_mut().insert(name.to_string(), value);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|frame| frame.borrow().contains_key(name))
    }

    /// Current depth (0 = global only)
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// All visible names, sorted (for debugging and error messages)
    pub fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|frame| frame.borrow().keys().cloned().collect::<Vec<_>>())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Environment for a closure: shares every frame with this one
    pub fn capture(&self) -> Environment {
        self.clone()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .finish()
    }
}
