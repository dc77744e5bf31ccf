//! Template invocation stack types.

use crate::title::Title;
use indexmap::IndexMap;

/// One template call: the called template and the arguments passed to it.
#[derive(Clone, Debug)]
pub(super) struct TemplateInvocation {
    /// The title of the template.
    pub name: Title,
    /// Unnamed arguments, in order. Positional arguments are not trimmed.
    pub positional: Vec<String>,
    /// Named arguments, with trimmed keys and values. An argument with an
    /// explicit numeric name, like `2=x`, is stored here and takes precedence
    /// over the positional argument at the same index.
    pub named: IndexMap<String, String>,
    /// The recursion depth at the time of the call.
    pub depth: u32,
}

impl TemplateInvocation {
    /// Returns the argument with the given key. Positional arguments are
    /// numbered from 1.
    pub fn argument(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.named.get(key) {
            return Some(value);
        }

        key.parse::<usize>()
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| self.positional.get(index))
            .map(String::as_str)
    }
}

/// A template transclusion stack frame.
#[derive(Debug)]
pub(super) struct StackFrame<'a> {
    /// The call which created this frame.
    pub invocation: TemplateInvocation,
    /// The frame of the caller, if the caller was itself a template.
    pub parent: Option<&'a StackFrame<'a>>,
}

impl<'a> StackFrame<'a> {
    /// Creates a new stack frame for `invocation`, called from `parent`.
    pub fn chain(parent: Option<&'a StackFrame<'a>>, invocation: TemplateInvocation) -> Self {
        Self { invocation, parent }
    }

    /// Returns the argument with the given key.
    #[inline]
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.invocation.argument(key)
    }

    /// Convenience function for emitting a backtrace when a limit is hit.
    pub fn backtrace(&self) {
        debug_backtrace(self);
    }
}

/// Emits a backtrace to the warning log.
fn debug_backtrace(mut sp: &StackFrame<'_>) {
    let mut index = 0;
    loop {
        log::warn!(
            "{index:>2}. {} (depth {})",
            sp.invocation.name,
            sp.invocation.depth
        );
        index += 1;
        if let Some(parent) = sp.parent {
            sp = parent;
        } else {
            break;
        }
    }
}
