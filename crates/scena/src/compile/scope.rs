//! Block paths and function-argument scopes seen while building.

use crate::{
    engine::{INTERPOLATE_MARKER, SUBSTITUTE_MARKER, argument_reference},
    hash::name_hash,
};

/// Separator between nested block names in a label path.
pub const PATH_SEPARATOR: char = ':';

/// Parameters of a function body being compiled.
#[derive(Debug, Clone)]
struct FunctionScope {
    id: u64,
    params: Vec<String>,
    /// Block depth the function was declared at.
    depth: usize,
}

/// Names of the blocks enclosing the current statement, plus the functions
/// among them.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    blocks: Vec<String>,
    functions: Vec<FunctionScope>,
}

impl Scope {
    /// Full label path of the innermost block, or `None` at top level.
    pub fn current(&self) -> Option<String> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(self.blocks.join(&PATH_SEPARATOR.to_string()))
        }
    }

    /// Label path for a block named `name` declared here.
    pub fn child(&self, name: &str) -> String {
        match self.current() {
            Some(path) => format!("{path}{PATH_SEPARATOR}{name}"),
            None => name.to_owned(),
        }
    }

    pub fn enter(&mut self, name: &str) {
        self.blocks.push(name.to_owned());
    }

    /// Enters a function block whose label path is `path`.
    pub fn enter_function(&mut self, name: &str, path: &str, params: Vec<String>) {
        self.functions.push(FunctionScope {
            id: name_hash(path),
            params,
            depth: self.blocks.len(),
        });
        self.enter(name);
    }

    pub fn leave(&mut self) {
        self.blocks.pop();
        if self.functions.last().is_some_and(|f| f.depth == self.blocks.len()) {
            self.functions.pop();
        }
    }

    pub fn in_function(&self) -> bool {
        !self.functions.is_empty()
    }

    /// Resolves a jump target against the current block.
    ///
    /// A leading `:` makes the path absolute; each leading `~` climbs one block.
    /// Returns `None` when the target climbs above the top level.
    pub fn resolve(&self, target: &str) -> Option<String> {
        if let Some(absolute) = target.strip_prefix(PATH_SEPARATOR) {
            return Some(absolute.to_owned());
        }
        let rest = target.trim_start_matches('~');
        let up = target.len() - rest.len();
        let base = self.blocks.len().checked_sub(up)?;
        let mut parts: Vec<&str> = self.blocks[..base].iter().map(String::as_str).collect();
        parts.push(rest);
        Some(parts.join(&PATH_SEPARATOR.to_string()))
    }

    /// Reference text for parameter `name` of the innermost function declaring it.
    pub fn reference(&self, name: &str) -> Option<String> {
        self.functions.iter().rev().find_map(|f| {
            f.params
                .iter()
                .position(|p| p == name)
                .map(|index| argument_reference(f.id, index))
        })
    }

    /// Rewrites `%param%` occurrences in `text` into argument references.
    ///
    /// Outside function bodies the text is returned unchanged. `%%` is a literal
    /// percent sign. On failure the offending parameter name is returned.
    pub fn interpolate(&self, text: &str) -> Result<String, String> {
        if !self.in_function() {
            return Ok(text.to_owned());
        }
        let mut out = String::with_capacity(text.len());
        let mut substituted = false;
        let mut rest = text;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                return Err(after.to_owned());
            };
            let name = &after[..end];
            if name.is_empty() {
                out.push('%');
            } else {
                out.push_str(&self.reference(name).ok_or_else(|| name.to_owned())?);
                out.push(SUBSTITUTE_MARKER);
                substituted = true;
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        if substituted {
            out.insert(0, INTERPOLATE_MARKER);
        }
        Ok(out)
    }
}
