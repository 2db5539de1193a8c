use crate::error::Span;
use std::collections::{HashMap, HashSet};

/// A flattened rule: nesting has already been folded into `selector`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub selector: String,
    pub items: Vec<Item>,
    pub span: Span,
}

/// One entry of a rule or fragment body, kept in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Declaration(Declaration),
    Extend { target: String, span: Span },
    Include {
        name: String,
        args: Vec<String>,
        span: Span,
    },
    Breakpoint(BreakpointBlock),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointBlock {
    pub condition: Condition,
    pub items: Vec<Item>,
}

/// Gate on the viewport width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `@include media-breakpoint-up(md)`, looked up in the breakpoint registry.
    Named(String),
    /// `@media (min-width: 768px)`
    MinWidth(u32),
}

#[derive(Debug, Clone)]
pub struct Mixin {
    pub name: String,
    pub params: Vec<Param>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<String>,
}

impl Mixin {
    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

#[derive(Debug, Default)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
    /// `%name { ... }` bodies, keyed without the leading `%`.
    pub placeholders: HashMap<String, Vec<Item>>,
    pub mixins: HashMap<String, Mixin>,
    pub variables: HashMap<String, String>,
    /// Variables that so far were only assigned with `!default`.
    pub defaulted: HashSet<String>,
}

impl Stylesheet {
    /// Appends `other` as a later layer: its rules come after ours and its
    /// definitions replace ours on name collisions. A `!default` variable in
    /// `other` only fills in names we do not define yet.
    pub fn extend_layer(&mut self, other: Stylesheet) {
        self.rules.extend(other.rules);
        self.placeholders.extend(other.placeholders);
        self.mixins.extend(other.mixins);

        for (name, value) in other.variables {
            if other.defaulted.contains(&name) {
                if !self.variables.contains_key(&name) {
                    self.defaulted.insert(name.clone());
                    self.variables.insert(name, value);
                }
            } else {
                self.defaulted.remove(&name);
                self.variables.insert(name, value);
            }
        }
    }
}
