//! Utility expansion: `@extend` and `@include` are replaced by the items of
//! the fragment they name, recursively, and breakpoint blocks are turned into
//! pixel thresholds.

use crate::ast::{Condition, Item, Mixin, Rule, Stylesheet};
use crate::error::{ComposeError, Result, Span};
use crate::resolver::{Locals, ValueResolver};
use crate::theme::Theme;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A declaration with every reference resolved, ready for the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    pub min_width: Option<u32>,
    pub property: String,
    pub value: String,
    pub span: Span,
}

/// Names a fragment in cycle reports: `%sr-only`, `make-col()`, `.btn`.
fn mixin_id(name: &str) -> String {
    format!("{name}()")
}

pub struct Expander<'a> {
    sheet: &'a Stylesheet,
    theme: &'a Theme,
    values: ValueResolver<'a>,
    /// Rules reachable through `@extend <selector>`, in source order.
    by_selector: HashMap<&'a str, Vec<&'a Rule>>,
}

impl<'a> Expander<'a> {
    pub fn new(sheet: &'a Stylesheet, theme: &'a Theme) -> Self {
        let mut by_selector: HashMap<&str, Vec<&Rule>> = HashMap::new();
        for rule in &sheet.rules {
            by_selector.entry(rule.selector.as_str()).or_default().push(rule);
        }
        Self {
            sheet,
            theme,
            values: ValueResolver::new(theme, &sheet.variables),
            by_selector,
        }
    }

    /// Checks the whole sheet for unknown utilities, extension cycles and
    /// unknown breakpoints, including fragments no rule uses.
    pub fn validate(&self) -> Result<()> {
        let mut done = HashSet::new();
        let mut stack = Vec::new();

        for rule in &self.sheet.rules {
            self.visit_selector(&rule.selector, &rule.selector, &mut stack, &mut done)?;
        }

        let mut roots: Vec<(String, &[Item])> = Vec::new();
        for (name, items) in &self.sheet.placeholders {
            roots.push((format!("%{name}"), items.as_slice()));
        }
        for (name, mixin) in &self.sheet.mixins {
            roots.push((mixin_id(name), mixin.items.as_slice()));
        }
        // HashMap order is arbitrary; sort so the reported cycle is stable.
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, items) in roots {
            self.visit(&id, &[items], &mut stack, &mut done)?;
        }
        Ok(())
    }

    /// Depth-first walk over the reference graph. A node is one fragment or
    /// every rule sharing a selector.
    fn visit(
        &self,
        id: &str,
        bodies: &[&[Item]],
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<()> {
        if let Some(pos) = stack.iter().position(|s| s == id) {
            let mut path = stack[pos..].to_vec();
            path.push(id.to_string());
            return Err(ComposeError::CyclicExtension { path });
        }
        if done.contains(id) {
            return Ok(());
        }

        stack.push(id.to_string());
        for items in bodies {
            self.visit_items(id, items, stack, done)?;
        }
        stack.pop();
        done.insert(id.to_string());
        Ok(())
    }

    fn visit_selector(
        &self,
        selector: &str,
        from: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<()> {
        let bodies: Vec<&[Item]> = self
            .extended_rules(selector, from)?
            .iter()
            .map(|rule| rule.items.as_slice())
            .collect();
        self.visit(selector, &bodies, stack, done)
    }

    fn visit_items(
        &self,
        id: &str,
        items: &[Item],
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<()> {
        for item in items {
            match item {
                Item::Declaration(_) => {}
                Item::Breakpoint(block) => {
                    self.threshold(&block.condition, id)?;
                    self.visit_items(id, &block.items, stack, done)?;
                }
                Item::Extend { target, .. } => {
                    if let Some(name) = target.strip_prefix('%') {
                        let items = self.placeholder(name, id)?;
                        self.visit(target, &[items], stack, done)?;
                    } else {
                        self.visit_selector(target, id, stack, done)?;
                    }
                }
                Item::Include { name, .. } => {
                    let mixin = self.mixin(name, id)?;
                    self.visit(&mixin_id(name), &[mixin.items.as_slice()], stack, done)?;
                }
            }
        }
        Ok(())
    }

    /// Expands one rule into its resolved declarations, in item order.
    pub fn expand_rule(&self, rule: &Rule) -> Result<Vec<Expanded>> {
        let mut out = Vec::new();
        let mut chain = vec![rule.selector.clone()];
        self.expand_items(&rule.items, None, &Locals::new(), &mut chain, &mut out)?;
        debug!(
            selector = %rule.selector,
            declarations = out.len(),
            "expanded rule"
        );
        Ok(out)
    }

    fn expand_items(
        &self,
        items: &[Item],
        gate: Option<u32>,
        locals: &Locals,
        chain: &mut Vec<String>,
        out: &mut Vec<Expanded>,
    ) -> Result<()> {
        let from = chain.last().cloned().unwrap_or_default();

        for item in items {
            match item {
                Item::Declaration(decl) => {
                    let value = self.values.resolve(&decl.property, &decl.value, locals, &from)?;
                    out.push(Expanded {
                        min_width: gate,
                        property: decl.property.clone(),
                        value,
                        span: decl.span,
                    });
                }
                Item::Breakpoint(block) => {
                    let threshold = self.threshold(&block.condition, &from)?;
                    // Nested gates must all hold, so the widest one wins.
                    let combined = gate.map_or(threshold, |outer| outer.max(threshold));
                    self.expand_items(&block.items, Some(combined), locals, chain, out)?;
                }
                Item::Extend { target, .. } => {
                    enter(chain, target)?;
                    trace!(from = %from, target = %target, "extending");
                    if let Some(name) = target.strip_prefix('%') {
                        let items = self.placeholder(name, &from)?;
                        self.expand_items(items, gate, &Locals::new(), chain, out)?;
                    } else {
                        for rule in self.extended_rules(target, &from)? {
                            self.expand_items(&rule.items, gate, &Locals::new(), chain, out)?;
                        }
                    }
                    chain.pop();
                }
                Item::Include { name, args, .. } => {
                    let mixin = self.mixin(name, &from)?;
                    if args.len() < mixin.required_params() || args.len() > mixin.params.len() {
                        return Err(ComposeError::MixinArity {
                            name: name.clone(),
                            expected: mixin.params.len(),
                            got: args.len(),
                        });
                    }

                    let mut bound = Locals::new();
                    for (idx, param) in mixin.params.iter().enumerate() {
                        let value = match args.get(idx) {
                            Some(arg) => self.values.resolve("", arg, locals, &from)?,
                            None => {
                                let default = param.default.as_deref().unwrap_or_default();
                                self.values.resolve("", default, &bound, &from)?
                            }
                        };
                        bound.insert(param.name.clone(), value);
                    }

                    let id = mixin_id(name);
                    enter(chain, &id)?;
                    trace!(from = %from, mixin = %name, "including");
                    self.expand_items(&mixin.items, gate, &bound, chain, out)?;
                    chain.pop();
                }
            }
        }
        Ok(())
    }

    fn threshold(&self, condition: &Condition, from: &str) -> Result<u32> {
        match condition {
            Condition::MinWidth(width) => Ok(*width),
            Condition::Named(name) => {
                self.theme
                    .breakpoint(name)
                    .ok_or_else(|| ComposeError::UnknownBreakpoint {
                        name: name.clone(),
                        from: from.to_string(),
                    })
            }
        }
    }

    fn mixin(&self, name: &str, from: &str) -> Result<&'a Mixin> {
        self.sheet
            .mixins
            .get(name)
            .ok_or_else(|| ComposeError::UnknownUtility {
                name: mixin_id(name),
                from: from.to_string(),
            })
    }

    fn placeholder(&self, name: &str, from: &str) -> Result<&'a [Item]> {
        self.sheet
            .placeholders
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ComposeError::UnknownUtility {
                name: format!("%{name}"),
                from: from.to_string(),
            })
    }

    fn extended_rules(&self, selector: &str, from: &str) -> Result<&[&'a Rule]> {
        self.by_selector
            .get(selector)
            .map(Vec::as_slice)
            .ok_or_else(|| ComposeError::UnknownUtility {
                name: selector.to_string(),
                from: from.to_string(),
            })
    }
}

fn enter(chain: &mut Vec<String>, id: &str) -> Result<()> {
    if let Some(pos) = chain.iter().position(|s| s == id) {
        let mut path = chain[pos..].to_vec();
        path.push(id.to_string());
        return Err(ComposeError::CyclicExtension { path });
    }
    chain.push(id.to_string());
    Ok(())
}
