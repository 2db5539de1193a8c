//! Cascade resolution over a fully expanded stylesheet.
//!
//! All validation happens in [`Composer::new`]. Once built, a composer only
//! answers read-only queries: [`Composer::resolve`] gives the property map a
//! selector receives at a viewport width.

use crate::ast::Stylesheet;
use crate::error::Result;
use crate::expand::Expander;
use crate::selector::{Selector, Specificity, parse_selector};
use crate::theme::Theme;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// One flattened `(selector, min-width, property, value)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDeclaration {
    pub min_width: Option<u32>,
    pub property: String,
    pub value: String,
}

impl ComposedDeclaration {
    pub fn applies_at(&self, width: u32) -> bool {
        self.min_width.is_none_or(|threshold| threshold <= width)
    }
}

#[derive(Debug, Clone)]
pub struct ComposedRule {
    pub selector: String,
    /// `None` when the selector is outside the matching grammar. Such rules
    /// are still emitted but never match a query.
    pub parsed: Option<Selector>,
    /// Position in the source; breaks specificity ties.
    pub order: usize,
    pub declarations: Vec<ComposedDeclaration>,
}

impl ComposedRule {
    pub fn specificity(&self) -> Specificity {
        self.parsed.as_ref().map(|s| s.specificity).unwrap_or_default()
    }
}

/// The declarations in effect for one breakpoint bucket, already filtered.
#[derive(Debug)]
pub struct Snapshot {
    /// Smallest width that falls in this bucket.
    pub floor: u32,
    /// Sorted by `(specificity, order)`.
    rules: Vec<SnapshotRule>,
}

#[derive(Debug)]
struct SnapshotRule {
    selector: Selector,
    declarations: Vec<(String, String)>,
}

impl Snapshot {
    /// Cascade the rules matching `query`; later entries override earlier ones.
    pub fn resolve(&self, query: &Selector) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for rule in self.rules.iter().filter(|r| r.selector.matches(query)) {
            trace!(rule = ?rule.selector.specificity, "matched");
            for (property, value) in &rule.declarations {
                out.insert(property.clone(), value.clone());
            }
        }
        out
    }
}

pub struct Composer {
    rules: Vec<ComposedRule>,
    /// Distinct thresholds in ascending order; bucket `i + 1` starts at `thresholds[i]`.
    thresholds: Vec<u32>,
    snapshots: Vec<OnceLock<Arc<Snapshot>>>,
}

impl Composer {
    /// Validate and expand `sheet`. Every configuration error surfaces here.
    pub fn new(sheet: &Stylesheet, theme: &Theme) -> Result<Self> {
        let expander = Expander::new(sheet, theme);
        expander.validate()?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(sheet.rules.len());
        for (order, rule) in sheet.rules.iter().enumerate() {
            let declarations: Vec<ComposedDeclaration> = expander
                .expand_rule(rule)?
                .into_iter()
                .map(|e| ComposedDeclaration {
                    min_width: e.min_width,
                    property: e.property,
                    value: e.value,
                })
                .collect();

            if !declarations.is_empty() && !seen.insert(rule.selector.as_str()) {
                warn!(
                    selector = %rule.selector,
                    line = rule.span.line,
                    "selector declared again; later declarations override earlier ones"
                );
            }

            let parsed = parse_selector(&rule.selector);
            if parsed.is_none() {
                debug!(selector = %rule.selector, "selector cannot be matched against queries");
            }
            rules.push(ComposedRule {
                selector: rule.selector.clone(),
                parsed,
                order,
                declarations,
            });
        }

        let thresholds: Vec<u32> = rules
            .iter()
            .flat_map(|r| &r.declarations)
            .filter_map(|d| d.min_width)
            .filter(|&w| w > 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(
            rules = rules.len(),
            buckets = thresholds.len() + 1,
            "composed stylesheet"
        );

        let snapshots = (0..=thresholds.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            rules,
            thresholds,
            snapshots,
        })
    }

    /// Parse, expand and compose in one step.
    pub fn from_source(source: &str, theme: &Theme) -> Result<Self> {
        let sheet = crate::parser::parse(source)?;
        Self::new(&sheet, theme)
    }

    /// The property map `selector` receives at `width`. A selector that no
    /// rule matches, or that cannot be parsed, gets an empty map.
    pub fn resolve(&self, selector: &str, width: u32) -> BTreeMap<String, String> {
        let Some(query) = parse_selector(selector) else {
            debug!(selector, "unparseable query selector");
            return BTreeMap::new();
        };
        self.snapshot(width).resolve(&query)
    }

    /// The write-once view for the bucket containing `width`. Shared freely
    /// between threads.
    pub fn snapshot(&self, width: u32) -> Arc<Snapshot> {
        let bucket = self.thresholds.partition_point(|&t| t <= width);
        let snapshot = self.snapshots[bucket].get_or_init(|| {
            let floor = if bucket == 0 { 0 } else { self.thresholds[bucket - 1] };
            debug!(bucket, floor, "building breakpoint snapshot");
            Arc::new(self.build_snapshot(floor))
        });
        Arc::clone(snapshot)
    }

    fn build_snapshot(&self, width: u32) -> Snapshot {
        let mut matched: Vec<&ComposedRule> = self
            .rules
            .iter()
            .filter(|r| r.parsed.is_some())
            .collect();
        // Stable sort keeps source order inside equal specificity.
        matched.sort_by_key(|r| (r.specificity(), r.order));

        let rules = matched
            .into_iter()
            .filter_map(|rule| {
                let declarations: Vec<(String, String)> = rule
                    .declarations
                    .iter()
                    .filter(|d| d.applies_at(width))
                    .map(|d| (d.property.clone(), d.value.clone()))
                    .collect();
                let selector = rule.parsed.clone()?;
                (!declarations.is_empty()).then_some(SnapshotRule {
                    selector,
                    declarations,
                })
            })
            .collect();

        Snapshot { floor: width, rules }
    }

    pub fn rules(&self) -> &[ComposedRule] {
        &self.rules
    }

    /// Every flattened declaration with its selector, in source order.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, &ComposedDeclaration)> {
        self.rules
            .iter()
            .flat_map(|r| r.declarations.iter().map(move |d| (r.selector.as_str(), d)))
    }

    /// Distinct breakpoint thresholds used by any declaration, ascending.
    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(src: &str) -> Composer {
        Composer::from_source(src, &Theme::default()).expect("compose")
    }

    #[test]
    fn later_declaration_wins_at_equal_specificity() {
        let composer = compose(".a { color: red; } .a { color: blue; margin: 0; }");
        let styles = composer.resolve(".a", 0);
        assert_eq!(styles["color"], "blue");
        assert_eq!(styles["margin"], "0");
    }

    #[test]
    fn specificity_beats_source_order() {
        let composer = compose("#main.a { color: red; } .a { color: blue; }");
        assert_eq!(composer.resolve("#main.a", 0)["color"], "red");
        assert_eq!(composer.resolve(".a", 0)["color"], "blue");
    }

    #[test]
    fn gates_open_at_their_threshold() {
        let composer = compose(
            ".a { width: 100%; @include media-breakpoint-up(md) { width: 50%; } }",
        );
        assert_eq!(composer.resolve(".a", 767)["width"], "100%");
        assert_eq!(composer.resolve(".a", 768)["width"], "50%");
        assert_eq!(composer.thresholds(), [768]);
    }

    #[test]
    fn snapshots_are_shared_per_bucket() {
        let composer = compose(".a { @media (min-width: 600px) { top: 0; } }");
        let first = composer.snapshot(700);
        let second = composer.snapshot(1000);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.floor, 600);
        assert!(!Arc::ptr_eq(&first, &composer.snapshot(599)));
    }

    #[test]
    fn unknown_or_unparseable_queries_are_empty() {
        let composer = compose(".a { top: 0; }");
        assert!(composer.resolve(".nothing", 1000).is_empty());
        assert!(composer.resolve(">>", 1000).is_empty());
    }

    #[test]
    fn declarations_are_flattened_in_source_order() {
        let composer = compose(".a { top: 0; .b { left: 0; } }");
        let flat: Vec<_> = composer
            .declarations()
            .map(|(selector, d)| (selector, d.property.as_str()))
            .collect();
        assert_eq!(flat, [(".a", "top"), (".a .b", "left")]);
    }

    #[test]
    fn composer_is_shareable_across_threads() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<Composer>();
    }
}
