//! Selector parsing, specificity and path matching.
//!
//! The composer has no document tree. A query selector such as
//! `.records .record-card:nth-of-type(even)` is read as the description of
//! one element and its ancestors, and a declared selector applies to it when
//! every condition the declared selector places is present in the query.

use std::fmt;

/// A single condition inside a compound selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleSelector {
    /// `*`
    Universal,
    /// `div`, `footer`, `a`
    Type(String),
    /// `.record-card`
    Class(String),
    /// `#main`
    Id(String),
    /// `[id="skip"]`, `[hidden]`. Quotes around the value are dropped.
    Attribute { name: String, value: Option<String> },
    /// `:hover`, `:nth-of-type(even)`
    PseudoClass {
        name: String,
        argument: Option<String>,
    },
    /// `::before`
    PseudoElement(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Compound {
    pub simple: Vec<SimpleSelector>,
}

impl Compound {
    /// True when every condition of `self` is also stated by `other`.
    fn is_satisfied_by(&self, other: &Self) -> bool {
        self.simple.iter().all(|simple| match simple {
            SimpleSelector::Universal => true,
            _ => other.simple.contains(simple),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// whitespace
    Descendant,
    /// `>`
    Child,
    /// `+`
    NextSibling,
    /// `~`
    SubsequentSibling,
}

/// `(ids, classes + attributes + pseudo-classes, types + pseudo-elements)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(pub u32, pub u32, pub u32);

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0, self.1, self.2)
    }
}

/// A complex selector. `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub compounds: Vec<Compound>,
    pub combinators: Vec<Combinator>,
    pub specificity: Specificity,
}

impl Selector {
    /// Whether the element described by `query` is styled by `self`.
    pub fn matches(&self, query: &Self) -> bool {
        let (Some(last), Some(query_last)) = (self.compounds.last(), query.compounds.last()) else {
            return false;
        };
        if !last.is_satisfied_by(query_last) {
            return false;
        }
        self.match_ancestors(self.compounds.len() - 1, query, query.compounds.len() - 1)
    }

    /// `rule_idx` has been matched against `query_idx`; match what lies left of them.
    fn match_ancestors(&self, rule_idx: usize, query: &Self, query_idx: usize) -> bool {
        if rule_idx == 0 {
            return true;
        }
        let combinator = self.combinators[rule_idx - 1];
        let wanted = &self.compounds[rule_idx - 1];

        match combinator {
            Combinator::Descendant => {
                // Walk up through ancestors only; siblings are not ancestors.
                let mut idx = query_idx;
                while idx > 0 {
                    let link = query.combinators[idx - 1];
                    if matches!(link, Combinator::NextSibling | Combinator::SubsequentSibling) {
                        idx -= 1;
                        continue;
                    }
                    idx -= 1;
                    if wanted.is_satisfied_by(&query.compounds[idx])
                        && self.match_ancestors(rule_idx - 1, query, idx)
                    {
                        return true;
                    }
                }
                false
            }
            Combinator::Child => {
                // A descendant link in the query does not say the parent is direct.
                query_idx > 0
                    && query.combinators[query_idx - 1] == Combinator::Child
                    && wanted.is_satisfied_by(&query.compounds[query_idx - 1])
                    && self.match_ancestors(rule_idx - 1, query, query_idx - 1)
            }
            sibling => {
                query_idx > 0
                    && query.combinators[query_idx - 1] == sibling
                    && wanted.is_satisfied_by(&query.compounds[query_idx - 1])
                    && self.match_ancestors(rule_idx - 1, query, query_idx - 1)
            }
        }
    }
}

/// Parse a selector. Returns `None` for anything outside the supported grammar.
pub fn parse_selector(input: &str) -> Option<Selector> {
    let mut chars = input.trim().chars().peekable();
    let mut compounds = Vec::new();
    let mut combinators = Vec::new();
    let mut current = Compound::default();
    let mut pending: Option<Combinator> = None;

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() || c == '>' || c == '+' || c == '~' => {
                chars.next();
                let explicit = match c {
                    '>' => Some(Combinator::Child),
                    '+' => Some(Combinator::NextSibling),
                    '~' => Some(Combinator::SubsequentSibling),
                    _ => None,
                };
                if !current.simple.is_empty() {
                    compounds.push(std::mem::take(&mut current));
                    pending = Some(Combinator::Descendant);
                }
                if let Some(explicit) = explicit {
                    // A leading or doubled combinator is malformed.
                    if compounds.is_empty() || pending != Some(Combinator::Descendant) {
                        return None;
                    }
                    pending = Some(explicit);
                }
            }
            _ => {
                if let Some(combinator) = pending.take() {
                    combinators.push(combinator);
                }
                current.simple.push(parse_simple(&mut chars)?);
            }
        }
    }

    if current.simple.is_empty() {
        return None;
    }
    compounds.push(current);
    if combinators.len() + 1 != compounds.len() {
        return None;
    }

    let specificity = specificity_of(&compounds);
    Some(Selector {
        compounds,
        combinators,
        specificity,
    })
}

fn parse_simple(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<SimpleSelector> {
    match *chars.peek()? {
        '*' => {
            chars.next();
            Some(SimpleSelector::Universal)
        }
        '.' => {
            chars.next();
            non_empty(read_name(chars)).map(SimpleSelector::Class)
        }
        '#' => {
            chars.next();
            non_empty(read_name(chars)).map(SimpleSelector::Id)
        }
        '[' => {
            chars.next();
            let mut body = String::new();
            loop {
                match chars.next()? {
                    ']' => break,
                    c => body.push(c),
                }
            }
            let (name, value) = match body.split_once('=') {
                Some((name, value)) => (
                    name.trim(),
                    Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                ),
                None => (body.trim(), None),
            };
            non_empty(name.to_ascii_lowercase()).map(|name| SimpleSelector::Attribute { name, value })
        }
        ':' => {
            chars.next();
            if chars.peek() == Some(&':') {
                chars.next();
                return non_empty(read_name(chars)).map(SimpleSelector::PseudoElement);
            }
            let name = non_empty(read_name(chars))?.to_ascii_lowercase();
            let argument = if chars.peek() == Some(&'(') {
                chars.next();
                let mut depth = 1;
                let mut arg = String::new();
                loop {
                    let c = chars.next()?;
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    arg.push(c);
                }
                Some(arg.split_whitespace().collect::<Vec<_>>().join(" "))
            } else {
                None
            };
            // Legacy single-colon pseudo-elements.
            if argument.is_none()
                && matches!(
                    name.as_str(),
                    "before" | "after" | "first-line" | "first-letter"
                )
            {
                return Some(SimpleSelector::PseudoElement(name));
            }
            Some(SimpleSelector::PseudoClass { name, argument })
        }
        c if c.is_alphabetic() => {
            non_empty(read_name(chars).to_ascii_lowercase()).map(SimpleSelector::Type)
        }
        _ => None,
    }
}

fn read_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn specificity_of(compounds: &[Compound]) -> Specificity {
    let mut spec = Specificity::default();
    for simple in compounds.iter().flat_map(|c| &c.simple) {
        match simple {
            SimpleSelector::Id(_) => spec.0 += 1,
            SimpleSelector::Class(_)
            | SimpleSelector::Attribute { .. }
            | SimpleSelector::PseudoClass { .. } => spec.1 += 1,
            SimpleSelector::Type(_) | SimpleSelector::PseudoElement(_) => spec.2 += 1,
            SimpleSelector::Universal => {}
        }
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> Selector {
        parse_selector(s).unwrap_or_else(|| panic!("failed to parse '{s}'"))
    }

    #[test]
    fn parses_compounds_and_combinators() {
        let s = sel("footer.footer-app > a:hover");
        assert_eq!(s.compounds.len(), 2);
        assert_eq!(s.combinators, [Combinator::Child]);
        assert_eq!(
            s.compounds[0].simple,
            [
                SimpleSelector::Type("footer".into()),
                SimpleSelector::Class("footer-app".into())
            ]
        );
        assert_eq!(s.specificity, Specificity(0, 2, 2));
    }

    #[test]
    fn attribute_and_pseudo_arguments() {
        let s = sel("[id=\"main\"] .record-card:nth-of-type( even )");
        assert_eq!(
            s.compounds[0].simple[0],
            SimpleSelector::Attribute {
                name: "id".into(),
                value: Some("main".into())
            }
        );
        assert_eq!(
            s.compounds[1].simple[1],
            SimpleSelector::PseudoClass {
                name: "nth-of-type".into(),
                argument: Some("even".into())
            }
        );
        assert_eq!(s.specificity, Specificity(0, 3, 0));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_selector("").is_none());
        assert!(parse_selector("> .a").is_none());
        assert!(parse_selector(".a > > .b").is_none());
        assert!(parse_selector(".a >").is_none());
        assert!(parse_selector("&:hover").is_none());
        assert!(parse_selector(".").is_none());
    }

    #[test]
    fn specificity_orders_ids_over_classes_over_types() {
        assert!(sel("#a").specificity > sel(".a.b.c").specificity);
        assert!(sel(".a").specificity > sel("div p span").specificity);
        assert_eq!(sel("*").specificity, Specificity(0, 0, 0));
    }

    #[test]
    fn query_must_state_every_condition() {
        let rule = sel(".record-card");
        assert!(rule.matches(&sel(".record-card")));
        assert!(rule.matches(&sel(".record-card:nth-of-type(even)")));
        assert!(rule.matches(&sel("div.record-card.active")));
        assert!(!rule.matches(&sel(".record")));

        let even = sel(".record-card:nth-of-type(even)");
        assert!(even.matches(&sel(".record-card:nth-of-type(even)")));
        assert!(!even.matches(&sel(".record-card")));
        assert!(!even.matches(&sel(".record-card:nth-of-type(odd)")));
    }

    #[test]
    fn ancestors_follow_combinators() {
        let descendant = sel(".footer-app .footer-app-legal");
        assert!(descendant.matches(&sel(".footer-app .footer-app-legal")));
        assert!(descendant.matches(&sel(".footer-app > div > .footer-app-legal")));
        assert!(!descendant.matches(&sel(".footer-app-legal")));
        assert!(!descendant.matches(&sel(".footer-app + .footer-app-legal")));

        let child = sel(".footer-app > .link");
        assert!(child.matches(&sel(".footer-app > .link")));
        assert!(!child.matches(&sel(".footer-app div .link")));
        assert!(!child.matches(&sel(".footer-app .link")));
        assert!(sel(".footer-app .link").matches(&sel(".footer-app > .link")));

        let sibling = sel(".a + .b");
        assert!(sibling.matches(&sel(".wrap .a + .b")));
        assert!(!sibling.matches(&sel(".a ~ .b")));

        assert!(sel("*").matches(&sel("footer")));
        assert!(sel(".b").matches(&sel(".a .b")));
    }
}
