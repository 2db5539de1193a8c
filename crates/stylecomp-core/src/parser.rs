use crate::ast::{BreakpointBlock, Condition, Declaration, Item, Mixin, Param, Rule, Stylesheet};
use crate::error::{ComposeError, Result, Span};
use tracing::debug;

const BREAKPOINT_MIXIN: &str = "media-breakpoint-up";

/// Where a block body sits; decides which statements are legal in it.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    /// A breakpoint block at the top level: only rules inside.
    TopGate,
    /// A selector rule body.
    Rule,
    /// A placeholder or mixin body: no nested selectors.
    Fragment,
}

pub fn parse(input: &str) -> Result<Stylesheet> {
    let cleaned = strip_comments(input);
    let mut parser = Parser::new(&cleaned);
    let mut sheet = Stylesheet::default();
    parser.parse_top_level(&mut sheet)?;

    debug!(
        rules = sheet.rules.len(),
        placeholders = sheet.placeholders.len(),
        mixins = sheet.mixins.len(),
        variables = sheet.variables.len(),
        "parsed stylesheet"
    );
    Ok(sheet)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        if self.eat(expected) {
            Ok(())
        } else {
            let found = self
                .peek()
                .map_or_else(|| "end of input".to_string(), |c| format!("'{c}'"));
            Err(ComposeError::parse(
                self.span(),
                format!("expected '{expected}', found {found}"),
            ))
        }
    }

    fn read_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                out.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    /// Reads up to the next `;`, `{` or `}` outside of quotes and brackets.
    /// `;` and `{` are consumed, `}` is left for the caller.
    fn read_until_terminator(&mut self) -> Result<(String, Option<char>)> {
        let start = self.span();
        let mut out = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        while let Some(ch) = self.peek() {
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
                self.bump();
                continue;
            }
            match ch {
                '"' | '\'' => quote = Some(ch),
                '(' | '[' => depth += 1,
                ')' | ']' => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        ComposeError::parse(self.span(), format!("unbalanced '{ch}'"))
                    })?;
                }
                ';' | '{' if depth == 0 => {
                    self.bump();
                    return Ok((out.trim().to_string(), Some(ch)));
                }
                '}' if depth == 0 => return Ok((out.trim().to_string(), Some('}'))),
                _ => {}
            }
            out.push(ch);
            self.bump();
        }

        if quote.is_some() || depth > 0 {
            return Err(ComposeError::parse(start, "unterminated string or bracket"));
        }
        Ok((out.trim().to_string(), None))
    }

    /// Reads a parenthesised group starting at `(` and returns its inner text.
    fn read_parens(&mut self) -> Result<String> {
        let start = self.span();
        self.expect('(')?;
        let mut out = String::new();
        let mut depth = 1usize;
        let mut quote: Option<char> = None;

        while let Some(ch) = self.bump() {
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
                continue;
            }
            match ch {
                '"' | '\'' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out.trim().to_string());
                    }
                }
                _ => {}
            }
            out.push(ch);
        }
        Err(ComposeError::parse(start, "unterminated '('"))
    }

    fn parse_top_level(&mut self, sheet: &mut Stylesheet) -> Result<()> {
        loop {
            self.skip_ws();
            let span = self.span();
            let Some(ch) = self.peek() else {
                return Ok(());
            };

            match ch {
                '}' => return Err(ComposeError::parse(span, "unexpected '}'")),
                '$' => self.parse_variable(sheet)?,
                '%' => {
                    self.bump();
                    let name = self.read_ident();
                    if name.is_empty() {
                        return Err(ComposeError::parse(span, "missing placeholder name"));
                    }
                    self.expect('{')?;
                    let items =
                        self.parse_block(&[], &[], Context::Fragment, &mut sheet.rules)?;
                    sheet.placeholders.insert(name, items);
                }
                '@' => self.parse_top_at_rule(span, sheet)?,
                _ => {
                    let (head, term) = self.read_until_terminator()?;
                    if term != Some('{') {
                        return Err(ComposeError::parse(
                            span,
                            format!("declaration '{head}' outside of a rule"),
                        ));
                    }
                    let selectors = split_selector_terms(&head);
                    if selectors.is_empty() {
                        return Err(ComposeError::parse(span, "missing selector before '{'"));
                    }
                    self.parse_rule(&selectors, &[], span, &mut sheet.rules)?;
                }
            }
        }
    }

    fn parse_variable(&mut self, sheet: &mut Stylesheet) -> Result<()> {
        let span = self.span();
        self.bump();
        let name = self.read_ident();
        if name.is_empty() {
            return Err(ComposeError::parse(span, "missing variable name"));
        }
        self.expect(':')?;
        let (value, term) = self.read_until_terminator()?;
        if term != Some(';') {
            return Err(ComposeError::parse(
                span,
                format!("variable '${name}' must end with ';'"),
            ));
        }

        if let Some(value) = value.strip_suffix("!default") {
            if !sheet.variables.contains_key(&name) {
                sheet.defaulted.insert(name.clone());
                sheet.variables.insert(name, value.trim().to_string());
            }
        } else {
            sheet.defaulted.remove(&name);
            sheet.variables.insert(name, value);
        }
        Ok(())
    }

    fn parse_top_at_rule(&mut self, span: Span, sheet: &mut Stylesheet) -> Result<()> {
        self.bump();
        let keyword = self.read_ident();
        match keyword.as_str() {
            "mixin" => {
                self.skip_ws();
                let name = self.read_ident();
                if name.is_empty() {
                    return Err(ComposeError::parse(span, "missing mixin name"));
                }
                self.skip_ws();
                let params = if self.peek() == Some('(') {
                    parse_params(&self.read_parens()?, span)?
                } else {
                    Vec::new()
                };
                self.expect('{')?;
                let items = self.parse_block(&[], &[], Context::Fragment, &mut sheet.rules)?;
                sheet.mixins.insert(
                    name.clone(),
                    Mixin {
                        name,
                        params,
                        items,
                    },
                );
                Ok(())
            }
            "media" | "include" => {
                let condition = self.parse_gate_header(&keyword, span)?;
                self.parse_block(&[], &[condition], Context::TopGate, &mut sheet.rules)?;
                Ok(())
            }
            "charset" => {
                self.read_until_terminator()?;
                Ok(())
            }
            "import" => Err(ComposeError::parse(
                span,
                "@import must be inlined with the loader before parsing",
            )),
            other => Err(ComposeError::parse(
                span,
                format!("unsupported at-rule '@{other}' at the top level"),
            )),
        }
    }

    /// Parses the header of a gated block after `@media` or `@include`,
    /// through the opening `{`.
    fn parse_gate_header(&mut self, keyword: &str, span: Span) -> Result<Condition> {
        if keyword == "media" {
            let (prelude, term) = self.read_until_terminator()?;
            if term != Some('{') {
                return Err(ComposeError::parse(span, "@media requires a block"));
            }
            return parse_media_prelude(&prelude, span);
        }

        self.skip_ws();
        let name = self.read_ident();
        if name != BREAKPOINT_MIXIN {
            return Err(ComposeError::parse(
                span,
                format!("@include {name} cannot take a content block"),
            ));
        }
        self.skip_ws();
        let args = split_args(&self.read_parens()?);
        self.expect('{')?;
        match args.as_slice() {
            [breakpoint] => Ok(Condition::Named(breakpoint.clone())),
            _ => Err(ComposeError::parse(
                span,
                format!("{BREAKPOINT_MIXIN} takes exactly one breakpoint name"),
            )),
        }
    }

    fn parse_rule(
        &mut self,
        selectors: &[String],
        gates: &[Condition],
        span: Span,
        rules: &mut Vec<Rule>,
    ) -> Result<()> {
        // Reserve the slots first so a rule precedes its nested rules.
        let slots: Vec<usize> = selectors
            .iter()
            .map(|selector| {
                rules.push(Rule {
                    selector: selector.clone(),
                    items: Vec::new(),
                    span,
                });
                rules.len() - 1
            })
            .collect();

        let items = wrap_in_gates(
            self.parse_block(selectors, gates, Context::Rule, rules)?,
            gates,
        );
        for slot in slots {
            rules[slot].items = items.clone();
        }
        Ok(())
    }

    /// Parses statements up to and including the closing `}` and returns
    /// the items that belong to the enclosing rule or fragment. Nested rules
    /// are pushed onto `rules`.
    fn parse_block(
        &mut self,
        parents: &[String],
        gates: &[Condition],
        context: Context,
        rules: &mut Vec<Rule>,
    ) -> Result<Vec<Item>> {
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            let span = self.span();
            let Some(ch) = self.peek() else {
                return Err(ComposeError::parse(span, "unexpected end of input, expected '}'"));
            };

            match ch {
                '}' => {
                    self.bump();
                    return Ok(items);
                }
                ';' => {
                    self.bump();
                }
                '$' => {
                    return Err(ComposeError::parse(
                        span,
                        "variables are only supported at the top level",
                    ));
                }
                '@' => {
                    self.bump();
                    let keyword = self.read_ident();
                    match keyword.as_str() {
                        "extend" => {
                            let (target, term) = self.read_until_terminator()?;
                            if term == Some('{') || target.is_empty() {
                                return Err(ComposeError::parse(span, "malformed @extend"));
                            }
                            self.require_declarations(context, span)?;
                            let target = target.trim_end_matches("!optional").trim().to_string();
                            items.push(Item::Extend { target, span });
                        }
                        "include" if !self.include_has_block() => {
                            self.skip_ws();
                            let name = self.read_ident();
                            if name.is_empty() || name == BREAKPOINT_MIXIN {
                                return Err(ComposeError::parse(span, "malformed @include"));
                            }
                            self.skip_ws();
                            let args = if self.peek() == Some('(') {
                                split_args(&self.read_parens()?)
                            } else {
                                Vec::new()
                            };
                            self.skip_ws();
                            if !self.eat(';') && self.peek() != Some('}') {
                                return Err(ComposeError::parse(
                                    span,
                                    format!("expected ';' after @include {name}"),
                                ));
                            }
                            self.require_declarations(context, span)?;
                            items.push(Item::Include { name, args, span });
                        }
                        "include" | "media" => {
                            let condition = self.parse_gate_header(&keyword, span)?;
                            let mut inner_gates = gates.to_vec();
                            inner_gates.push(condition.clone());
                            let inner = self.parse_block(parents, &inner_gates, context, rules)?;
                            if !inner.is_empty() {
                                items.push(Item::Breakpoint(BreakpointBlock {
                                    condition,
                                    items: inner,
                                }));
                            }
                        }
                        other => {
                            return Err(ComposeError::parse(
                                span,
                                format!("unsupported at-rule '@{other}' inside a block"),
                            ));
                        }
                    }
                }
                _ => {
                    let (head, term) = self.read_until_terminator()?;
                    if head.is_empty() {
                        if term == Some('{') {
                            return Err(ComposeError::parse(span, "missing selector before '{'"));
                        }
                        continue;
                    }

                    if term == Some('{') {
                        if context == Context::Fragment {
                            return Err(ComposeError::parse(
                                span,
                                format!("nested selector '{head}' is not allowed in a mixin or placeholder"),
                            ));
                        }
                        let nested = if parents.is_empty() {
                            split_selector_terms(&head)
                        } else {
                            combine_selectors(parents, &head)
                        };
                        self.parse_rule(&nested, gates, span, rules)?;
                        continue;
                    }

                    self.require_declarations(context, span)?;
                    items.push(Item::Declaration(parse_declaration(&head, span)?));
                }
            }
        }
    }

    fn require_declarations(&self, context: Context, span: Span) -> Result<()> {
        if context == Context::TopGate {
            Err(ComposeError::parse(span, "declarations must be inside a rule"))
        } else {
            Ok(())
        }
    }

    /// Looks ahead after `@include` to see whether the statement opens a block.
    fn include_has_block(&self) -> bool {
        let mut depth = 0usize;
        for &ch in &self.chars[self.pos..] {
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                '{' if depth == 0 => return true,
                ';' | '}' if depth == 0 => return false,
                _ => {}
            }
        }
        false
    }
}

fn parse_declaration(head: &str, span: Span) -> Result<Declaration> {
    let (property, value) = head
        .split_once(':')
        .ok_or_else(|| ComposeError::parse(span, format!("invalid declaration '{head}'")))?;
    let property = property.trim();
    let value = value.trim();
    if property.is_empty() || value.is_empty() {
        return Err(ComposeError::parse(span, format!("invalid declaration '{head}'")));
    }
    Ok(Declaration {
        property: property.to_string(),
        value: value.to_string(),
        span,
    })
}

fn parse_params(inner: &str, span: Span) -> Result<Vec<Param>> {
    split_args(inner)
        .into_iter()
        .map(|raw| {
            let (name, default) = match raw.split_once(':') {
                Some((name, default)) => (name.trim(), Some(default.trim().to_string())),
                None => (raw.as_str(), None),
            };
            let name = name.strip_prefix('$').ok_or_else(|| {
                ComposeError::parse(span, format!("mixin parameter '{name}' must start with '$'"))
            })?;
            Ok(Param {
                name: name.to_string(),
                default,
            })
        })
        .collect()
}

fn parse_media_prelude(prelude: &str, span: Span) -> Result<Condition> {
    let unsupported = || {
        ComposeError::parse(
            span,
            format!("only (min-width: <n>px) media queries are supported, got '{prelude}'"),
        )
    };

    let query = prelude.trim();
    let query = match query.strip_prefix("screen") {
        Some(rest) => rest
            .trim_start()
            .strip_prefix("and")
            .ok_or_else(unsupported)?
            .trim_start(),
        None => query,
    };
    let feature = query
        .strip_prefix('(')
        .and_then(|q| q.strip_suffix(')'))
        .ok_or_else(unsupported)?;
    let (name, value) = feature.split_once(':').ok_or_else(unsupported)?;
    if name.trim() != "min-width" {
        return Err(unsupported());
    }

    let digits = value.trim().strip_suffix("px").ok_or_else(unsupported)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unsupported());
    }
    digits
        .parse()
        .map(Condition::MinWidth)
        .map_err(|_| unsupported())
}

fn wrap_in_gates(items: Vec<Item>, gates: &[Condition]) -> Vec<Item> {
    if items.is_empty() {
        return items;
    }
    gates.iter().rev().fold(items, |items, condition| {
        vec![Item::Breakpoint(BreakpointBlock {
            condition: condition.clone(),
            items,
        })]
    })
}

/// Splits on top-level commas, keeping commas inside parentheses or quotes.
pub(crate) fn split_args(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

fn split_selector_terms(selector: &str) -> Vec<String> {
    split_args(selector)
        .iter()
        .map(|term| term.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|term| !term.is_empty())
        .collect()
}

fn combine_selectors(parent_terms: &[String], header: &str) -> Vec<String> {
    let child_terms = split_selector_terms(header);
    let mut results = Vec::new();

    for parent in parent_terms {
        for child in &child_terms {
            if child.contains('&') {
                results.push(child.replace('&', parent));
            } else {
                results.push(format!("{parent} {child}"));
            }
        }
    }

    results
}

/// Blanks out `//` and `/* */` comments, keeping newlines so spans stay put.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;
    let mut parens = 0usize;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            out.push(ch);
            continue;
        }

        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("  ");
                // `prev` starts past the opening `*` so `/*/` does not close.
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    out.push(if inner == '\n' { '\n' } else { ' ' });
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                continue;
            }
            '/' if parens == 0 && chars.peek() == Some(&'/') => {
                out.push(' ');
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                    out.push(' ');
                }
                continue;
            }
            _ => {}
        }
        out.push(ch);
    }
    out
}
