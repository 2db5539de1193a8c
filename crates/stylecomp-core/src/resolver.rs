//! Value resolution: `$variables`, `@theme` tokens and the small amount of
//! arithmetic stylesheets lean on (`$spacer * 2`, `percentage(6 / 12)`).

use crate::error::{ComposeError, Result};
use crate::theme::Theme;
use std::collections::HashMap;

/// Nested variable references deeper than this are treated as a cycle.
const MAX_VARIABLE_DEPTH: usize = 32;

/// Variables bound while expanding a mixin, shadowing the globals.
pub type Locals = HashMap<String, String>;

pub struct ValueResolver<'a> {
    theme: &'a Theme,
    globals: &'a HashMap<String, String>,
}

impl<'a> ValueResolver<'a> {
    pub fn new(theme: &'a Theme, globals: &'a HashMap<String, String>) -> Self {
        Self { theme, globals }
    }

    /// Resolve a declaration value to the literal handed to the renderer.
    /// `from` names the rule or utility being expanded, for error messages.
    pub fn resolve(
        &self,
        property: &str,
        value: &str,
        locals: &Locals,
        from: &str,
    ) -> Result<String> {
        let substituted = self.substitute_variables(value, locals, from, 0)?;
        let with_tokens = self.substitute_tokens(property, &substituted)?;
        evaluate(&with_tokens)
    }

    fn substitute_variables(
        &self,
        value: &str,
        locals: &Locals,
        from: &str,
        depth: usize,
    ) -> Result<String> {
        if depth > MAX_VARIABLE_DEPTH {
            return Err(ComposeError::Value {
                expr: value.to_string(),
                reason: "variable references nest too deeply (cycle?)".to_string(),
            });
        }
        if !value.contains('$') {
            return Ok(value.to_string());
        }
        map_unquoted(value, |run| self.substitute_variable_run(run, locals, from, depth))
    }

    fn substitute_variable_run(
        &self,
        value: &str,
        locals: &Locals,
        from: &str,
        depth: usize,
    ) -> Result<String> {
        let mut out = String::with_capacity(value.len());
        let mut chars = value.char_indices().peekable();
        while let Some((start, ch)) = chars.next() {
            if ch != '$' {
                out.push(ch);
                continue;
            }

            let mut end = start + 1;
            while let Some(&(idx, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '-' || next == '_' {
                    end = idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let name = &value[start + 1..end];
            if name.is_empty() {
                out.push('$');
                continue;
            }

            // Locals are already literal; globals may point at other globals.
            if let Some(bound) = locals.get(name) {
                out.push_str(bound);
            } else if let Some(global) = self.globals.get(name) {
                let expanded = self.substitute_variables(global, &Locals::new(), from, depth + 1)?;
                out.push_str(&expanded);
            } else {
                return Err(ComposeError::UnknownVariable {
                    name: name.to_string(),
                    from: from.to_string(),
                });
            }
        }
        Ok(out)
    }

    fn substitute_tokens(&self, property: &str, value: &str) -> Result<String> {
        if !value.contains('@') {
            return Ok(value.to_string());
        }
        map_unquoted(value, |run| self.substitute_token_run(property, run))
    }

    fn substitute_token_run(&self, property: &str, value: &str) -> Result<String> {
        let words: Vec<String> = value
            .split(' ')
            .map(|word| match word.strip_prefix('@') {
                Some(token) if !token.is_empty() => {
                    let (token, trailing) = split_trailing_comma(token);
                    resolve_token(property, token, self.theme).map(|v| format!("{v}{trailing}"))
                }
                _ => Ok(word.to_string()),
            })
            .collect::<Result<_>>()?;
        Ok(words.join(" "))
    }
}

/// Applies `f` to the parts of `value` outside string literals. Quoted runs,
/// quotes included, are copied through as written.
fn map_unquoted(value: &str, mut f: impl FnMut(&str) -> Result<String>) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut start = 0;
    let mut quote: Option<char> = None;

    for (idx, ch) in value.char_indices() {
        match quote {
            Some(q) if ch == q => {
                let end = idx + ch.len_utf8();
                out.push_str(&value[start..end]);
                start = end;
                quote = None;
            }
            Some(_) => {}
            None if ch == '"' || ch == '\'' => {
                out.push_str(&f(&value[start..idx])?);
                start = idx;
                quote = Some(ch);
            }
            None => {}
        }
    }

    match quote {
        Some(_) => out.push_str(&value[start..]),
        None => out.push_str(&f(&value[start..])?),
    }
    Ok(out)
}

fn split_trailing_comma(token: &str) -> (&str, &str) {
    match token.strip_suffix(',') {
        Some(stripped) => (stripped, ","),
        None => (token, ""),
    }
}

fn resolve_token(property: &str, token: &str, theme: &Theme) -> Result<String> {
    if let Some(value) = theme.tokens.get(token) {
        return Ok(value.clone());
    }

    if let Some((color_token, opacity_token)) = token.split_once('/') {
        return resolve_color_with_opacity(color_token, opacity_token, theme);
    }

    if is_spacing_property(property) {
        if let Some(value) = theme.spacing.get(token) {
            return Ok(value.clone());
        }
    }

    if let Ok(color) = resolve_color(token, theme) {
        return Ok(color);
    }

    if let Some(value) = theme.spacing.get(token) {
        return Ok(value.clone());
    }

    if property == "opacity" {
        if let Some(value) = theme.opacity.get(token) {
            return Ok(value.clone());
        }
    }

    Err(ComposeError::UnknownToken {
        name: token.to_string(),
        reason: format!("no theme entry matches it for '{property}'"),
    })
}

fn is_spacing_property(property: &str) -> bool {
    property == "padding"
        || property.starts_with("padding-")
        || property == "margin"
        || property.starts_with("margin-")
        || property == "gap"
        || property == "row-gap"
        || property == "column-gap"
}

fn resolve_color(token: &str, theme: &Theme) -> Result<String> {
    let unknown = |reason: String| ComposeError::UnknownToken {
        name: token.to_string(),
        reason,
    };

    let (family, shade) = token
        .rsplit_once('-')
        .ok_or_else(|| unknown("color tokens look like 'name-shade'".to_string()))?;
    let family_map = theme
        .colors
        .get(family)
        .ok_or_else(|| unknown(format!("unknown color family '{family}'")))?;
    family_map
        .get(shade)
        .cloned()
        .ok_or_else(|| unknown(format!("unknown color shade '{family}-{shade}'")))
}

fn resolve_color_with_opacity(
    color_token: &str,
    opacity_token: &str,
    theme: &Theme,
) -> Result<String> {
    let color = resolve_color(color_token, theme)?;

    let opacity_key = opacity_token.trim_start_matches('@');
    let opacity = theme
        .opacity
        .get(opacity_key)
        .ok_or_else(|| ComposeError::UnknownToken {
            name: opacity_key.to_string(),
            reason: "unknown opacity token".to_string(),
        })?;

    inject_alpha(&color, opacity)
}

fn inject_alpha(color: &str, opacity: &str) -> Result<String> {
    if color.starts_with('#') {
        return hex_to_rgba(color, opacity);
    }

    if color.contains('(') {
        let base = color.trim_end_matches(')');
        return Ok(format!("{base} / {opacity})"));
    }

    Err(ComposeError::Value {
        expr: color.to_string(),
        reason: "unsupported color format for opacity".to_string(),
    })
}

fn hex_to_rgba(hex: &str, opacity: &str) -> Result<String> {
    let digits = hex.trim_start_matches('#');
    let invalid = || ComposeError::Value {
        expr: hex.to_string(),
        reason: "invalid hex color".to_string(),
    };
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

    let (r, g, b) = match digits.len() {
        6 => (
            channel(&digits[0..2])?,
            channel(&digits[2..4])?,
            channel(&digits[4..6])?,
        ),
        3 => (
            channel(&digits[0..1].repeat(2))?,
            channel(&digits[1..2].repeat(2))?,
            channel(&digits[2..3].repeat(2))?,
        ),
        _ => return Err(invalid()),
    };

    Ok(format!("rgba({r},{g},{b},{opacity})"))
}

/// A number with an optional unit, e.g. `1.5rem` or `12`.
#[derive(Debug, Clone, PartialEq)]
struct Number {
    value: f64,
    unit: String,
}

impl Number {
    fn parse(text: &str) -> Option<Self> {
        let split = text
            .char_indices()
            .find(|&(idx, ch)| !(ch.is_ascii_digit() || ch == '.' || (idx == 0 && ch == '-')))
            .map_or(text.len(), |(idx, _)| idx);
        let (digits, unit) = text.split_at(split);
        if digits.is_empty() || digits == "-" {
            return None;
        }
        if !unit.chars().all(|c| c.is_ascii_alphabetic() || c == '%') {
            return None;
        }
        Some(Self {
            value: digits.parse().ok()?,
            unit: unit.to_string(),
        })
    }

    fn format(&self) -> String {
        let rounded = (self.value * 1e6).round() / 1e6;
        format!("{rounded}{}", self.unit)
    }
}

/// Evaluates `percentage(...)`, parenthesised arithmetic and bare
/// `a * b` products. Everything else passes through untouched.
fn evaluate(value: &str) -> Result<String> {
    let value = evaluate_percentages(value)?;
    if !value.contains('*') && !value.contains('(') {
        return Ok(value);
    }

    let words = split_words(&value);
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut idx = 0;
    while idx < words.len() {
        let word = &words[idx];

        if idx + 2 < words.len() && words[idx + 1] == "*" {
            let product = format!("{} * {}", word, words[idx + 2]);
            if let Some(number) = eval_expr(&product) {
                out.push(number.format());
                idx += 3;
                continue;
            }
        }

        if word.starts_with('(') && word.ends_with(')') {
            if let Some(number) = eval_expr(word) {
                out.push(number.format());
                idx += 1;
                continue;
            }
        }

        out.push(word.clone());
        idx += 1;
    }
    Ok(out.join(" "))
}

fn evaluate_percentages(value: &str) -> Result<String> {
    const FUNC: &str = "percentage(";
    let mut out = String::new();
    let mut rest = value;

    while let Some(start) = rest.find(FUNC) {
        out.push_str(&rest[..start]);
        let after = &rest[start + FUNC.len()..];
        let close = matching_paren(after).ok_or_else(|| ComposeError::Value {
            expr: value.to_string(),
            reason: "unterminated percentage()".to_string(),
        })?;
        let inner = &after[..close];
        let number = eval_expr(inner)
            .filter(|n| n.unit.is_empty())
            .ok_or_else(|| ComposeError::Value {
                expr: inner.to_string(),
                reason: "percentage() needs a unitless number".to_string(),
            })?;
        out.push_str(
            &Number {
                value: number.value * 100.0,
                unit: "%".to_string(),
            }
            .format(),
        );
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Index of the `)` closing a group whose `(` was just consumed.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on spaces outside parentheses.
fn split_words(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in value.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Evaluates `+ - * /` over numbers. Returns `None` when the text is not
/// purely arithmetic or mixes incompatible units.
fn eval_expr(text: &str) -> Option<Number> {
    let tokens = tokenize_expr(text)?;
    let mut pos = 0;
    let number = parse_sum(&tokens, &mut pos)?;
    (pos == tokens.len()).then_some(number)
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Num(Number),
    Op(char),
    Open,
    Close,
}

fn tokenize_expr(text: &str) -> Option<Vec<ExprToken>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            c if c.is_whitespace() => idx += 1,
            '(' => {
                tokens.push(ExprToken::Open);
                idx += 1;
            }
            ')' => {
                tokens.push(ExprToken::Close);
                idx += 1;
            }
            '*' | '/' | '+' => {
                tokens.push(ExprToken::Op(ch));
                idx += 1;
            }
            '-' if !matches!(tokens.last(), None | Some(ExprToken::Op(_) | ExprToken::Open)) => {
                tokens.push(ExprToken::Op('-'));
                idx += 1;
            }
            _ => {
                let start = idx;
                idx += 1;
                while idx < chars.len()
                    && (chars[idx].is_ascii_alphanumeric() || chars[idx] == '.' || chars[idx] == '%')
                {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                tokens.push(ExprToken::Num(Number::parse(&word)?));
            }
        }
    }
    Some(tokens)
}

fn parse_sum(tokens: &[ExprToken], pos: &mut usize) -> Option<Number> {
    let mut acc = parse_product(tokens, pos)?;
    while let Some(ExprToken::Op(op @ ('+' | '-'))) = tokens.get(*pos) {
        *pos += 1;
        let rhs = parse_product(tokens, pos)?;
        let unit = merge_additive_units(&acc.unit, &rhs.unit)?;
        let value = if *op == '+' {
            acc.value + rhs.value
        } else {
            acc.value - rhs.value
        };
        acc = Number { value, unit };
    }
    Some(acc)
}

fn parse_product(tokens: &[ExprToken], pos: &mut usize) -> Option<Number> {
    let mut acc = parse_atom(tokens, pos)?;
    while let Some(ExprToken::Op(op @ ('*' | '/'))) = tokens.get(*pos) {
        *pos += 1;
        let rhs = parse_atom(tokens, pos)?;
        acc = if *op == '*' {
            let unit = match (acc.unit.is_empty(), rhs.unit.is_empty()) {
                (_, true) => acc.unit,
                (true, false) => rhs.unit,
                (false, false) => return None,
            };
            Number {
                value: acc.value * rhs.value,
                unit,
            }
        } else {
            if rhs.value == 0.0 {
                return None;
            }
            let unit = if rhs.unit.is_empty() {
                acc.unit
            } else if rhs.unit == acc.unit {
                String::new()
            } else {
                return None;
            };
            Number {
                value: acc.value / rhs.value,
                unit,
            }
        };
    }
    Some(acc)
}

fn parse_atom(tokens: &[ExprToken], pos: &mut usize) -> Option<Number> {
    match tokens.get(*pos)? {
        ExprToken::Num(number) => {
            *pos += 1;
            Some(number.clone())
        }
        ExprToken::Open => {
            *pos += 1;
            let inner = parse_sum(tokens, pos)?;
            if tokens.get(*pos) != Some(&ExprToken::Close) {
                return None;
            }
            *pos += 1;
            Some(inner)
        }
        _ => None,
    }
}

fn merge_additive_units(lhs: &str, rhs: &str) -> Option<String> {
    match (lhs.is_empty(), rhs.is_empty()) {
        (true, _) => Some(rhs.to_string()),
        (false, true) => Some(lhs.to_string()),
        (false, false) if lhs == rhs => Some(lhs.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme() -> Theme {
        let mut theme = Theme::default();
        theme
            .tokens
            .insert("brand-font".into(), "\"Open Sans\", sans-serif".into());
        theme.spacing.insert("4".into(), "1rem".into());
        theme
            .colors
            .entry("gray".into())
            .or_default()
            .insert("100".into(), "#F9FAFC".into());
        theme.opacity.insert("50".into(), "0.5".into());
        theme
    }

    fn globals() -> HashMap<String, String> {
        HashMap::from([
            ("spacer".to_string(), "1rem".to_string()),
            ("gutter".to_string(), "$spacer".to_string()),
            ("white".to_string(), "#FFFFFF".to_string()),
        ])
    }

    #[test]
    fn variables_resolve_through_globals_and_locals() {
        let theme = theme();
        let globals = globals();
        let resolver = ValueResolver::new(&theme, &globals);

        let locals = Locals::from([("spacer".to_string(), "2px".to_string())]);
        assert_eq!(
            resolver.resolve("padding", "$gutter $spacer", &locals, ".a").unwrap(),
            "1rem 2px"
        );
        assert_eq!(
            resolver.resolve("background", "$white", &Locals::new(), ".a").unwrap(),
            "#FFFFFF"
        );
    }

    #[test]
    fn undefined_variable_is_fatal() {
        let theme = theme();
        let globals = globals();
        let resolver = ValueResolver::new(&theme, &globals);
        let err = resolver
            .resolve("color", "$missing", &Locals::new(), ".banner")
            .unwrap_err();
        assert!(matches!(err, ComposeError::UnknownVariable { ref name, ref from } if name == "missing" && from == ".banner"));
    }

    #[test]
    fn self_referencing_globals_do_not_loop() {
        let theme = theme();
        let globals = HashMap::from([("a".to_string(), "$a".to_string())]);
        let resolver = ValueResolver::new(&theme, &globals);
        assert!(resolver.resolve("top", "$a", &Locals::new(), ".x").is_err());
    }

    #[test]
    fn theme_tokens_by_property() {
        let theme = theme();
        let globals = HashMap::new();
        let resolver = ValueResolver::new(&theme, &globals);
        let none = Locals::new();

        assert_eq!(resolver.resolve("margin", "@4", &none, "r").unwrap(), "1rem");
        assert_eq!(
            resolver.resolve("border", "1px solid @gray-100", &none, "r").unwrap(),
            "1px solid #F9FAFC"
        );
        assert_eq!(
            resolver.resolve("background-color", "@gray-100/@50", &none, "r").unwrap(),
            "rgba(249,250,252,0.5)"
        );
        assert_eq!(
            resolver.resolve("font-family", "@brand-font", &none, "r").unwrap(),
            "\"Open Sans\", sans-serif"
        );
        assert!(matches!(
            resolver.resolve("color", "@nope-1", &none, "r"),
            Err(ComposeError::UnknownToken { .. })
        ));
    }

    #[test]
    fn non_hex_colors_are_rejected_before_slicing() {
        let mut theme = theme();
        theme
            .colors
            .entry("blue".into())
            .or_default()
            .insert("500".into(), "#a\u{e9}123".into());
        let globals = HashMap::new();
        let resolver = ValueResolver::new(&theme, &globals);

        let err = resolver
            .resolve("color", "@blue-500/@50", &Locals::new(), ".a")
            .unwrap_err();
        assert!(matches!(err, ComposeError::Value { ref reason, .. } if reason == "invalid hex color"));
        assert!(hex_to_rgba("#\u{e9}\u{e9}", "0.5").is_err());
        assert!(hex_to_rgba("#zzzzzz", "0.5").is_err());
        assert_eq!(hex_to_rgba("#fff", "0.5").unwrap(), "rgba(255,255,255,0.5)");
    }

    #[test]
    fn string_literals_are_left_alone() {
        let theme = theme();
        let globals = globals();
        let resolver = ValueResolver::new(&theme, &globals);
        let none = Locals::new();

        assert_eq!(
            resolver.resolve("content", "\"US$5\"", &none, ".a").unwrap(),
            "\"US$5\""
        );
        assert_eq!(
            resolver.resolve("content", "'mail@4' $spacer", &none, ".a").unwrap(),
            "'mail@4' 1rem"
        );
        assert_eq!(
            resolver
                .resolve("font-family", "\"Open Sans\", @brand-font", &none, ".a")
                .unwrap(),
            "\"Open Sans\", \"Open Sans\", sans-serif"
        );
    }

    #[test]
    fn arithmetic() {
        assert_eq!(evaluate("percentage(6 / 12)").unwrap(), "50%");
        assert_eq!(evaluate("0 0 percentage(4 / 12)").unwrap(), "0 0 33.333333%");
        assert_eq!(evaluate("1rem * 2").unwrap(), "2rem");
        assert_eq!(evaluate("0 (1rem * .5)").unwrap(), "0 0.5rem");
        assert_eq!(evaluate("(30px / 2) auto").unwrap(), "15px auto");
        assert_eq!(evaluate("12px/1.5 sans-serif").unwrap(), "12px/1.5 sans-serif");
        assert_eq!(evaluate("rgba(0, 0, 0, 0.5)").unwrap(), "rgba(0, 0, 0, 0.5)");
        assert_eq!(evaluate("calc(100% - 10px)").unwrap(), "calc(100% - 10px)");
        assert!(evaluate("percentage(1px / 2)").is_err());
    }
}
