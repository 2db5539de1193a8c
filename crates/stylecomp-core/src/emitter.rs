use crate::composer::{ComposedDeclaration, ComposedRule, Composer};

/// Print the composed sheet as plain CSS in source order. Each run of
/// declarations sharing a gate becomes its own rule, and gated runs are
/// wrapped in `@media (min-width)`, so the browser's cascade agrees with
/// [`Composer::resolve`].
pub fn emit_css(composer: &Composer) -> String {
    let mut out = String::new();

    for rule in composer.rules() {
        for (gate, decls) in gate_runs(&rule.declarations) {
            match gate {
                None => emit_rule(rule, &decls, "", &mut out),
                Some(threshold) => {
                    out.push_str(&format!("@media (min-width: {threshold}px) {{\n"));
                    emit_rule(rule, &decls, "    ", &mut out);
                    out.push_str("}\n\n");
                }
            }
        }
    }

    out
}

type GateRun<'a> = (Option<u32>, Vec<&'a ComposedDeclaration>);

/// Splits declarations into maximal runs with the same gate. A zero
/// threshold always holds and counts as ungated.
fn gate_runs(declarations: &[ComposedDeclaration]) -> Vec<GateRun<'_>> {
    let mut runs: Vec<GateRun<'_>> = Vec::new();
    for decl in declarations {
        let gate = decl.min_width.filter(|&w| w > 0);
        if let Some((current, run)) = runs.last_mut() {
            if *current == gate {
                run.push(decl);
                continue;
            }
        }
        runs.push((gate, vec![decl]));
    }
    runs
}

fn emit_rule(rule: &ComposedRule, decls: &[&ComposedDeclaration], indent: &str, out: &mut String) {
    if decls.is_empty() {
        return;
    }
    out.push_str(indent);
    out.push_str(&rule.selector);
    out.push_str(" {\n");

    for decl in decls {
        emit_declaration(decl, indent, out);
    }
    out.push_str(indent);
    out.push_str("}\n");
    if indent.is_empty() {
        out.push('\n');
    }
}

fn emit_declaration(decl: &ComposedDeclaration, indent: &str, out: &mut String) {
    out.push_str(indent);
    out.push_str("    ");
    out.push_str(&decl.property);
    out.push_str(": ");
    out.push_str(&decl.value);
    out.push_str(";\n");
}
