//! `Parse(source) -> (boundaries, diagnostics)`.

use super::{ActionNode, Boundary, Template, TemplateLibrary, TemplateRef};
use crate::config::ParserConfig;
use crate::error::{LiveTemplateError, Result};

/// A non-fatal parse-time observation (e.g. a branch whose `then` and
/// `else` are both empty). Distinct from the hard `TemplateInvalid`
/// failure, which aborts parsing outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
}

pub struct ParseOutput {
    pub template: Template,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile a host-provided action list into a [`Template`].
pub fn parse(
    entry: &[ActionNode],
    library: &TemplateLibrary,
    config: &ParserConfig,
) -> Result<ParseOutput> {
    let mut diagnostics = Vec::new();
    let boundaries = compile_list(entry, library, config, 0, &mut diagnostics)?;
    Ok(ParseOutput {
        template: Template::new(boundaries),
        diagnostics,
    })
}

fn compile_list(
    actions: &[ActionNode],
    library: &TemplateLibrary,
    config: &ParserConfig,
    depth: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Vec<Boundary>> {
    let mut out = Vec::new();
    let mut static_buf = String::new();

    for action in actions {
        match action {
            ActionNode::Static(text) => static_buf.push_str(text),
            ActionNode::Field(path) => {
                flush_static(&mut static_buf, &mut out);
                out.push(Boundary::Field(path.clone()));
            }
            ActionNode::If { cond, then, or_else } => {
                flush_static(&mut static_buf, &mut out);
                if then.is_empty() && or_else.is_empty() {
                    diagnostics.push(Diagnostic {
                        message: format!("if {cond:?} has empty then and else branches"),
                    });
                }
                let then_b = compile_list(then, library, config, depth, diagnostics)?;
                let else_b = compile_list(or_else, library, config, depth, diagnostics)?;
                out.push(Boundary::If {
                    cond: cond.clone(),
                    then: then_b,
                    or_else: else_b,
                });
            }
            ActionNode::Range { iter, body, or_else } => {
                flush_static(&mut static_buf, &mut out);
                let body_b = compile_list(body, library, config, depth, diagnostics)?;
                let else_b = compile_list(or_else, library, config, depth, diagnostics)?;
                out.push(Boundary::Range {
                    iter: iter.clone(),
                    body: body_b,
                    or_else: else_b,
                });
            }
            ActionNode::With { path, body } => {
                flush_static(&mut static_buf, &mut out);
                let body_b = compile_list(body, library, config, depth, diagnostics)?;
                out.push(Boundary::With {
                    path: path.clone(),
                    body: body_b,
                });
            }
            ActionNode::Var { name, path } => {
                flush_static(&mut static_buf, &mut out);
                out.push(Boundary::Var {
                    name: name.clone(),
                    path: path.clone(),
                });
            }
            ActionNode::Template { name, arg } => {
                flush_static(&mut static_buf, &mut out);
                out.push(compile_template_ref(
                    name,
                    arg,
                    library,
                    config,
                    depth,
                    diagnostics,
                )?);
            }
        }
    }

    // Always flush a trailing static (possibly empty) so `s.len() ==
    // dynamic_count + 1` holds even when the list ends on a dynamic or
    // is entirely empty.
    flush_static(&mut static_buf, &mut out);
    Ok(out)
}

fn flush_static(buffer: &mut String, out: &mut Vec<Boundary>) {
    out.push(Boundary::Static(std::mem::take(buffer)));
}

fn compile_template_ref(
    name: &TemplateRef,
    arg: &str,
    library: &TemplateLibrary,
    config: &ParserConfig,
    depth: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Boundary> {
    match name {
        TemplateRef::Dynamic(expr) => Ok(Boundary::DynamicTemplate { expr: expr.clone() }),
        TemplateRef::Literal(literal_name) => {
            if depth >= config.recursion_depth_limit {
                diagnostics.push(Diagnostic {
                    message: format!(
                        "template {literal_name:?} exceeded recursion depth {}; \
                         degraded to opaque substitution",
                        config.recursion_depth_limit
                    ),
                });
                // Degrade rather than fail: a deeply recursive literal
                // reference still renders, just opaquely.
                return Ok(Boundary::DynamicTemplate {
                    expr: format!("{literal_name}({arg})"),
                });
            }
            let sub_actions = library.get(literal_name).ok_or_else(|| {
                LiveTemplateError::TemplateInvalid(format!(
                    "unresolvable template reference: {literal_name:?}"
                ))
            })?;
            let body = compile_list(sub_actions, library, config, depth + 1, diagnostics)?;
            Ok(Boundary::Template { body })
        }
    }
}
