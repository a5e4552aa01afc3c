//! Final variable values once decoding of a query has finished.
//!
//! Several nodes may claim the same variable. Candidates are considered in
//! declaration order and a later candidate only replaces the current winner
//! when it explicitly ranks above it, so ties keep the earliest declaration.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use weave_core::{Result, Value};

use super::node::{walk, EvalContext, NodeRef};

/// Values for `variables`. A variable no node claims keeps its generated
/// text; one that was never generated is left out.
pub fn resolve(
    root: &NodeRef,
    ctx: &EvalContext<'_>,
    variables: &[&str],
) -> Result<BTreeMap<String, Value>> {
    let nodes = walk(root);
    let mut out = BTreeMap::new();

    for &name in variables {
        let mut winner: Option<&NodeRef> = None;
        for node in nodes.iter().filter(|n| n.postprocess_var(name)) {
            winner = match winner {
                Some(current) if node.postprocess_order(current) != Some(Ordering::Greater) => {
                    Some(current)
                }
                _ => Some(node),
            };
        }

        let value = match winner {
            Some(node) => {
                debug!(variable = name, node = %node.id(), "postprocessing variable");
                node.postprocess(ctx)?
            }
            None => match ctx.state().variable(name) {
                Some(var) => Value::String(var.text.clone()),
                None => continue,
            },
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}
