// dot.rs — Graphviz DOT output for compiled controllers
//
// Renders each controller as one cluster: tests as diamonds, transitions as
// boxes, waits as double circles. False edges out of a test are dashed;
// edges into a resumption label after a Wait are dotted.
//
// Preconditions: every controller passed `verify_controller`.
// Postconditions: returns a valid DOT string.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::controller::{Controller, Op};
use crate::id::StateId;

/// Emit the controllers as a Graphviz DOT string.
pub fn emit_dot(controllers: &[Controller]) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph amc {{").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for c in controllers {
        let actor = sanitize(&c.actor);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{actor} {{").unwrap();
        writeln!(buf, "        label=\"actor: {}\";", escape(&c.actor)).unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        write_controller(&mut buf, &actor, c, "        ");
        writeln!(buf, "    }}").unwrap();
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn node_id(actor: &str, state: StateId) -> String {
    format!("{actor}_s{}", state.0)
}

fn node_attrs(c: &Controller, state: StateId) -> String {
    let step = c.step(state);
    let (shape, color, label) = match &step.op {
        Op::Test { condition, .. } => (
            "diamond",
            "lightyellow",
            format!("{state}\\n{}", escape(&c.describe_condition(*condition))),
        ),
        Op::Exec { transition, .. } => (
            "box",
            "lightblue",
            format!(
                "{state}\\n{transition} {}",
                escape(&c.transition_bodies[transition.index()])
            ),
        ),
        Op::Wait { .. } => ("doublecircle", "lightgray", format!("{state}")),
    };
    let mut attrs = format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"");
    if !step.inits.is_empty() {
        let inits: Vec<String> = step.inits.iter().map(|s| s.to_string()).collect();
        write!(attrs, ", xlabel=\"init {}\"", inits.join(" ")).unwrap();
    }
    if state == c.initial {
        attrs.push_str(", penwidth=2");
    }
    attrs
}

/// Write all nodes and edges of one controller.
fn write_controller(buf: &mut String, actor: &str, c: &Controller, indent: &str) {
    let states: Vec<StateId> = (0..c.state_count()).map(StateId::from_index).collect();

    for &s in &states {
        let id = node_id(actor, s);
        let attrs = node_attrs(c, s);
        writeln!(buf, "{indent}{id} [{attrs}];").unwrap();
    }

    writeln!(buf).unwrap();
    for &s in &states {
        let src = node_id(actor, s);
        match c.step(s).op {
            Op::Test {
                on_true, on_false, ..
            } => {
                let t = node_id(actor, on_true);
                let f = node_id(actor, on_false);
                writeln!(buf, "{indent}{src} -> {t} [label=\"T\"];").unwrap();
                writeln!(buf, "{indent}{src} -> {f} [label=\"F\", style=dashed];").unwrap();
            }
            Op::Exec { target, .. } => {
                let t = node_id(actor, target);
                writeln!(buf, "{indent}{src} -> {t};").unwrap();
            }
            Op::Wait { resume } => {
                let t = node_id(actor, resume);
                writeln!(buf, "{indent}{src} -> {t} [style=dotted];").unwrap();
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
