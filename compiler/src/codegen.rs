// codegen.rs — Scheduling routine emission
//
// Renders a compiled `Controller` as target source text. All three targets
// share one shape: a dispatch `switch` on the persisted program counter, one
// label per state, the state's scope initializers, then its instruction as
// straight-line code ending in a `goto`.
//
//   cooperative   C function returning an `amc_status`.
//   multicore     ART action scheduler returning exit-code tables.
//   virtual-time  C++ member function driven by a schedule query.
//
// Preconditions: `verify_controller` passed for `controller`.
// Postconditions: returns one routine per call; output is deterministic.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;

use crate::am::{Condition, Direction};
use crate::controller::{BlockReason, Controller, Op};
use crate::id::StateId;
use crate::settings::Target;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub actor: String,
    pub target: Target,
    pub source: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    pub target: Target,
}

/// Program counter value meaning "never scheduled".
pub const PC_FRESH: i32 = -1;

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(controller: &Controller, options: &CodegenOptions) -> GeneratedCode {
    let mut ctx = CodegenCtx {
        c: controller,
        name: c_ident(&controller.actor),
        out: String::with_capacity(2048),
    };
    match options.target {
        Target::Cooperative => ctx.emit_cooperative(),
        Target::Multicore => ctx.emit_multicore(),
        Target::VirtualTime => ctx.emit_virtual_time(),
    }
    GeneratedCode {
        actor: controller.actor.clone(),
        target: options.target,
        source: ctx.out,
    }
}

/// Map an arbitrary actor name onto a C identifier.
pub fn c_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    c: &'a Controller,
    name: String,
    out: String,
}

const IND: &str = "    ";

impl CodegenCtx<'_> {
    fn header(&mut self, comment_open: &str, comment_close: &str) {
        let _ = writeln!(
            self.out,
            "{comment_open} scheduler for actor {} ({} scope initialization){comment_close}",
            self.c.actor, self.c.strategy
        );
    }

    fn emit_dispatch(&mut self, pc: &str) {
        let _ = writeln!(self.out, "{IND}switch ({pc}) {{");
        let _ = writeln!(
            self.out,
            "{IND}case {PC_FRESH}: goto S{};",
            self.c.initial.index()
        );
        for s in &self.c.dispatch {
            let _ = writeln!(self.out, "{IND}case {0}: goto S{0};", s.index());
        }
        let _ = writeln!(self.out, "{IND}default: abort();");
        let _ = writeln!(self.out, "{IND}}}");
        let _ = writeln!(self.out);
    }

    fn label(&mut self, state: StateId) {
        let _ = writeln!(self.out, "S{}:", state.index());
    }

    // ── cooperative ──

    fn emit_cooperative(&mut self) {
        let name = self.name.clone();
        self.header("/*", " */");
        let _ = writeln!(self.out, "#include <stdbool.h>");
        let _ = writeln!(self.out, "#include <stdlib.h>");
        let _ = writeln!(self.out, "#include \"amc-runtime.h\"");
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "amc_status {name}_scheduler({name}_state *self) {{");
        let _ = writeln!(self.out, "{IND}amc_status status = AMC_SUSPENDED;");
        let _ = writeln!(self.out, "{IND}bool progress = false;");
        let _ = writeln!(self.out);
        self.emit_dispatch("self->program_counter");

        for (i, step) in self.c.steps.iter().enumerate() {
            self.label(StateId::from_index(i));
            for scope in &step.inits {
                let _ = writeln!(self.out, "{IND}{name}_init_scope_{}(self);", scope.index());
            }
            match &step.op {
                Op::Test {
                    condition,
                    on_true,
                    on_false,
                    block,
                    ..
                } => {
                    let status = match block {
                        BlockReason::Starvation { .. } => "AMC_STARVATION",
                        BlockReason::Fullness { .. } => "AMC_FULLNESS",
                        BlockReason::Suspended { .. } => "AMC_SUSPENDED",
                    };
                    let _ = writeln!(
                        self.out,
                        "{IND}if ({name}_condition_{}(self)) {{",
                        condition.index()
                    );
                    let _ = writeln!(self.out, "{IND}{IND}goto S{};", on_true.index());
                    let _ = writeln!(self.out, "{IND}}} else {{");
                    let _ = writeln!(self.out, "{IND}{IND}status = {status};");
                    let _ = writeln!(self.out, "{IND}{IND}goto S{};", on_false.index());
                    let _ = writeln!(self.out, "{IND}}}");
                }
                Op::Wait { resume } => {
                    let _ = writeln!(
                        self.out,
                        "{IND}self->program_counter = {};",
                        resume.index()
                    );
                    let _ = writeln!(self.out, "{IND}goto out;");
                }
                Op::Exec {
                    transition, target, ..
                } => {
                    let _ = writeln!(
                        self.out,
                        "{IND}{name}_transition_{}(self);",
                        transition.index()
                    );
                    let _ = writeln!(self.out, "{IND}progress = true;");
                    let _ = writeln!(self.out, "{IND}goto S{};", target.index());
                }
            }
        }

        let _ = writeln!(self.out, "out:");
        let _ = writeln!(self.out, "{IND}return progress ? AMC_PROGRESS : status;");
        let _ = writeln!(self.out, "}}");
    }

    // ── multicore (ART) ──

    fn emit_multicore(&mut self) {
        let name = self.name.clone();
        let (n_in, n_out) = (self.c.inputs.len(), self.c.outputs.len());
        self.header("//", "");
        let _ = writeln!(self.out, "// -- Scheduler Definitions");
        let _ = writeln!(
            self.out,
            "static const int exitcode_block_Any[3] = {{1,0,1}};"
        );
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "ART_ACTION_SCHEDULER({name}_scheduler) {{");
        let _ = writeln!(self.out, "{IND}const int *result = EXIT_CODE_YIELD;");
        let _ = writeln!(self.out, "{IND}int fired = 0;");
        let _ = writeln!(
            self.out,
            "{IND}ActorInstance_{name} *thisActor = (ActorInstance_{name} *) pBase;"
        );
        let _ = writeln!(self.out, "{IND}ART_ACTION_SCHEDULER_ENTER({n_in}, {n_out})");
        let _ = writeln!(self.out);
        self.emit_dispatch("thisActor->program_counter");

        for (i, step) in self.c.steps.iter().enumerate() {
            self.label(StateId::from_index(i));
            for scope in &step.inits {
                let _ = writeln!(
                    self.out,
                    "{IND}{name}_init_scope_{}(context, thisActor);",
                    scope.index()
                );
            }
            match &step.op {
                Op::Test {
                    condition,
                    on_true,
                    on_false,
                    ..
                } => {
                    let exit_code = match &self.c.conditions[condition.index()] {
                        Condition::Port(p) => {
                            format!("{{EXITCODE_BLOCK(1), {}, {}}}", p.port.index(), p.threshold)
                        }
                        Condition::Predicate(_) => format!(
                            "{{EXIT_CODE_PREDICATE, EXITCODE_PREDICATE({})}}",
                            condition.index()
                        ),
                    };
                    let _ = writeln!(
                        self.out,
                        "{IND}if (ART_TEST_CONDITION({name}_condition_{})) {{",
                        condition.index()
                    );
                    let _ = writeln!(self.out, "{IND}{IND}goto S{};", on_true.index());
                    let _ = writeln!(self.out, "{IND}}} else {{");
                    let _ = writeln!(
                        self.out,
                        "{IND}{IND}static const int exitCode[] = {exit_code};"
                    );
                    let _ = writeln!(self.out, "{IND}{IND}result = exitCode;");
                    let _ = writeln!(self.out, "{IND}{IND}goto S{};", on_false.index());
                    let _ = writeln!(self.out, "{IND}}}");
                }
                Op::Wait { resume } => {
                    let _ = writeln!(
                        self.out,
                        "{IND}thisActor->program_counter = {};",
                        resume.index()
                    );
                    let _ = writeln!(self.out, "{IND}goto out;");
                }
                Op::Exec {
                    transition, target, ..
                } => {
                    let _ = writeln!(
                        self.out,
                        "{IND}ART_EXEC_TRANSITION({name}_transition_{});",
                        transition.index()
                    );
                    let _ = writeln!(self.out, "{IND}fired = 1;");
                    let _ = writeln!(self.out, "{IND}goto S{};", target.index());
                }
            }
        }

        let _ = writeln!(self.out, "out:");
        let _ = writeln!(self.out, "{IND}if (fired) result = EXIT_CODE_YIELD;");
        let _ = writeln!(self.out, "{IND}ART_ACTION_SCHEDULER_EXIT({n_in}, {n_out})");
        let _ = writeln!(self.out, "{IND}return result;");
        let _ = writeln!(self.out, "}}");
    }

    // ── virtual-time (C++) ──

    fn emit_virtual_time(&mut self) {
        let name = self.name.clone();
        self.header("//", "");
        let _ = writeln!(
            self.out,
            "void {name}::scheduler(wsim::ActorScheduleQuery& query) {{"
        );
        let _ = writeln!(
            self.out,
            "{IND}auto current_ts = ::std::max(query.getScheduleTime().value_or(0), getVirtualTime());"
        );
        let _ = writeln!(self.out);
        self.emit_dispatch("getPC()");

        for (i, step) in self.c.steps.iter().enumerate() {
            self.label(StateId::from_index(i));
            for scope in &step.inits {
                let _ = writeln!(self.out, "{IND}scope_{}();", scope.index());
            }
            match &step.op {
                Op::Test {
                    condition,
                    on_true,
                    on_false,
                    notify_wait,
                    ..
                } => {
                    let k = condition.index();
                    let _ = writeln!(self.out, "{IND}{{");
                    let _ = writeln!(
                        self.out,
                        "{IND}{IND}const auto [cond, cond_ts] = condition_{k}();"
                    );
                    let _ = writeln!(
                        self.out,
                        "{IND}{IND}current_ts = ::std::max(current_ts, cond_ts);"
                    );
                    let _ = writeln!(self.out, "{IND}{IND}if (cond) {{");
                    let _ = writeln!(self.out, "{IND}{IND}{IND}goto S{};", on_true.index());
                    let _ = writeln!(self.out, "{IND}{IND}}} else {{");
                    if *notify_wait {
                        let _ = writeln!(self.out, "{IND}{IND}{IND}query.notifyWait({k});");
                    }
                    let _ = writeln!(self.out, "{IND}{IND}{IND}goto S{};", on_false.index());
                    let _ = writeln!(self.out, "{IND}{IND}}}");
                    let _ = writeln!(self.out, "{IND}}}");
                }
                Op::Wait { resume } => {
                    let _ = writeln!(self.out, "{IND}setPC({});", resume.index());
                    let _ = writeln!(self.out, "{IND}goto out;");
                }
                Op::Exec {
                    transition,
                    target,
                    latency,
                } => {
                    let t = transition.index();
                    let _ = writeln!(
                        self.out,
                        "{IND}registerTrace({t}, current_ts, {latency});"
                    );
                    if *latency > 0 {
                        let _ = writeln!(self.out, "{IND}current_ts += {latency};");
                    }
                    let _ = writeln!(self.out, "{IND}query.notifyAction({t});");
                    let _ = writeln!(self.out, "{IND}transition_{t}(current_ts);");
                    let _ = writeln!(self.out, "{IND}goto S{};", target.index());
                }
            }
        }

        let _ = writeln!(self.out, "out:");
        let _ = writeln!(self.out, "{IND}setVirtualTime(current_ts);");
        let _ = writeln!(self.out, "}}");
    }
}

/// Prototype comments for the per-actor hooks a routine calls, one per line.
pub fn hook_summary(controller: &Controller) -> String {
    let name = c_ident(&controller.actor);
    let mut out = String::new();
    for (k, cond) in controller.conditions.iter().enumerate() {
        let what = match cond {
            Condition::Port(p) => {
                let dir = match p.direction {
                    Direction::Input => "tokens",
                    Direction::Output => "space",
                };
                format!(
                    "{dir} on {} >= {}",
                    controller.port_name(p.port, p.direction),
                    p.threshold
                )
            }
            Condition::Predicate(p) => p.expr.clone(),
        };
        let _ = writeln!(out, "// {name}_condition_{k}: {what}");
    }
    for (k, body) in controller.transition_bodies.iter().enumerate() {
        let _ = writeln!(out, "// {name}_transition_{k}: {body}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::build_controller;
    use crate::scopes::{plan, InitStrategy};

    fn controller(src: &str) -> Controller {
        let parsed = crate::parser::parse(src);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_file(&parsed.file.unwrap());
        assert!(!lowered.has_errors(), "{:?}", lowered.diagnostics);
        let am = &lowered.machines[0];
        build_controller(am, &plan(am, InitStrategy::Liveness))
    }

    const COPY: &str = r#"
        actor Copy {
            input IN; output OUT;
            scope 0 transient (v);
            condition 0 = tokens IN 1;
            condition 1 = space OUT 1;
            transition 0 = "copy" consume IN 1 produce OUT 1 reads [0] latency 3;
            initial 0;
            state 0 = test 0 -> 1 else 3;
            state 1 = test 1 -> 2 else 3;
            state 2 = exec 0 -> 0;
            state 3 = wait -> 0;
        }
    "#;

    fn emit(target: Target) -> String {
        codegen(&controller(COPY), &CodegenOptions { target }).source
    }

    #[test]
    fn cooperative_dispatch_covers_fresh_and_wait_targets() {
        let src = emit(Target::Cooperative);
        assert!(src.contains("switch (self->program_counter) {"));
        assert!(src.contains("case -1: goto S0;"));
        assert!(src.contains("case 0: goto S0;"));
        assert!(src.contains("default: abort();"));
    }

    #[test]
    fn cooperative_statuses_match_port_direction() {
        let src = emit(Target::Cooperative);
        let s0 = src.find("S0:").unwrap();
        let s1 = src.find("S1:").unwrap();
        assert!(src[s0..s1].contains("status = AMC_STARVATION;"));
        assert!(src[s1..].contains("status = AMC_FULLNESS;"));
        assert!(src.contains("Copy_init_scope_0(self);\n    Copy_transition_0(self);"));
        assert!(src.contains("return progress ? AMC_PROGRESS : status;"));
    }

    #[test]
    fn multicore_exit_codes() {
        let src = emit(Target::Multicore);
        assert!(src.contains("static const int exitCode[] = {EXITCODE_BLOCK(1), 0, 1};"));
        assert!(src.contains("ART_EXEC_TRANSITION(Copy_transition_0);"));
        assert!(src.contains("ART_ACTION_SCHEDULER_ENTER(1, 1)"));
        assert!(src.contains("thisActor->program_counter = 0;"));
    }

    #[test]
    fn multicore_predicate_exit_code() {
        let c = controller(
            r#"actor P {
                condition 0 = guard "ready";
                transition 0 = "go";
                initial 0;
                state 0 = test 0 -> 1 else 2;
                state 1 = exec 0 -> 0;
                state 2 = wait -> 0;
            }"#,
        );
        let src = codegen(&c, &CodegenOptions { target: Target::Multicore }).source;
        assert!(src.contains("{EXIT_CODE_PREDICATE, EXITCODE_PREDICATE(0)}"));
    }

    #[test]
    fn virtual_time_tracks_clock() {
        let src = emit(Target::VirtualTime);
        assert!(src.contains("void Copy::scheduler(wsim::ActorScheduleQuery& query) {"));
        assert!(src.contains("current_ts = ::std::max(current_ts, cond_ts);"));
        assert!(src.contains("query.notifyWait(0);"));
        assert!(src.contains(
            "registerTrace(0, current_ts, 3);\n    current_ts += 3;\n    query.notifyAction(0);\n    transition_0(current_ts);"
        ));
        assert!(src.ends_with("out:\n    setVirtualTime(current_ts);\n}\n"));
    }

    #[test]
    fn zero_latency_leaves_clock_alone() {
        let c = controller(
            r#"actor Z {
                transition 0 = "tick";
                initial 0;
                state 0 = exec 0 -> 1;
                state 1 = wait -> 0;
            }"#,
        );
        let src = codegen(&c, &CodegenOptions { target: Target::VirtualTime }).source;
        assert!(src.contains(
            "registerTrace(0, current_ts, 0);\n    query.notifyAction(0);\n    transition_0(current_ts);"
        ));
        assert!(!src.contains("current_ts += "));
    }

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(c_ident("a.b-c"), "a_b_c");
        assert_eq!(c_ident("3x"), "_3x");
        assert_eq!(c_ident(""), "_");
    }

    #[test]
    fn hook_summary_lists_every_hook() {
        let text = hook_summary(&controller(COPY));
        assert_eq!(
            text,
            "// Copy_condition_0: tokens on IN >= 1\n\
             // Copy_condition_1: space on OUT >= 1\n\
             // Copy_transition_0: copy\n"
        );
    }
}
