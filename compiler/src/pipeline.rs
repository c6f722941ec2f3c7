// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Input is either a parsed `.am` file (lowered by the
// first pass) or actor machines loaded from JSON (lowering is skipped).
//
// Preconditions: the state was built by `from_file` or `from_machines`.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; a failed certificate.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chumsky::span::Span as _;

use crate::am::ActorMachine;
use crate::ast::{File, Span};
use crate::codegen::{CodegenOptions, GeneratedCode};
use crate::controller::Controller;
use crate::diag::{codes, has_errors, Diagnostic};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::scopes::{InitStrategy, ScopeInfo, ScopeInitPlan};
use crate::verify::MachineCert;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw input text (`.am` or JSON).
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Loading ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed actor machine JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn read_source(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a JSON array of actor machines, or a single machine object.
pub fn machines_from_json(text: &str) -> Result<Vec<ActorMachine>, serde_json::Error> {
    match serde_json::from_str::<Vec<ActorMachine>>(text) {
        Ok(machines) => Ok(machines),
        Err(_) => ActorMachine::from_json(text).map(|am| vec![am]),
    }
}

pub fn load_machines(path: &Path) -> Result<(String, Vec<ActorMachine>), LoadError> {
    let text = read_source(path)?;
    let machines = machines_from_json(&text).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((text, machines))
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics. Per-actor
/// vectors are parallel to `machines`.
pub struct CompilationState {
    pub file: Option<File>,
    pub machines: Option<Vec<ActorMachine>>,
    /// Actor name spans; empty spans for JSON input.
    pub spans: Vec<Span>,
    pub certs: Option<Vec<MachineCert>>,
    pub scope_infos: Option<Vec<ScopeInfo>>,
    pub plans: Option<Vec<ScopeInitPlan>>,
    pub controllers: Option<Vec<Controller>>,
    pub generated: Option<Vec<GeneratedCode>>,
    pub strategy: InitStrategy,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn from_file(file: File, strategy: InitStrategy) -> Self {
        Self::empty(Some(file), None, Vec::new(), strategy)
    }

    pub fn from_machines(machines: Vec<ActorMachine>, strategy: InitStrategy) -> Self {
        let spans = vec![Span::new((), 0..0); machines.len()];
        Self::empty(None, Some(machines), spans, strategy)
    }

    fn empty(
        file: Option<File>,
        machines: Option<Vec<ActorMachine>>,
        spans: Vec<Span>,
        strategy: InitStrategy,
    ) -> Self {
        Self {
            file,
            machines,
            spans,
            certs: None,
            scope_infos: None,
            plans: None,
            controllers: None,
            generated: None,
            strategy,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    fn machines(&self) -> &[ActorMachine] {
        self.machines.as_deref().unwrap_or(&[])
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, log, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    tracing::debug!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Error diagnostic for a failed certificate, naming the failed obligations.
fn cert_failure(
    cert: &impl StageCert,
    what: &str,
    actor: &str,
    span: Span,
    code: crate::diag::DiagCode,
) -> Option<Diagnostic> {
    if cert.all_pass() {
        return None;
    }
    Some(
        Diagnostic::error(
            span,
            format!(
                "{what} verification failed for actor '{actor}': {}",
                cert.failed().join(", ")
            ),
        )
        .with_code(code),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
///
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; certificate failure.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Lower => {
                let diags = match &state.file {
                    Some(file) if state.machines.is_none() => {
                        let result = crate::lower::lower_file(file);
                        state.machines = Some(result.machines);
                        state.spans = result.spans;
                        result.diagnostics
                    }
                    _ => Vec::new(),
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Verify => {
                let mut diags = Vec::new();
                let mut certs = Vec::new();
                for (am, &span) in state.machines().iter().zip(&state.spans) {
                    let result = crate::verify::verify_actor_machine(am, span);
                    diags.extend(result.diagnostics);
                    diags.extend(cert_failure(
                        &result.cert,
                        "actor machine",
                        &am.name,
                        span,
                        codes::E0601,
                    ));
                    certs.push(result.cert);
                }
                state.certs = Some(certs);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::AnalyzeScopes => {
                let strategy = state.strategy;
                let (infos, plans): (Vec<_>, Vec<_>) = state
                    .machines()
                    .iter()
                    .map(|am| {
                        let info = ScopeInfo::new(am);
                        let plan = crate::scopes::plan_with(am, &info, strategy);
                        (info, plan)
                    })
                    .unzip();
                state.scope_infos = Some(infos);
                state.plans = Some(plans);
                finish_pass(state, pass_id, Vec::new(), t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::BuildController => {
                let mut diags = Vec::new();
                let mut controllers = Vec::new();
                let infos = state.scope_infos.as_deref().unwrap_or(&[]);
                let plans = state.plans.as_deref().unwrap_or(&[]);
                for (i, am) in state.machines().iter().enumerate() {
                    let controller = crate::controller::build_controller(am, &plans[i]);
                    let cert = crate::controller::verify_controller(&controller, &infos[i]);
                    diags.extend(cert_failure(
                        &cert,
                        "controller",
                        &am.name,
                        state.spans[i],
                        codes::E0602,
                    ));
                    controllers.push(controller);
                }
                state.controllers = Some(controllers);
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Codegen => {
                let generated = state
                    .controllers
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .map(|c| crate::codegen::codegen(c, codegen_options))
                    .collect();
                state.generated = Some(generated);
                finish_pass(state, pass_id, Vec::new(), t.elapsed(), &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

// ── Convenience ────────────────────────────────────────────────────────────

/// Outcome of `compile_source`: the final state, whether or not it failed.
pub struct Compiled {
    pub state: CompilationState,
    /// Lexer and parser errors, rendered. Non-empty means no pass ran.
    pub parse_errors: Vec<String>,
}

/// Parse `.am` source and run passes up to `terminal`.
pub fn compile_source(
    source: &str,
    terminal: PassId,
    strategy: InitStrategy,
    codegen_options: &CodegenOptions,
) -> Compiled {
    let parsed = crate::parser::parse(source);
    let mut state = CompilationState::from_file(
        parsed.file.unwrap_or(File {
            actors: Vec::new(),
            span: Span::new((), 0..0),
        }),
        strategy,
    );
    state.provenance = Some(compute_provenance(source));
    let parse_errors: Vec<String> = parsed.errors.iter().map(|e| e.to_string()).collect();
    if parse_errors.is_empty() {
        // Failures are recorded in `state.has_error`.
        let _ = run_pipeline(&mut state, terminal, codegen_options, |_, _| {});
    } else {
        state.has_error = true;
    }
    Compiled {
        state,
        parse_errors,
    }
}
