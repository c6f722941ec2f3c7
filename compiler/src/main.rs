use clap::Parser;
use std::path::{Path, PathBuf};

use amc::codegen::{hook_summary, CodegenOptions};
use amc::pass::PassId;
use amc::pipeline::{self, CompilationState};
use amc::settings::{Settings, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Scheduling routines for the selected target
    Code,
    /// Compiled controller listing
    Controller,
    /// Graphviz view of the controllers
    Dot,
    /// Per-state scope initializer plans
    Scopes,
    /// Lowered actor machines as JSON
    Json,
    /// Source hash and compiler version
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "amc",
    version,
    about = "Actor machine compiler: turns actor machines into non-blocking scheduling routines"
)]
struct Cli {
    /// Input .am source file, or .json actor machines
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Code)]
    emit: EmitStage,

    /// Settings file (JSON, kebab-case keys)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Routine flavour; overrides the settings file
    #[arg(long, value_enum)]
    target: Option<Target>,

    /// Use the conservative scope initializer
    #[arg(long)]
    no_scope_liveness: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(source = %cli.source.display(), emit = ?cli.emit, "amc start");

    // ── Settings ──
    let mut settings = match &cli.settings {
        Some(path) => match Settings::load(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("amc: error: {e}");
                std::process::exit(2);
            }
        },
        None => Settings::default(),
    };
    if let Some(target) = cli.target {
        settings.target = target;
    }
    if cli.no_scope_liveness {
        settings.scope_liveness_analysis = false;
    }

    // ── Read input ──
    let (mut state, source_text) = match load_state(&cli.source, &settings) {
        Ok(loaded) => loaded,
        Err(code) => std::process::exit(code),
    };
    let path = cli.source.display().to_string();

    if cli.emit == EmitStage::BuildInfo {
        if let Some(p) = &state.provenance {
            write_output(cli.output.as_deref(), &p.to_json());
        }
        return;
    }

    let terminal = match cli.emit {
        EmitStage::Json => PassId::Lower,
        EmitStage::Scopes => PassId::AnalyzeScopes,
        EmitStage::Controller | EmitStage::Dot => PassId::BuildController,
        EmitStage::Code | EmitStage::BuildInfo => PassId::Codegen,
    };
    let options = CodegenOptions {
        target: settings.target,
    };
    let result = pipeline::run_pipeline(&mut state, terminal, &options, |_, diags| {
        for d in diags {
            eprintln!("{}", d.render(&path, source_text.as_deref()));
        }
    });
    if let Err(e) = result {
        tracing::debug!(pass = ?e.failing_pass, "pipeline stopped");
        std::process::exit(1);
    }

    let text = render(&state, cli.emit);
    write_output(cli.output.as_deref(), &text);
}

/// Parse or load the input, returning the state and the `.am` source text
/// (`None` for JSON input). Errors are reported here; the `Err` value is the
/// exit code.
fn load_state(path: &Path, settings: &Settings) -> Result<(CompilationState, Option<String>), i32> {
    let strategy = settings.strategy();
    let is_json = path.extension().is_some_and(|e| e == "json");

    if is_json {
        let (text, machines) = pipeline::load_machines(path).map_err(|e| {
            eprintln!("amc: error: {e}");
            2
        })?;
        let mut state = CompilationState::from_machines(machines, strategy);
        state.provenance = Some(pipeline::compute_provenance(&text));
        return Ok((state, None));
    }

    let source = pipeline::read_source(path).map_err(|e| {
        eprintln!("amc: error: {e}");
        2
    })?;
    let parse_result = amc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let (line, col) = amc::diag::line_col(&source, err.span().start);
            eprintln!("{}:{line}:{col}: parse error: {err}", path.display());
        }
        return Err(1);
    }
    let Some(file) = parse_result.file else {
        eprintln!("amc: parse failed with no output");
        return Err(1);
    };
    tracing::debug!(actors = file.actors.len(), "parsed");
    let mut state = CompilationState::from_file(file, strategy);
    state.provenance = Some(pipeline::compute_provenance(&source));
    Ok((state, Some(source)))
}

fn render(state: &CompilationState, emit: EmitStage) -> String {
    let mut out = String::new();
    match emit {
        EmitStage::Json => {
            let machines = state.machines.as_deref().unwrap_or(&[]);
            out = serde_json::to_string_pretty(machines).unwrap_or_default();
            out.push('\n');
        }
        EmitStage::Scopes => {
            let machines = state.machines.as_deref().unwrap_or(&[]);
            for (am, plan) in machines.iter().zip(state.plans.as_deref().unwrap_or(&[])) {
                out.push_str(&format!("actor {}\n{plan}\n", am.name));
            }
        }
        EmitStage::Controller => {
            for c in state.controllers.as_deref().unwrap_or(&[]) {
                out.push_str(&format!("{c}\n"));
            }
        }
        EmitStage::Dot => {
            out = amc::dot::emit_dot(state.controllers.as_deref().unwrap_or(&[]));
        }
        EmitStage::Code => {
            let controllers = state.controllers.as_deref().unwrap_or(&[]);
            let generated = state.generated.as_deref().unwrap_or(&[]);
            for (c, g) in controllers.iter().zip(generated) {
                out.push_str(&hook_summary(c));
                out.push_str(&g.source);
                out.push('\n');
            }
        }
        EmitStage::BuildInfo => {}
    }
    out
}

fn write_output(path: Option<&Path>, text: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("amc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{text}"),
    }
}
