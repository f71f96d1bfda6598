use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use ustrace::catalog::{self, ContextKind};
use ustrace::cli::{Cli, OutputFormat};
use ustrace::config::TracerConfig;
use ustrace::context::ContextRegistry;
use ustrace::interpose::INTERPOSER;
use ustrace::report::{self, JsonReport};

/// Print one report, one line per report in JSON mode
fn emit(report: &JsonReport, format: OutputFormat) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Text => write!(stdout, "{}", report::to_text(report))?,
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::to_string(report)?)?,
    }
    stdout.flush()?;
    Ok(())
}

fn run_forked(registry: &ContextRegistry, cli: &Cli) -> Result<()> {
    let pid = INTERPOSER.fork().context("fork interposer unavailable")?;
    match pid {
        -1 => bail!("fork failed: {}", std::io::Error::last_os_error()),
        0 => {
            let code = match report::capture(registry, 1, cli.payload.as_bytes(), "child")
                .map_err(anyhow::Error::from)
                .and_then(|report| emit(&report, cli.format))
            {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("ustrace child: {e:#}");
                    1
                }
            };
            std::process::exit(code);
        }
        child => {
            let status = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(child), None)
                .context("waitpid failed")?;
            tracing::debug!(?status, "child exited");
            match status {
                nix::sys::wait::WaitStatus::Exited(_, 0) => Ok(()),
                other => bail!("child did not exit cleanly: {other:?}"),
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TracerConfig::from_env();
    if cli.debug {
        config = config.with_debug(true);
    }
    if let Some(path) = &cli.clock_plugin {
        config = config.with_clock_plugin(path);
    }
    ustrace::init_with(&config);

    if cli.list {
        for kind in ContextKind::all() {
            println!("{kind}");
        }
        return Ok(());
    }

    let mut registry = ContextRegistry::new();
    catalog::attach_all(&mut registry, cli.context_names())
        .context("failed to attach context fields")?;
    tracing::debug!(fields = ?registry.names(), "context fields attached");

    let report = report::capture(&registry, cli.events as usize, cli.payload.as_bytes(), "parent")?;
    emit(&report, cli.format)?;

    if cli.fork {
        run_forked(&registry, &cli)?;
    }

    Ok(())
}
