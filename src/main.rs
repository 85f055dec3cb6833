#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use heyhy::cli::{Args, Command, ConvertArgs, FormatArgs};
use heyhy::codec::batch;
use heyhy::config::Settings;
use heyhy::exec::SystemRunner;
use heyhy::export;
use heyhy::host::{self, Operator, TerminalOperator};
use heyhy::port::LoopbackProbe;
use heyhy::service::deps::PHASE_ENV;
use heyhy::service::{
    DependencyPhase, InstallOutcome, InstallRequest, Orchestrator, UpdateRequest,
};

type HostOrchestrator = Orchestrator<SystemRunner, LoopbackProbe, TerminalOperator>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let is_verbose = args.verbose;
    tracing_subscriber::fmt()
        .with_max_level(if is_verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .init();

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns the exit code.
async fn run(args: Args) -> anyhow::Result<i32> {
    let settings = Settings::load(args.config.as_deref()).await?;
    if args.command.is_lifecycle() {
        host::preflight(&SystemRunner).await?;
    }

    let orchestrator = Orchestrator::new(SystemRunner, LoopbackProbe, TerminalOperator, settings)
        .with_dependency_phase(DependencyPhase::from_env());

    match args.command {
        Command::Install(install) => {
            let domain = match install.domain {
                Some(domain) => domain,
                None => TerminalOperator.ask_domain()?,
            };
            let request = InstallRequest {
                domain,
                password: install.password,
                ip: install.ip,
                port: install.port,
                image: install.image,
                cert: install.cert,
                key: install.key,
                assume_yes: install.assume_yes,
                domain_check: install.domain_check,
            };
            match orchestrator.install(request).await? {
                InstallOutcome::Installed { descriptor, .. } => {
                    print!("{}", export::render(&descriptor, &install.formats.selection())?);
                }
                InstallOutcome::RestartRequired => return relaunch().await,
                InstallOutcome::Cancelled => return Ok(1),
            }
        }
        Command::Update(update) => {
            let request = UpdateRequest {
                password: update.password,
                port: update.port,
                image: update.image,
                domain: update.domain,
            };
            let (_, descriptor) = orchestrator.update(request).await?;
            print!("{}", export::render(&descriptor, &update.formats.selection())?);
        }
        Command::Start => orchestrator.start().await?,
        Command::Stop => orchestrator.stop().await?,
        Command::Restart => orchestrator.restart().await?,
        Command::Remove => orchestrator.remove().await?,
        Command::Log => orchestrator.log().await?,
        Command::Status(formats) => status(&orchestrator, &formats).await?,
        Command::Convert(convert_args) => convert(&convert_args).await?,
    }
    Ok(0)
}

/// Runs this binary again, entering the dependency phase machine at `Ready`.
async fn relaunch() -> anyhow::Result<i32> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    tracing::info!("Relaunching {} with {}=ready", exe.display(), PHASE_ENV);
    let status = tokio::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .env(PHASE_ENV, "ready")
        .status()
        .await
        .with_context(|| format!("Failed to relaunch {}", exe.display()))?;
    Ok(status.code().unwrap_or(1))
}

async fn status(orchestrator: &HostOrchestrator, formats: &FormatArgs) -> anyhow::Result<()> {
    let report = orchestrator.status().await?;
    println!("Domain:    {}", report.domain.as_deref().unwrap_or("-"));
    println!("State:     {}", report.state);
    println!(
        "Container: {}",
        report.container_status.as_deref().unwrap_or("not found")
    );
    println!(
        "Config:    {}",
        if report.config_present {
            "present"
        } else {
            "missing"
        }
    );
    if let Some(descriptor) = &report.descriptor {
        println!();
        print!("{}", export::render(descriptor, &formats.selection())?);
    }
    Ok(())
}

async fn convert(args: &ConvertArgs) -> anyhow::Result<()> {
    let input = match &args.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let output = if batch::is_proxy_list_document(&input) {
        tracing::info!("Converting proxy list to share links");
        let report = batch::proxy_list_to_links(&input)?;
        let mut text = report.links.join("\n");
        text.push('\n');
        text
    } else {
        tracing::info!("Converting links to a proxy list");
        batch::links_to_proxy_list(&input).to_yaml()?
    };

    write_output(args.output.as_deref(), &output).await
}

async fn write_output(path: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
