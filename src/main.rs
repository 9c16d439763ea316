use anyhow::{Context, Result};
use forgeline::agent::{AgentFilesystem, BuildQueue};
use forgeline::cli::commands::{ModulesCommand, RunCommand, ValidateCommand};
use forgeline::cli::output::*;
use forgeline::cli::{Cli, Command};
use forgeline::core::{BuildStatus, ProjectConfig, StageKind};
use forgeline::execution::{PipelineEvent, PipelineRunner};
use forgeline::modules::{register_builtin_modules, ModuleLoader, ModuleRegistry, PluginSettings};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_build(cmd).await?,
        Command::Validate(cmd) => validate_project(cmd).await?,
        Command::Modules(cmd) => list_modules(cmd).await?,
    }

    Ok(())
}

/// Built-in modules plus whatever the plugin directory provides
async fn load_registry(plugins: Option<&Path>, settings: PluginSettings) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    register_builtin_modules(&mut registry).context("Failed to register built-in modules")?;

    if let Some(dir) = plugins {
        let report = ModuleLoader::load_all(&mut registry, dir, &settings)
            .await
            .with_context(|| format!("Failed to load plugins from {}", dir.display()))?;
        for (path, reason) in &report.skipped {
            println!("{} Skipped plugin {}: {}", WARN, style(path.display()).dim(), reason);
        }
        for (info, reason) in &report.rejected {
            println!("{} Rejected module {}: {}", WARN, style(&info.name).dim(), reason);
        }
    }

    Ok(registry)
}

fn load_project(path: &Path, registry: &ModuleRegistry) -> Result<ProjectConfig> {
    let discriminators = registry
        .type_discriminators()
        .context("Installed modules disagree on step config names")?;
    ProjectConfig::from_file(path, &discriminators)
        .with_context(|| format!("Failed to load project document {}", path.display()))
}

async fn run_build(cmd: &RunCommand) -> Result<()> {
    let settings = PluginSettings {
        execute_timeout_secs: cmd.step_timeout,
        ..PluginSettings::default()
    };
    let registry = load_registry(cmd.plugins.as_deref(), settings).await?;
    let project = load_project(&cmd.file, &registry)?;

    println!(
        "{} Loaded project: {} ({} targets)",
        INFO,
        style(&project.name).bold(),
        style(project.targets().len()).cyan()
    );

    let spinner = create_spinner("Waiting for the build to start");
    let printer = spinner.clone();
    let loader = Arc::new(ModuleLoader::new(Arc::new(registry)));
    let runner = PipelineRunner::new(loader).with_event_handler(move |event| {
        if let PipelineEvent::StageStarted { stage, .. } = &event {
            printer.set_message(format!("Running {} stage", stage));
        }
        printer.println(format_event(&event));
    });

    let queue = BuildQueue::new(Arc::new(runner));
    let filesystem = match &cmd.base_dir {
        Some(dir) => AgentFilesystem::new(dir),
        None => AgentFilesystem::platform_default(),
    };
    queue
        .start_queue(&filesystem)
        .await
        .context("Failed to start the build queue")?;

    let build = queue
        .enqueue_build(Arc::new(project), cmd.target.as_deref())
        .await
        .context("Build request rejected")?;

    let finished = tokio::select! {
        result = queue.wait_for(build.id) => result?,
        _ = tokio::signal::ctrl_c() => {
            spinner.println(format!("{} Cancelling build #{}", WARN, build.id));
            queue.cancel_build(build.id).await?;
            queue.wait_for(build.id).await?
        }
    };
    spinner.finish_and_clear();

    println!();
    if let Some(results) = &finished.results {
        println!("{} {}", INFO, style(&results.target).bold());
        for line in format_stage_table(results) {
            println!("{}", line);
        }
    }

    if cmd.show_log {
        println!("\n{}", style("Build log:").bold());
        for line in finished.log.lines() {
            println!("  {}", format_log_line(&line));
        }
    }

    if let Some(error) = &finished.error {
        warn!("{}", error);
    }

    let icon = match finished.status {
        BuildStatus::Complete => CHECK,
        _ => CROSS,
    };
    println!(
        "\n{} Build #{} of {} {}",
        icon,
        finished.id,
        style(&finished.project_name).bold(),
        format_status(finished.status)
    );

    if finished.status != BuildStatus::Complete {
        std::process::exit(1);
    }

    Ok(())
}

async fn validate_project(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating project...", INFO);

    let registry = load_registry(cmd.plugins.as_deref(), PluginSettings::default()).await?;
    let loader = ModuleLoader::new(Arc::new(registry));

    let result = load_project(&cmd.file, loader.registry()).and_then(|project| {
        for target in project.targets() {
            loader
                .validate_target(target)
                .with_context(|| format!("Target '{}' is not runnable", target.name))?;
        }
        Ok(project)
    });

    match result {
        Ok(project) => {
            println!("{} Project document is valid!", CHECK);
            println!("  Name: {}", style(&project.name).bold());
            for target in project.targets() {
                let counts: Vec<String> = StageKind::ALL
                    .iter()
                    .map(|stage| format!("{} {}", target.steps(*stage).len(), stage))
                    .collect();
                println!("  Target {}: {}", style(&target.name).cyan(), counts.join(", "));
            }

            if cmd.json {
                let targets: Vec<_> = project
                    .targets()
                    .iter()
                    .map(|target| {
                        let stages: serde_json::Map<String, serde_json::Value> = StageKind::ALL
                            .iter()
                            .map(|stage| {
                                let steps: Vec<&str> =
                                    target.steps(*stage).iter().map(|step| step.name()).collect();
                                (stage.to_string(), serde_json::json!(steps))
                            })
                            .collect();
                        serde_json::json!({ "name": target.name, "stages": stages })
                    })
                    .collect();
                let data = serde_json::json!({ "name": project.name, "targets": targets });
                println!("\n{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_modules(cmd: &ModulesCommand) -> Result<()> {
    let registry = load_registry(cmd.plugins.as_deref(), PluginSettings::default()).await?;
    let infos = registry.infos();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("{} Installed modules:", INFO);
    for info in &infos {
        println!("{}", format_module(info));
    }

    Ok(())
}
