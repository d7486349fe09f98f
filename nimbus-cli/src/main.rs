mod output;
mod state;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;

use nimbus_core::document::Document;
use nimbus_core::interpreter::{Interpreter, StateMap};
use nimbus_core::provider::Provider;
use nimbus_core::registry::ProviderRegistry;
use nimbus_core::resource::ResourceId;
use nimbus_provider_flexibleengine::{FakeCloud, ProviderConfig};

use state::LocalState;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "Declarative FlexibleEngine resources from a JSON document", long_about = None)]
struct Cli {
    /// Provider settings file; `OS_*` variables are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against an in-memory cloud; nothing persists between runs
    #[arg(long, global = true)]
    simulated: bool,

    /// Local state file
    #[arg(long, global = true, default_value = LocalState::DEFAULT_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List resource kinds and data sources, or describe one
    Schema {
        /// Kind to describe
        name: Option<String>,

        /// Describe the data source of that name
        #[arg(long)]
        data: bool,
    },
    /// Validate the document against the schemas
    Validate {
        /// Path to the JSON document
        #[arg(default_value = "main.json")]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        #[arg(default_value = "main.json")]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        #[arg(default_value = "main.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy every resource in the state file
    Destroy {
        /// Document whose dependency order is used, when it exists
        #[arg(default_value = "main.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Bring an existing object under management
    Import {
        /// Address in the document, `type.name`
        address: String,

        /// Vendor identifier, `<parent>/<child>` for nested kinds
        id: String,
    },
    /// Print shell completions
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "nimbus", &mut io::stdout());
        return Ok(());
    }

    let registry = Arc::new(provider(cli.config.as_deref(), cli.simulated)?);
    let local = LocalState::new(cli.state);
    match cli.command {
        Commands::Schema { name, data } => run_schema(&registry, name.as_deref(), data),
        Commands::Validate { file } => run_validate(&registry, &file),
        Commands::Plan { file } => run_plan(registry, &local, &file).await,
        Commands::Apply { file, auto_approve } => {
            cancel_on_interrupt(&registry);
            run_apply(registry, &local, &file, auto_approve).await
        }
        Commands::Destroy { file, auto_approve } => {
            cancel_on_interrupt(&registry);
            run_destroy(registry, &local, &file, auto_approve).await
        }
        Commands::Import { address, id } => run_import(registry, &local, &address, &id).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn provider(config: Option<&Path>, simulated: bool) -> Result<ProviderRegistry> {
    if simulated {
        log::info!("using the simulated cloud");
        return Ok(nimbus_provider_flexibleengine::simulated(Arc::new(FakeCloud::new()))?);
    }
    let config = match config {
        Some(path) => ProviderConfig::load(path)?,
        None => ProviderConfig::from_env()?,
    };
    nimbus_provider_flexibleengine::from_config(config).context("failed to configure the provider")
}

/// Ctrl-C cancels in-flight waits instead of killing the process mid-call
fn cancel_on_interrupt(registry: &ProviderRegistry) {
    let token = registry.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling pending operations...".yellow());
            token.cancel();
        }
    });
}

fn run_schema(registry: &ProviderRegistry, name: Option<&str>, data: bool) -> Result<()> {
    let Some(name) = name else {
        println!("{}", "Resources:".cyan().bold());
        for kind in registry.resources() {
            println!("  {}", kind.name());
        }
        println!("{}", "Data sources:".cyan().bold());
        for kind in registry.data_sources() {
            println!("  {}", kind.name());
        }
        return Ok(());
    };

    let what = if data { "data source" } else { "resource kind" };
    let schema = registry
        .schema(name, data)
        .with_context(|| format!("unknown {} '{}'", what, name))?;
    output::print_schema(schema);
    Ok(())
}

/// Every validation error in the document, not only the first
fn validation_errors<P: Provider + ?Sized>(
    provider: &P,
    document: &Document,
) -> Result<Vec<String>> {
    let ordered = document.ordered()?;
    Ok(ordered
        .iter()
        .filter_map(|resource| provider.validate(resource).err())
        .map(|e| e.to_string())
        .collect())
}

fn run_validate(registry: &ProviderRegistry, file: &Path) -> Result<()> {
    let document = Document::load(file)?;
    println!("{}", "Validating...".cyan());

    let errors = validation_errors(registry, &document)?;
    if !errors.is_empty() {
        bail!("{}", errors.join("\n"));
    }

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", document.resources().len())
            .green()
            .bold()
    );
    for resource in document.resources() {
        let prefix = if resource.is_data_source() { "data." } else { "" };
        println!("  • {}{}", prefix, resource.id);
    }
    Ok(())
}

async fn refreshed(
    interpreter: &Interpreter<Arc<ProviderRegistry>>,
    local: &LocalState,
) -> Result<(state::StateFile, StateMap)> {
    let file = local.read()?;
    let states = interpreter.refresh(&file.states()?).await?;
    Ok((file, states))
}

async fn run_plan(registry: Arc<ProviderRegistry>, local: &LocalState, file: &Path) -> Result<()> {
    let document = Document::load(file)?;
    let interpreter = Interpreter::new(registry);
    let (_, states) = refreshed(&interpreter, local).await?;

    let plan = interpreter.plan(&document, &states).await?;
    output::print_plan(&plan, interpreter.provider());
    Ok(())
}

async fn run_apply(
    registry: Arc<ProviderRegistry>,
    local: &LocalState,
    file: &Path,
    auto_approve: bool,
) -> Result<()> {
    let document = Document::load(file)?;
    let interpreter = Interpreter::new(registry);
    let (mut state_file, mut states) = refreshed(&interpreter, local).await?;

    let plan = interpreter.plan(&document, &states).await?;
    if plan.is_empty() {
        state_file.record(&states);
        local.write(&state_file)?;
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    output::print_plan(&plan, interpreter.provider());
    println!();
    if !auto_approve && !confirm("Do you want to perform these actions?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();
    let result = interpreter.apply(&plan, &mut states).await;

    state_file.record(&states);
    local.write(&state_file)?;
    output::print_apply_result(&result);
    if !result.is_success() {
        bail!("{} of {} changes failed", result.failure_count, result.outcomes.len());
    }
    Ok(())
}

async fn run_destroy(
    registry: Arc<ProviderRegistry>,
    local: &LocalState,
    file: &Path,
    auto_approve: bool,
) -> Result<()> {
    let document = if file.exists() {
        Some(Document::load(file)?)
    } else {
        None
    };
    let interpreter = Interpreter::new(registry);
    let (mut state_file, mut states) = refreshed(&interpreter, local).await?;

    if states.is_empty() {
        println!("{}", "No resources in state.".yellow());
        return Ok(());
    }

    println!("{}", "The following resources will be destroyed:".red().bold());
    let mut ids: Vec<&ResourceId> = states.keys().collect();
    ids.sort();
    for id in ids {
        println!("  {} {}", "-".red().bold(), id);
    }
    println!();
    if !auto_approve && !confirm("Do you really want to destroy all resources?")? {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    let result = interpreter.destroy(document.as_ref(), &mut states).await;
    state_file.record(&states);
    local.write(&state_file)?;
    output::print_apply_result(&result);
    if !result.is_success() {
        bail!("{} resources could not be destroyed", result.failure_count);
    }
    Ok(())
}

async fn run_import(
    registry: Arc<ProviderRegistry>,
    local: &LocalState,
    address: &str,
    import_id: &str,
) -> Result<()> {
    let id = ResourceId::parse_address(address)
        .with_context(|| format!("'{}' is not a `type.name` address", address))?;
    let interpreter = Interpreter::new(registry);
    let mut state_file = local.read()?;
    let mut states = state_file.states()?;
    if states.contains_key(&id) {
        bail!("{} is already managed; remove it from the state first", id);
    }

    let imported = interpreter.import(&id, import_id, &mut states).await?;
    state_file.record(&states);
    local.write(&state_file)?;

    println!("{} {}", "✓ Imported".green().bold(), id);
    for (key, value) in imported.flatten() {
        println!("    {} = {}", key, value);
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    println!("{}", question.yellow().bold());
    print!("  Only 'yes' will be accepted: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    println!();
    Ok(input.trim() == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::resource::Value;

    const DOCUMENT: &str = r#"{
        "resources": [
            {"type": "flexibleengine_vpc_v1", "name": "main",
             "attributes": {"name": "vpc-1", "cidr": "192.168.0.0/16"}},
            {"type": "flexibleengine_vpc_subnet_v1", "name": "sub",
             "attributes": {"name": "subnet-1", "cidr": "192.168.0.0/24", "gateway_ip": "192.168.0.1",
                            "vpc_id": "${flexibleengine_vpc_v1.main.id}"}}
        ]
    }"#;

    fn simulated() -> Arc<ProviderRegistry> {
        Arc::new(provider(None, true).unwrap())
    }

    fn write_document(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("main.json");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validation_reports_every_bad_resource() {
        let registry = simulated();
        let document = Document::parse(
            r#"{"resources": [
                {"type": "flexibleengine_vpc_v1", "name": "a", "attributes": {"name": "a", "cidr": "10.0.0.0/33"}},
                {"type": "flexibleengine_vpc_v1", "name": "b", "attributes": {"cidr": "10.1.0.0/16"}}
            ]}"#,
        )
        .unwrap();

        let errors = validation_errors(&*registry, &document).unwrap();
        assert_eq!(errors.len(), 2, "{:?}", errors);
    }

    #[tokio::test]
    async fn apply_records_state_and_destroy_empties_it() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_document(dir.path(), DOCUMENT);
        let local = LocalState::new(dir.path().join("nimbus.state.json"));
        let registry = simulated();

        run_apply(registry.clone(), &local, &file, true).await.unwrap();
        let stored = local.read().unwrap();
        assert_eq!(stored.resources.len(), 2);
        let states = stored.states().unwrap();
        let subnet = &states[&ResourceId::new("flexibleengine_vpc_subnet_v1", "sub")];
        let vpc = &states[&ResourceId::new("flexibleengine_vpc_v1", "main")];
        assert_eq!(subnet.get("vpc_id"), vpc.identifier.clone().map(Value::String));

        run_destroy(registry, &local, &file, true).await.unwrap();
        let stored = local.read().unwrap();
        assert!(stored.resources.is_empty());
        assert_eq!(stored.serial, 2);
    }

    #[tokio::test]
    async fn import_adds_an_unmanaged_object() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_document(dir.path(), DOCUMENT);
        let registry = simulated();
        let managed = LocalState::new(dir.path().join("managed.json"));
        run_apply(registry.clone(), &managed, &file, true).await.unwrap();
        let states = managed.read().unwrap().states().unwrap();
        let vpc_id = states[&ResourceId::new("flexibleengine_vpc_v1", "main")]
            .identifier
            .clone()
            .unwrap();

        let adopted = LocalState::new(dir.path().join("adopted.json"));
        run_import(registry.clone(), &adopted, "flexibleengine_vpc_v1.main", &vpc_id)
            .await
            .unwrap();
        let states = adopted.read().unwrap().states().unwrap();
        let vpc = &states[&ResourceId::new("flexibleengine_vpc_v1", "main")];
        assert_eq!(vpc.get("cidr"), Some(Value::string("192.168.0.0/16")));

        let err = run_import(registry.clone(), &adopted, "flexibleengine_vpc_v1.main", &vpc_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already managed"), "{}", err);

        let err = run_import(registry, &adopted, "not-an-address", "x").await.unwrap_err();
        assert!(err.to_string().contains("type.name"), "{}", err);
    }
}
