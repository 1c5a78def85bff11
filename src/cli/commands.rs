use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flowedit", about = concat!("flowedit v", env!("CARGO_PKG_VERSION"), " - edit workflow step trees"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different project directory
    #[arg(short = 'C', long = "project-dir", global = true)]
    pub project_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create catalog.toml, flowedit.toml and an empty workflow.json
    Init(InitArgs),
    /// Print the workflow as an indented outline
    Show,
    /// Validate the stored workflow
    Check,
    /// Insert a new step
    Add(AddArgs),
    /// Move a step (with its children) to another position or parent
    Mv(MvArgs),
    /// Delete a step and everything below it
    Rm(RmArgs),
    /// Change a step's title, comment or a configuration value
    Edit(EditArgs),
    /// Set or clear the workflow trigger
    Trigger(TriggerCmd),
}

#[derive(Args)]
pub struct InitArgs {
    /// Workflow name (default: directory name)
    #[arg(long)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct AddArgs {
    /// Action definition id from the catalog
    pub definition: String,
    /// Step title (default: the definition's title)
    #[arg(long)]
    pub title: Option<String>,
    /// Parent step id, or "root"
    #[arg(long, default_value = "root")]
    pub parent: String,
    /// Branch of the parent (default: the parent's first branch)
    #[arg(long)]
    pub branch: Option<String>,
    /// Position among siblings (default: last)
    #[arg(long)]
    pub position: Option<usize>,
    /// Comment attached to the step
    #[arg(long)]
    pub comment: Option<String>,
    /// Configuration value as KEY=VALUE (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

#[derive(Args)]
pub struct MvArgs {
    /// Step to move
    pub id: String,
    /// New parent step id, or "root" (default: current parent)
    #[arg(long)]
    pub parent: Option<String>,
    /// Branch of the new parent
    #[arg(long)]
    pub branch: Option<String>,
    /// Position among the new siblings (default: last)
    #[arg(long)]
    pub position: Option<usize>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Step to delete
    pub id: String,
}

#[derive(Args)]
pub struct EditArgs {
    /// Step to edit
    pub id: String,
    /// title, comment or config.KEY
    pub field: String,
    /// New value; configuration values are parsed as bool, number or text
    #[arg(required_unless_present = "unset")]
    pub value: Option<String>,
    /// Remove a configuration value
    #[arg(long, conflicts_with = "value")]
    pub unset: bool,
}

#[derive(Args)]
pub struct TriggerCmd {
    #[command(subcommand)]
    pub action: TriggerAction,
}

#[derive(Subcommand)]
pub enum TriggerAction {
    /// Choose the trigger definition
    Set(TriggerSetArgs),
    /// Remove the trigger
    Clear,
}

#[derive(Args)]
pub struct TriggerSetArgs {
    /// Trigger definition id from the catalog
    pub definition: String,
    /// Trigger title (default: the definition's title)
    #[arg(long)]
    pub title: Option<String>,
}
