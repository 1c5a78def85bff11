mod init;

use std::path::{Path, PathBuf};

use crate::cli::commands::*;
use crate::cli::output;
use crate::editor::selection::Selection;
use crate::editor::session::{EditorSession, Level, StepDraft};
use crate::io::config_io::{read_catalog, read_config};
use crate::io::file_store::JsonFileStore;
use crate::io::store::RemoteStore;
use crate::model::catalog::DefinitionCatalog;
use crate::model::step::{
    BranchKind, ConfigValue, DefinitionId, FieldValue, ParentId, StepField, StepId,
};
use crate::ops::check;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Run one parsed command line.
pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;
    let dir = project_dir(cli.project_dir.as_deref())?;

    match cli.command {
        Commands::Init(args) => init::cmd_init(&dir, args),

        // Read commands
        Commands::Show => cmd_show(&dir, json),
        Commands::Check => cmd_check(&dir, json),

        // Write commands
        Commands::Add(args) => cmd_add(&dir, args, json),
        Commands::Mv(args) => cmd_mv(&dir, args),
        Commands::Rm(args) => cmd_rm(&dir, args),
        Commands::Edit(args) => cmd_edit(&dir, args),
        Commands::Trigger(cmd) => cmd_trigger(&dir, cmd),
    }
}

fn project_dir(override_dir: Option<&str>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match override_dir {
        Some(dir) => Ok(std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?),
        None => Ok(std::env::current_dir()?),
    }
}

// ---------------------------------------------------------------------------
// Session plumbing
// ---------------------------------------------------------------------------

struct OpenProject {
    session: EditorSession,
    store: JsonFileStore,
}

fn open_project(dir: &Path) -> Result<OpenProject, Box<dyn std::error::Error>> {
    let config = read_config(dir)?;
    let catalog = read_catalog(dir)?;
    let mut store = JsonFileStore::open(dir)
        .map_err(|_| format!("no workflow in {}; run `flowedit init`", dir.display()))?;
    let snapshot = store.load()?;
    let session = EditorSession::open(snapshot, Box::new(catalog), config);
    Ok(OpenProject { session, store })
}

impl OpenProject {
    /// Persist everything the session queued, then report what happened.
    /// Any error notification means the change did not stick.
    fn settle(mut self) -> CmdResult {
        self.session.pump(&mut self.store);
        if self.session.needs_resync() {
            self.session.resync(&mut self.store)?;
        }
        let notes = self.session.take_notifications();
        output::print_notifications(&notes);
        if notes.iter().any(|n| n.level == Level::Error) {
            return Err("change was not saved".into());
        }
        Ok(())
    }
}

fn parse_branch(raw: Option<&str>) -> Result<Option<BranchKind>, Box<dyn std::error::Error>> {
    match raw {
        Some(b) => Ok(Some(b.parse::<BranchKind>()?)),
        None => Ok(None),
    }
}

fn parse_parent(raw: &str) -> ParentId {
    match raw.parse::<ParentId>() {
        Ok(p) => p,
        Err(never) => match never {},
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_show(dir: &Path, json: bool) -> CmdResult {
    let mut project = open_project(dir)?;
    output::print_notifications(&project.session.take_notifications());
    let workflow = project.session.workflow();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output::workflow_to_json(workflow))?
        );
    } else {
        println!("{}", output::render_outline(workflow));
    }
    Ok(())
}

fn cmd_check(dir: &Path, json: bool) -> CmdResult {
    let catalog = read_catalog(dir)?;
    let mut store = JsonFileStore::open(dir)?;
    let snapshot = store.load()?;
    let result = check::check_workflow(&snapshot.workflow, &catalog);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.errors.is_empty() {
            println!("Errors:");
            for err in &result.errors {
                println!("  {}", err);
            }
        }
        if !result.warnings.is_empty() {
            if !result.errors.is_empty() {
                println!();
            }
            println!("Warnings:");
            for warn in &result.warnings {
                println!("  {}", warn);
            }
        }
        if result.errors.is_empty() && result.warnings.is_empty() {
            println!("ok");
        }
    }

    if !result.valid {
        return Err(format!("{} error(s) found", result.errors.len()).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_add(dir: &Path, args: AddArgs, json: bool) -> CmdResult {
    let mut project = open_project(dir)?;
    let session = &mut project.session;

    let definition = DefinitionId::new(args.definition);
    let title = match args.title {
        Some(t) => t,
        None => session
            .catalog()
            .lookup(&definition)
            .map(|d| d.title.clone())
            .ok_or_else(|| format!("unknown definition: {}", definition))?,
    };
    let mut draft = StepDraft::new(definition.as_str(), title);
    draft.comment = args.comment.unwrap_or_default();
    for pair in &args.set {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", pair))?;
        draft = draft.with_value(key, ConfigValue::parse_literal(value));
    }

    let parent = parse_parent(&args.parent);
    let branch = parse_branch(args.branch.as_deref())?;
    let position = args.position.unwrap_or(usize::MAX);
    let id = session.request_insert(parent, branch, position, draft)?;

    project.settle()?;
    if json {
        println!("{}", serde_json::json!({ "id": id }));
    } else {
        println!("{}", id);
    }
    Ok(())
}

fn cmd_mv(dir: &Path, args: MvArgs) -> CmdResult {
    let mut project = open_project(dir)?;
    let session = &mut project.session;
    let step = StepId::new(args.id);
    let current = session
        .workflow()
        .tree
        .get(&step)
        .ok_or_else(|| format!("step not found: {}", step))?;

    let (parent, branch) = match args.parent.as_deref() {
        Some(p) => (parse_parent(p), parse_branch(args.branch.as_deref())?),
        None => (
            current.parent.clone(),
            parse_branch(args.branch.as_deref())?.or(Some(current.branch)),
        ),
    };
    let position = args.position.unwrap_or(usize::MAX);
    if !session.request_move(step.clone(), parent, branch, position)? {
        eprintln!("{} is already there", step);
    }
    project.settle()
}

fn cmd_rm(dir: &Path, args: RmArgs) -> CmdResult {
    let mut project = open_project(dir)?;
    let session = &mut project.session;
    let step = StepId::new(args.id);
    session.select_step(&step)?;
    session.request_delete(Selection::Action(step))?;
    session.confirm_dialog()?;
    project.settle()
}

fn cmd_edit(dir: &Path, args: EditArgs) -> CmdResult {
    let mut project = open_project(dir)?;
    let field: StepField = args.field.parse()?;
    let value = match (&field, args.value) {
        (_, None) => FieldValue::Unset,
        (StepField::Config(_), Some(raw)) => FieldValue::Config(ConfigValue::parse_literal(&raw)),
        (_, Some(text)) => FieldValue::Text(text),
    };
    project
        .session
        .request_edit(StepId::new(args.id), field, value)?;
    project.settle()
}

fn cmd_trigger(dir: &Path, cmd: TriggerCmd) -> CmdResult {
    let mut project = open_project(dir)?;
    let session = &mut project.session;
    match cmd.action {
        TriggerAction::Set(args) => {
            let definition = DefinitionId::new(args.definition);
            let title = match args.title {
                Some(t) => t,
                None => session
                    .catalog()
                    .lookup(&definition)
                    .map(|d| d.title.clone())
                    .ok_or_else(|| format!("unknown definition: {}", definition))?,
            };
            session.choose_trigger(definition, title)?;
        }
        TriggerAction::Clear => {
            session.request_delete(Selection::Trigger)?;
            session.confirm_dialog()?;
        }
    }
    project.settle()
}
