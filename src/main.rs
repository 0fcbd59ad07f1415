use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use pipetree::{
    attach, cascade, stage, task, tree, Config, Database, Response, Scope, StagePatch, TaskPatch,
};
use serde::Serialize;
use std::io;
use tracing_subscriber::EnvFilter;

/// Process exit codes
const EXIT_OK: i32 = 0;
const EXIT_NOT_FOUND: i32 = 1;
const EXIT_FAILURE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "pipetree")]
#[command(author, version, about = "Pipeline trees on a graph store. Nest boxes under pipelines, attach tasks, delete whole subtrees.")]
struct Cli {
    /// Author every request is made as
    #[arg(long, global = true, env = "PIPETREE_AUTHOR")]
    author: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and list projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage top-level pipelines of a project
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
    /// Manage boxes nested under pipelines or other boxes
    #[command(name = "box")]
    Stage {
        #[command(subcommand)]
        action: BoxAction,
    },
    /// Attach existing boxes or tasks under a pipeline or box
    Attach {
        #[arg(short, long)]
        project: String,
        /// Pipeline or box key
        parent: String,
        /// Box or task keys
        #[arg(required = true)]
        children: Vec<String>,
    },
    /// Print the nested tree under a pipeline or box
    Tree {
        #[arg(short, long)]
        project: String,
        id: String,
    },
    /// Manage tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    Create { name: String },
    List,
}

#[derive(Subcommand, Debug)]
enum PipelineAction {
    Create {
        #[arg(short, long)]
        project: String,
        name: String,
    },
    /// List pipelines with their boxes
    List {
        #[arg(short, long)]
        project: String,
    },
    Update {
        #[arg(short, long)]
        project: String,
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..=1))]
        complete: Option<i32>,
    },
    /// Delete a pipeline and every box below it
    Delete {
        #[arg(short, long)]
        project: String,
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum BoxAction {
    Create {
        #[arg(short, long)]
        project: String,
        /// Pipeline or box to nest under
        #[arg(long)]
        parent: String,
        name: String,
    },
    Update {
        #[arg(short, long)]
        project: String,
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..=1))]
        complete: Option<i32>,
    },
    /// Delete a box and every box below it
    Delete {
        #[arg(short, long)]
        project: String,
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    Create { name: String },
    Get { id: String },
    /// List the given tasks; unknown ids are skipped
    List {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Update every given task; unknown ids are skipped
    Update {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Detach a task from its boxes and delete it
    Delete { id: String },
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();
}

/// Print the envelope as JSON and map it to an exit code
fn emit<T: Serialize>(response: Response<T>) -> Result<i32> {
    let json = serde_json::to_string_pretty(&response).context("serializing response")?;
    println!("{}", json);
    Ok(if response.success {
        EXIT_OK
    } else {
        EXIT_NOT_FOUND
    })
}

struct Session<'a> {
    db: &'a Database,
    author: String,
}

impl Session<'_> {
    fn scope(&self, project: &str) -> Scope {
        Scope::new(self.author.clone(), project)
    }
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load();
    let level = match (&cli.log_level, &config) {
        (Some(level), _) => level.clone(),
        (None, Ok(config)) => config.log.level.clone(),
        (None, Err(_)) => "info".to_string(),
    };
    setup_logging(&level);

    let result = config
        .map_err(anyhow::Error::from)
        .and_then(|config| run(cli, &config));
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn run(cli: Cli, config: &Config) -> Result<i32> {
    let command = match cli.command {
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pipetree", &mut io::stdout());
            return Ok(EXIT_OK);
        }
        command => command,
    };

    let Some(author) = config.resolve_author(cli.author.as_deref()) else {
        bail!("no author: pass --author, set PIPETREE_AUTHOR, or add [identity] author to .pipetree/config.toml");
    };
    let path = Database::db_path(config);
    let db = Database::open(config)
        .with_context(|| format!("opening graph store at {}", path.display()))?;
    let session = Session { db: &db, author };

    match command {
        Command::Project { action } => project(&session, action),
        Command::Pipeline { action } => pipeline(&session, action),
        Command::Stage { action } => stage_box(&session, action),
        Command::Attach {
            project,
            parent,
            children,
        } => {
            let outcome = attach::attach(session.db, &session.scope(&project), &parent, &children)?;
            emit(Response::from_outcome(outcome))
        }
        Command::Tree { project, id } => {
            let outcome = tree::find_tree(session.db, &session.scope(&project), &id)?;
            emit(Response::from_outcome(outcome))
        }
        Command::Task { action } => tasks(&session, action),
        Command::Completion { .. } => Ok(EXIT_OK),
    }
}

fn project(session: &Session, action: ProjectAction) -> Result<i32> {
    match action {
        ProjectAction::Create { name } => {
            let created = stage::create_project(session.db, &name, &session.author)?;
            emit(Response::success(created))
        }
        ProjectAction::List => {
            let projects = stage::list_projects(session.db, &session.author)?;
            emit(Response::success(projects))
        }
    }
}

fn pipeline(session: &Session, action: PipelineAction) -> Result<i32> {
    match action {
        PipelineAction::Create { project, name } => {
            let outcome = stage::create_pipeline(session.db, &project, &name, &session.author)?;
            emit(Response::from_outcome(outcome))
        }
        PipelineAction::List { project } => {
            let outcome = stage::list_pipelines(session.db, &project, &session.author)?;
            emit(Response::from_outcome(
                outcome.map(|pipelines| serde_json::json!({ "pipelines": pipelines })),
            ))
        }
        PipelineAction::Update {
            project,
            id,
            name,
            complete,
        } => {
            let patch = StagePatch { name, complete };
            let outcome =
                stage::update_pipeline(session.db, &session.scope(&project), &id, &patch)?;
            emit(Response::from_outcome(outcome))
        }
        PipelineAction::Delete { project, id } => {
            let outcome = cascade::delete_subtree(session.db, &session.scope(&project), &id)?;
            emit(Response::from_outcome(outcome))
        }
    }
}

fn stage_box(session: &Session, action: BoxAction) -> Result<i32> {
    match action {
        BoxAction::Create {
            project,
            parent,
            name,
        } => {
            let outcome =
                stage::create_box(session.db, &project, &parent, &name, &session.author)?;
            emit(Response::from_outcome(outcome))
        }
        BoxAction::Update {
            project,
            id,
            name,
            complete,
        } => {
            let patch = StagePatch { name, complete };
            let outcome = stage::update_box(session.db, &session.scope(&project), &id, &patch)?;
            emit(Response::from_outcome(outcome))
        }
        BoxAction::Delete { project, id } => {
            let outcome = cascade::delete_subtree(session.db, &session.scope(&project), &id)?;
            emit(Response::from_outcome(outcome))
        }
    }
}

fn tasks(session: &Session, action: TaskAction) -> Result<i32> {
    let author = session.author.as_str();
    match action {
        TaskAction::Create { name } => emit(Response::success(task::create_task(
            session.db, author, &name,
        )?)),
        TaskAction::Get { id } => {
            emit(Response::from_outcome(task::get_task(session.db, author, &id)?))
        }
        TaskAction::List { ids } => emit(Response::success(task::tasks_by_keys(
            session.db, author, &ids,
        )?)),
        TaskAction::Update { ids, name, status } => {
            let patch = TaskPatch { name, status };
            emit(Response::success(task::update_tasks(
                session.db, author, &ids, &patch,
            )?))
        }
        TaskAction::Delete { id } => {
            emit(Response::from_outcome(task::delete_task(session.db, author, &id)?))
        }
    }
}
