use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tagtrain_server::library::{SqliteLibraryStore, UserStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Manages users and their session tokens in a library database.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite library database file.
    #[clap(value_parser = parse_path)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a user with the given handle.
    Add { user_handle: String },

    /// Issues a new session token for the given user.
    Token { user_handle: String },

    /// Lists all user handles.
    List,
}

fn run(store: &dyn UserStore, command: Command) -> Result<String> {
    match command {
        Command::Add { user_handle } => {
            if store.get_user_id(&user_handle)?.is_some() {
                bail!("User {} already exists", user_handle);
            }
            let user_id = store.create_user(&user_handle)?;
            Ok(format!("Created user {} with id {}", user_handle, user_id))
        }
        Command::Token { user_handle } => {
            let user_id = store
                .get_user_id(&user_handle)?
                .with_context(|| format!("User {} not found", user_handle))?;
            store.create_auth_token(user_id)
        }
        Command::List => Ok(store.get_all_user_handles()?.join("\n")),
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let store = SqliteLibraryStore::new(&cli_args.db_path)
        .with_context(|| format!("Failed to open library database {:?}", cli_args.db_path))?;
    let output = run(&store, cli_args.command)?;
    println!("{}", output);
    Ok(())
}
