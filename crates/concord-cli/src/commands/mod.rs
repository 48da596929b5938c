use anyhow::Result;

use crate::args::Command;

mod assess;
mod ledger;
mod resolve;
mod schema;
mod validate;

/// Run a subcommand and return the process exit code.
pub fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Resolve(args) => resolve::run(args),
        Command::Validate(args) => validate::run(args),
        Command::Assess(args) => assess::run(args),
        Command::Ledger(command) => ledger::run(command),
        Command::Schema => schema::run(),
    }
}
