use super::super::args::*;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let global = cli.global;
    match cli.cmd {
        Command::Build(args) => super::build::run(&global, args).await,
        Command::Frames(args) => super::frames::run(&global, args).await,
        Command::Chart(args) => super::chart::run(&global, args).await,
        Command::Locations(args) => super::locations::run(&global, args).await,
        Command::Upload(args) => super::upload::run(&global, args).await,
        Command::Cache(args) => super::cache::run(&global, args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
