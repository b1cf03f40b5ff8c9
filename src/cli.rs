use clap::Parser;

#[derive(Parser)]
#[command(version, about = "Burrow forwards a local port to a remote endpoint through an SSH server", long_about = None)]
pub(crate) struct BurrowCli {
    /// custom config file
    #[arg(short, long)]
    pub config: Option<String>,
    /// debug logging (overrides RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}
