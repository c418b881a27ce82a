use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avis-mirror")]
#[command(about = "Mirrors Avis fiscal-year report folders between SharePoint sites")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Turn on debugging output")]
    pub debug: bool,

    /// Reserved; accepted but currently wired to no behavior.
    #[arg(short = 's', long, help = "Store file on server")]
    pub store: bool,
}
