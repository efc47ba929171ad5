use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "biopieces",
    version = "0.1.0",
    about = "Run a record streaming pipeline described as BP.new.cmd(opts)...[.run(opts)]"
)]
pub struct Arguments {
    #[arg(help = "Pipeline description, e.g. 'read_fasta(input: \"in.fna\").grab(select: \"ATG\").write_fasta'")]
    pub description: String,

    #[arg(long, conflicts_with = "thread", help = "Run every command after the first in its own process")]
    pub fork: bool,

    #[arg(long, help = "Run commands as tasks on a multi-threaded runtime")]
    pub thread: bool,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, help = "Log each command's status when the run ends")]
    pub progress: bool,

    #[arg(short = 'i', long, help = "Text stream input for the first command; '-' for stdin")]
    pub input: Option<String>,

    #[arg(short = 'o', long, help = "Text stream output of the last command; '-' for stdout")]
    pub output: Option<String>,

    #[arg(long, help = "Mail the run status to this address")]
    pub email: Option<String>,

    #[arg(long, requires = "email")]
    pub subject: Option<String>,

    #[arg(long, help = "Directory for sort spill files and tool scratch files")]
    pub tmp_dir: Option<String>,

    #[arg(long, default_value_t = false, help = "Do not append this run to the history file")]
    pub no_history: bool,
}
