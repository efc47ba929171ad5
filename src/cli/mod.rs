pub mod args;
pub mod description;

use clap::Parser;

pub use args::Arguments;

pub fn parse() -> Arguments {
    Arguments::parse()
}
