//! querygate binary entry point.

use clap::Parser;
use querygate::cli::{Cli, execute};

fn main() {
    let cli = Cli::parse();
    querygate::logging::init(cli.verbose);

    match execute(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                #[allow(clippy::print_stdout)]
                {
                    println!("{output}");
                }
            }
        }
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {e}");
            }
            std::process::exit(1);
        }
    }
}
