use clap::Parser;
use podtrace::cli::{self, runner::RunnerOpts};

fn main() {
    let options = RunnerOpts::parse();

    podtrace::init_logger(Some(options.verbosity.log_level_filter()));

    match podtrace::runner::runner_run(&options) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}
