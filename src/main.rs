use clap::Parser;
use podtrace::cli::{self, trace::TraceCliOpts};

#[tokio::main]
async fn main() {
    let options = TraceCliOpts::parse();

    podtrace::init_logger(Some(options.verbosity.log_level_filter()));

    match podtrace::trace::trace_cli_run(&options).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}
