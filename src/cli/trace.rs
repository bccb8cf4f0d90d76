use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use podtrace_core::Tracer;

use super::Verbosity;

pub const NAME: &str = "podtrace";

/// Image the trace job runs unless `--imagename` overrides it.
pub const DEFAULT_RUNNER_IMAGE: &str = "ghcr.io/podtrace/podtrace-runner:latest";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME, version = crate::metadata::VERSION)]
#[clap(about = "Schedule tracing programs on Kubernetes workloads")]
pub struct TraceCliOpts {
    /// Kubernetes namespace to operate in. Defaults to the kubeconfig
    /// current-context namespace
    #[clap(short = 'n', long, global = true)]
    pub namespace: Option<String>,
    #[clap(flatten)]
    pub verbosity: Verbosity,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a tracing program against a node, pod or deployment
    Run(Run),
    /// List trace jobs
    Get(Get),
    /// Print the output of a running trace
    Logs(Logs),
    /// Delete trace jobs and the programs they carry
    Delete(Delete),
}

#[derive(Args, Debug, Clone)]
#[clap(group = ArgGroup::new("program-source").required(true))]
pub struct Run {
    /// Trace target: a bare node name, or `node/NAME`, `pod/NAME`,
    /// `deployment/NAME`
    pub resource: String,
    /// Container to trace, for pods running more than one
    #[clap(conflicts_with = "container")]
    pub container_arg: Option<String>,
    /// Container to trace, for pods running more than one
    #[clap(short = 'c', long)]
    pub container: Option<String>,
    /// Literal program to run
    #[clap(short = 'e', long, group = "program-source")]
    pub eval: Option<String>,
    /// File containing the program to run
    #[clap(short = 'f', long, group = "program-source")]
    pub filename: Option<PathBuf>,
    /// Program shipped with the tracer image, e.g. a bcc tool name
    #[clap(long, group = "program-source")]
    pub program: Option<String>,
    /// Tracer executing the program
    #[clap(long, default_value_t = Tracer::default())]
    pub tracer: Tracer,
    /// Process selector narrowing the traced process inside the container,
    /// e.g. 'exe=ruby,pid=last'
    #[clap(long, default_value = "")]
    pub process_selector: String,
    /// Extra argument handed to the tracer, repeatable
    #[clap(long = "args", allow_hyphen_values = true)]
    pub program_args: Vec<String>,
    /// Namespace the target pod or deployment lives in. Defaults to the
    /// operating namespace
    #[clap(long)]
    pub target_namespace: Option<String>,
    /// Service account the trace job runs under
    #[clap(long = "serviceaccount", default_value = "default")]
    pub service_account: String,
    /// Runner image the trace job executes
    #[clap(long = "imagename", default_value = DEFAULT_RUNNER_IMAGE)]
    pub image: String,
    /// Seconds the trace is allowed to run before it is interrupted
    #[clap(long, default_value_t = 3600)]
    pub deadline: i64,
    /// Seconds granted after the deadline for the tracer to print its maps
    #[clap(long, default_value_t = 30)]
    pub deadline_grace_period: i64,
}

impl Run {
    /// The explicit container, whichever way it was passed.
    pub fn target_container(&self) -> Option<&str> {
        self.container
            .as_deref()
            .or(self.container_arg.as_deref())
    }
}

#[derive(Args, Debug, Clone)]
pub struct Get {
    /// Only show the trace with this id
    pub trace_id: Option<String>,
    /// List traces across all namespaces
    #[clap(long)]
    pub all_namespaces: bool,
}

#[derive(Args, Debug, Clone)]
pub struct Logs {
    /// Trace id or trace job name
    pub trace: String,
    /// Keep streaming new output
    #[clap(short = 'f', long)]
    pub follow: bool,
}

#[derive(Args, Debug, Clone)]
#[clap(group = ArgGroup::new("selection").required(true))]
pub struct Delete {
    /// Trace id or trace job name to delete
    #[clap(group = "selection")]
    pub trace: Option<String>,
    /// Delete every trace in the namespace
    #[clap(long, group = "selection")]
    pub all: bool,
}
