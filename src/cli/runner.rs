use clap::Parser;
use podtrace_core::Tracer;

use super::Verbosity;

pub const NAME: &str = "podtrace-runner";

/// Flags the operator-built Job passes to the in-cluster runner. Defaults
/// line up with the manifest: the program ConfigMap is mounted at
/// `/programs` and node-scoped traces leave the pod coordinates empty.
#[derive(Parser, Debug, Clone)]
#[clap(name = NAME, version = crate::metadata::VERSION)]
#[clap(about = "Execute a tracer against this node's processes")]
pub struct RunnerOpts {
    /// Tracer executing the program
    #[clap(long, default_value_t = Tracer::default())]
    pub tracer: Tracer,
    /// UID of the pod to trace; empty for node-scoped traces
    #[clap(long, default_value = "")]
    pub pod_uid: String,
    /// Container id within the pod, runtime prefix already stripped
    #[clap(long, default_value = "")]
    pub container_id: String,
    /// Process selector narrowing the traced process inside the container
    #[clap(long, default_value = "")]
    pub process_selector: String,
    /// Program to run: a file for bpftrace, a tool name for bcc/fake
    #[clap(long, default_value = "/programs/program.bt")]
    pub program: String,
    /// Extra argument handed to the tracer, repeatable
    #[clap(long = "args", allow_hyphen_values = true)]
    pub program_args: Vec<String>,
    #[clap(flatten)]
    pub verbosity: Verbosity,
}
