mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_json;
pub use progress::RunProgress;
pub use styling::{dim, magenta_bold};
pub use summary::{print_history, print_plan, print_run_summary};

/// Prints the `stagegate` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🚦 stagegate"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Pipeline runner with stage gates")
    );
}
