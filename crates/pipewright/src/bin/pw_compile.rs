//! pw-compile - Compile an aggregation config into a pipeline.

fn main() -> std::process::ExitCode {
    pipewright::cmd::compile::main()
}
