//! pw-postprocess - Apply calculations and formatting to result rows.

fn main() -> std::process::ExitCode {
    pipewright::cmd::postprocess::main()
}
