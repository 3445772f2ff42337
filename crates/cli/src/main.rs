use std::process::ExitCode;

fn main() -> ExitCode {
    speck_cli::run()
}
