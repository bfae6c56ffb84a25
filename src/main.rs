fn main() -> std::process::ExitCode {
    kvload::cmdline()
}
