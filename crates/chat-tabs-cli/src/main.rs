#![forbid(unsafe_code)]

fn main() {
    std::process::exit(chat_tabs_cli::run());
}
