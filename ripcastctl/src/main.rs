use clap::Parser;

fn main() {
    let cli = ripcastctl::Cli::parse();
    if let Err(err) = ripcastctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
