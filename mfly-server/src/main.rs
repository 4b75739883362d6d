//! Binary entrypoint for `mfly-server`.

mod app;
mod cli;
mod dispatch;
mod session;

fn main() {
    if let Err(error) = app::run() {
        eprintln!("failed to start mfly-server: {error}");
        std::process::exit(1);
    }
}
