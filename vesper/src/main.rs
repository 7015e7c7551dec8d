mod application;

mod presentation {
    pub mod cli;
}

fn main() {
    if let Err(e) = application::run() {
        eprintln!("vesper: {e}");
        std::process::exit(1);
    }
}
