fn main() {
    if let Err(e) = subbridge::run() {
        eprintln!("subbridge: {e:#}");
        std::process::exit(1);
    }
}
