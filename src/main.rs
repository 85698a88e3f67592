fn main() {
    if let Err(err) = census_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
