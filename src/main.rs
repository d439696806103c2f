fn main() {
    if let Err(err) = hl7conv::cli::run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
