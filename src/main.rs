fn main() {
    if let Err(err) = flowchart_layout::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
