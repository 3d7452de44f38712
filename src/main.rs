#[tokio::main]
async fn main() {
    if let Err(e) = conductor::cli::run().await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}
