//! igr CLI binary

use octofhir_ig_registry::cli;

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();
    // Exit codes:
    // 0 - Success
    // 1 - General error or failed import
    // 3 - Network/registry error
    // 4 - Package not found
    // 5 - Configuration error

    if cli::run().await.is_err() {
        // cli::run() already reported the error and chose the exit code
        std::process::exit(1);
    }
}
