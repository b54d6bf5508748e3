use sstart::SstartError;

#[tokio::main]
async fn main() {
    if let Err(e) = sstart::cli::run_cli().await {
        // Clean cancellation is not an operator error.
        if let Some(SstartError::Cancelled) = e.downcast_ref::<SstartError>() {
            return;
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
