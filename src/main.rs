use std::process;

#[tokio::main]
async fn main() {
    match plank::cli::run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
