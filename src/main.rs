use clap::Parser;
use image_describer::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = image_describer::run(cli).await;
    std::process::exit(code);
}
