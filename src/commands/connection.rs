use crate::ai::DescriptionProvider;
use crate::error::{Result, EXIT_FAILURE, EXIT_OK};

pub async fn test_connection(provider: &dyn DescriptionProvider, endpoint: &str) -> i32 {
    if provider.probe().await {
        println!("Connected to the model service at {}", endpoint);
        EXIT_OK
    } else {
        eprintln!("Cannot reach the model service at {}", endpoint);
        EXIT_FAILURE
    }
}

pub async fn list_models(provider: &dyn DescriptionProvider) -> Result<i32> {
    let models = provider.list_models().await?;
    if models.is_empty() {
        println!("No models installed");
        return Ok(EXIT_OK);
    }

    println!("{:<40} {:>10}  MODIFIED", "NAME", "SIZE");
    for model in &models {
        println!(
            "{:<40} {:>10}  {}",
            model.name,
            model.size_label(),
            model.modified_at.as_deref().unwrap_or("-")
        );
    }
    Ok(EXIT_OK)
}
