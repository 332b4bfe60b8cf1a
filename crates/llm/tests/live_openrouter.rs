use llm::Client;

fn init_env() {
    // Load .env from workspace root (two levels up from tests)
    let _ = dotenvy::from_path("../../.env");
}

#[tokio::test]
#[ignore = "needs OPENROUTER_API_KEY and network"]
async fn basic_call() {
    init_env();
    let cli = Client::from_env_openrouter(None).unwrap();
    let out = cli.simple("Say OK.").await.unwrap();
    println!("Response: {}", out);
    assert!(!out.trim().is_empty());
}

#[tokio::test]
#[ignore = "needs OPENROUTER_API_KEY and network"]
async fn conversation_extraction() {
    init_env();
    let cli = Client::from_env_openrouter(None).unwrap();
    let out = cli
        .extract_conversation_symptoms("What brings you in today?", "I've had a throbbing headache for three days.")
        .await
        .unwrap();
    println!("Symptoms: {:?}", out.symptoms);
    assert!(!out.symptoms.is_empty());
}
