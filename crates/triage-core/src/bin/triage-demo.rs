use protocol::{Symptom, UrgencyLevel};
use triage_core::{mocks::ScriptedBackend, TriageSessionController};

#[tokio::main]
async fn main() {
    // Wire a scripted backend
    let backend = ScriptedBackend::new()
        .with_session("demo", "Hello! What brings you in today?")
        .with_reply("How long have you had the headache?", false)
        .with_reply("Thank you, I have enough information.", true)
        .with_triage(
            "demo",
            UrgencyLevel::Routine,
            vec![Symptom {
                name: "headache".into(),
                duration: Some("2 days".into()),
                severity: Some("mild".into()),
                additional_context: None,
            }],
        );
    let controller = TriageSessionController::in_memory(backend);

    // User turns come from args or defaults
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let turns = if args.is_empty() {
        vec!["I have a headache".to_string(), "2 days, mild".to_string()]
    } else {
        args
    };

    println!("{:?}", controller.start_session().await);
    for turn in &turns {
        println!("{:?}", controller.send_message(turn).await);
    }

    for line in controller.numbered_transcript() {
        println!("{}", line);
    }
    let s = serde_json::to_string_pretty(&controller.snapshot()).unwrap_or_default();
    println!("{}", s);
}
