use std::sync::Arc;

use mailflow::{AgentBuilder, Config, GraphModel, RecordingProcessor};

#[tokio::main]
async fn main() {
    let text = include_str!("./workflow.json");

    let model = GraphModel::from_json(text).unwrap();

    let config = Config {
        journal_capacity: 128,
        ..Config::default()
    };
    let processor = Arc::new(RecordingProcessor::new());
    let agent = AgentBuilder::new().config(config).processor(processor.clone()).build_from_model(&model).unwrap();

    println!("{}", agent.graph().schema());

    match agent.execute(serde_json::json!({ "topic": "mail-routed graphs" })).await {
        Ok(result) => println!("Workflow completed: {:#?}", result),
        Err(e) => println!("Workflow failed: {:?}", e),
    }

    println!("Processed: {:?}", processor.processed());
    if let Some(journal) = agent.journal() {
        for mail in journal.drain() {
            println!("{} -> {} [{}] via {}", mail.sender, mail.recipient, mail.category(), mail.request_source());
        }
    }
}
