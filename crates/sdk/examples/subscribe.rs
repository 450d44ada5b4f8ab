//! Subscribe to a resource and print what the server pushes.
//!
//! Answers the server's sampling requests with a canned reply, the way a
//! real client would hand them to a model.
//!
//! Run with: cargo run --example subscribe -- [endpoint] [resource-uri]

use everything_sdk::{
    ClientResult, CreateMessageParams, CreateMessageResult, JsonRpcMessage, LoggingLevel,
    McpClient, Role, SamplingContent,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> ClientResult<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:3001/mcp".to_string());
    let uri = args
        .next()
        .unwrap_or_else(|| "test://static/resource/1".to_string());

    let client = McpClient::builder()
        .endpoint(endpoint)
        .timeout(Duration::from_secs(10))
        .client_info("subscribe-example", env!("CARGO_PKG_VERSION"))
        .build()?;

    let init = client.initialize().await?;
    println!(
        "Connected to {} (protocol {})",
        init.server_info.name, init.protocol_version
    );

    // Open the stream first so the sampling request has somewhere to go
    let mut events = client.events().await?;
    client.set_logging_level(LoggingLevel::Notice).await?;

    let subscriber = client.clone();
    let subscribe_uri = uri.clone();
    let subscribe = tokio::spawn(async move { subscriber.subscribe(subscribe_uri).await });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next_event() => {
                let Some(event) = event else {
                    println!("Server closed the stream");
                    break;
                };
                match event? {
                    JsonRpcMessage::Notification(n) => {
                        println!("{} {}", n.method, n.params.unwrap_or_default());
                    }
                    JsonRpcMessage::Request(request) => {
                        let id = request.id.clone().unwrap_or_default();
                        let params: CreateMessageParams =
                            serde_json::from_value(request.params.unwrap_or_default())?;
                        println!("Sampling request with {} message(s)", params.messages.len());

                        client
                            .respond(
                                id,
                                CreateMessageResult {
                                    role: Role::Assistant,
                                    content: SamplingContent::text("Noted."),
                                    model: "subscribe-example".to_string(),
                                    stop_reason: Some("endTurn".to_string()),
                                },
                            )
                            .await?;
                    }
                    JsonRpcMessage::Response(_) => {}
                }
            }
        }
    }

    if let Ok(result) = subscribe.await {
        result?;
    }
    client.unsubscribe(uri).await?;
    client.close().await
}
