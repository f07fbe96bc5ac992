//! Test binary for the transcription transports.
//!
//! Usage: transcribe-test <audio_file> <api_key> [model] [--realtime]

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use sotto_transcribe::{
    DeltaCallback, RealtimeTranscriber, RequestOptions, Transcriber, UploadStreamingTranscriber,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SOTTO_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <audio_file> <api_key> [model] [--realtime]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} test.wav sk-... gpt-4o-mini-transcribe", args[0]);
        std::process::exit(1);
    }

    let audio_file = Path::new(&args[1]);
    let api_key = &args[2];
    let realtime = args.iter().any(|a| a == "--realtime");

    let mut options = RequestOptions::default();
    if let Some(model) = args.get(3).filter(|a| !a.starts_with("--")) {
        options.model = model.clone();
    }
    println!("Using model: {}", options.model);

    let transcriber: Box<dyn Transcriber> = if realtime {
        Box::new(RealtimeTranscriber::new(Default::default()))
    } else {
        Box::new(UploadStreamingTranscriber::new())
    };
    println!("Transport: {}", transcriber.name());

    let on_delta: DeltaCallback = Arc::new(|preview: &str| {
        println!("  preview: {}", preview);
    });

    println!("Sending transcription request...");
    let start = Instant::now();

    let text = transcriber
        .transcribe(audio_file, &options, api_key, Some(on_delta))
        .await?;
    let elapsed = start.elapsed();

    println!();
    println!("Transcription completed in {:.2}s", elapsed.as_secs_f64());
    println!("---");
    println!("{}", text);
    println!("---");

    Ok(())
}
