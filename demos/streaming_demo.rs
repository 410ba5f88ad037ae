//! Streaming demo: drives the full pipeline from a synthetic token feed.
//!
//! Three messages stream concurrently: plain prose, a markup list, and a
//! fenced code block. One of them arrives out of order on purpose. Run
//! with `RUST_LOG=cascade=debug` to watch the pipeline's internals.

use std::time::{Duration, Instant};

use cascade::{Chunk, MessageId, PipelineConfig, SessionEvent, StreamEngine};

const PROSE: MessageId = MessageId(1);
const LIST: MessageId = MessageId(2);
const CODE: MessageId = MessageId(3);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut engine = StreamEngine::with_config(
        60,
        PipelineConfig {
            flush_size_threshold: 24,
            ..PipelineConfig::default()
        },
    );

    let prose_tokens = [
        "Streaming ", "content ", "arrives ", "in ", "small ", "fragments, ", "and ",
        "the ", "pipeline ", "turns ", "them ", "into ", "measured ", "rows.",
    ];
    let list_tokens = ["# Status\n", "- ingest: ok\n", "- schedule: ok\n", "- render: ok"];
    let code_tokens = ["```rust\n", "fn main() {\n", "    println!(\"hi\");\n", "}\n", "```"];

    // The prose message is delivered out of order: evens first, then odds.
    let mut sequence_plan: Vec<(usize, &str)> = Vec::new();
    for (i, t) in prose_tokens.iter().enumerate().step_by(2) {
        sequence_plan.push((i, t));
    }
    for (i, t) in prose_tokens.iter().enumerate().skip(1).step_by(2) {
        sequence_plan.push((i, t));
    }

    let feeds: Vec<(MessageId, Vec<(u64, String, bool)>)> = vec![
        (
            PROSE,
            sequence_plan
                .iter()
                .map(|(i, t)| {
                    (*i as u64, (*t).to_string(), *i == prose_tokens.len() - 1)
                })
                .collect(),
        ),
        (LIST, numbered(&list_tokens)),
        (CODE, numbered(&code_tokens)),
    ];

    // Interleave the three feeds, pumping between deliveries.
    let mut cursor = 0usize;
    loop {
        let mut delivered = false;
        for (id, tokens) in &feeds {
            if let Some((seq, payload, is_final)) = tokens.get(cursor).cloned() {
                let chunk = if is_final {
                    Chunk::final_chunk(*id, seq, payload)
                } else {
                    Chunk::new(*id, seq, payload)
                };
                if let Err(err) = engine.ingest(chunk) {
                    println!("ingest rejected: {err}");
                }
                delivered = true;
            }
        }
        engine.pump(Instant::now());
        report(&engine);
        if !delivered {
            break;
        }
        cursor += 1;
        std::thread::sleep(Duration::from_millis(30));
    }

    engine.drain_until_idle(Duration::from_secs(5));
    report(&engine);

    let stats = engine.stats();
    println!(
        "\nrenders={} cache_hits={} fallbacks={} avg_cost={}us",
        stats.renders, stats.cache_hits, stats.fallbacks, stats.avg_render_us
    );
}

fn numbered(tokens: &[&str]) -> Vec<(u64, String, bool)> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, t)| ((i as u64), (*t).to_string(), i == tokens.len() - 1))
        .collect()
}

fn report(engine: &StreamEngine) {
    for event in engine.events().try_iter() {
        match event {
            SessionEvent::RenderReady {
                message_id,
                result,
                height,
            } => {
                println!("[{message_id}] rendered {height} rows:");
                for line in &result.lines {
                    println!("[{message_id}] | {}", line.text());
                }
            }
            SessionEvent::HeightChanged { message_id, height } => {
                println!("[{message_id}] height -> {height}");
            }
            SessionEvent::ScrollToBottomRequested { message_id } => {
                println!("[{message_id}] scroll to bottom");
            }
            SessionEvent::RenderFailed { message_id, reason } => {
                println!("[{message_id}] render failed: {reason}");
            }
            SessionEvent::Settled { message_id, height } => {
                println!("[{message_id}] settled at {height} rows");
            }
            SessionEvent::Evicted { message_id } => {
                println!("[{message_id}] evicted");
            }
        }
    }
}
