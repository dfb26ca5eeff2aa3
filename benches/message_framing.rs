use std::time::{Duration, UNIX_EPOCH};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mailcast::{message::Message, transport::smtp::client::ClientCodec};

fn frame(message: &Message) -> Vec<u8> {
    let formatted = message.formatted_with(
        "news@example.org",
        "reader@example.org",
        UNIX_EPOCH + Duration::from_secs(784_887_151),
        "<bench@example.org>",
    );
    let mut out = Vec::with_capacity(formatted.len() + 8);
    let mut codec = ClientCodec::new();
    codec.encode(&formatted, &mut out);
    codec.finish(&mut out);
    out
}

fn criterion_benchmark(c: &mut Criterion) {
    let short = Message::new("Hello", "<p>Hello World!</p>");
    c.bench_function("frame short message", |b| {
        b.iter(|| frame(black_box(&short)))
    });

    let body = "<p>Spring news</p>\n.dotted line\n".repeat(500);
    let long = Message::new("Grüße aus dem Frühling", body);
    c.bench_function("frame long message", |b| b.iter(|| frame(black_box(&long))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
