use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use lanchat_core::codec::{ChatText, Codec, ControlMessage};
use lanchat_core::presence::PresenceTracker;

fn bench_chat_encode(c: &mut Criterion) {
    let codec = Codec::default();
    let chat = ChatText::new("alice", "x".repeat(64));

    c.bench_function("chat_encode_64B", |b| {
        b.iter(|| black_box(codec.encode_chat(black_box(&chat))))
    });
}

fn bench_chat_decode(c: &mut Criterion) {
    let codec = Codec::default();
    let frame = codec.encode_chat(&ChatText::new("alice", "x".repeat(64)));

    c.bench_function("chat_decode_64B", |b| {
        b.iter(|| black_box(codec.decode(black_box(&frame)).unwrap()))
    });
}

fn bench_control_decode(c: &mut Criterion) {
    let codec = Codec::default();
    let frame = codec.encode_control(&ControlMessage::Presence("bob".into()));

    c.bench_function("control_decode", |b| {
        b.iter(|| black_box(codec.decode(black_box(&frame)).unwrap()))
    });
}

fn bench_presence_churn(c: &mut Criterion) {
    let names: Vec<String> = (0..100).map(|i| format!("peer-{i}")).collect();

    c.bench_function("presence_join_leave_100_peers", |b| {
        b.iter(|| {
            let mut tracker = PresenceTracker::new("local");
            for name in &names {
                black_box(tracker.apply(&ControlMessage::Join(name.clone())));
            }
            for name in &names {
                black_box(tracker.apply(&ControlMessage::Leave(name.clone())));
            }
            black_box(tracker.member_count())
        })
    });
}

criterion_group!(
    benches,
    bench_chat_encode,
    bench_chat_decode,
    bench_control_decode,
    bench_presence_churn,
);
criterion_main!(benches);
