//! Payload encoding throughput per negotiated encoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use encoding_rs::{Encoding, SHIFT_JIS, UTF_8, WINDOWS_1252};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use player_relay::codec::{TargetSet, WireRecord};
use player_relay::model::{ItemRef, ListPayload};

const ALPHABET: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', ' ', 'é', 'ü', 'ß', 'ñ', 'ø', '-', '音', '楽',
];

fn random_title(rng: &mut StdRng) -> String {
    let len = rng.gen_range(8..40);
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect()
}

fn playlist(len: usize) -> Vec<ItemRef> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..len)
        .map(|i| ItemRef::new(format!("item-{}", i), random_title(&mut rng)))
        .collect()
}

fn bench_playlist_encode(c: &mut Criterion) {
    let items = playlist(500);
    let mut group = c.benchmark_group("playlist_encode");
    let encodings: [&'static Encoding; 3] = [UTF_8, WINDOWS_1252, SHIFT_JIS];
    for encoding in encodings {
        let targets = TargetSet::single(encoding);
        group.bench_with_input(BenchmarkId::from_parameter(encoding.name()), &targets, |b, targets| {
            b.iter(|| {
                let payload = ListPayload::from_items("__playlist__", "Playlist", black_box(&items), 200);
                payload.encode_for(targets)
            })
        });
    }
    group.finish();
}

fn bench_playlist_decode(c: &mut Criterion) {
    let payload = ListPayload::from_items("__playlist__", "Playlist", &playlist(500), 200);
    let bytes = payload.encode_for(&TargetSet::single(UTF_8)).unwrap_or_default();
    c.bench_function("playlist_decode_utf8", |b| b.iter(|| ListPayload::decode(black_box(&bytes))));
}

criterion_group!(benches, bench_playlist_encode, bench_playlist_decode);
criterion_main!(benches);
