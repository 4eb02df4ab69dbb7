use captcha_reco_core::Vocabulary;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_greedy_decode(c: &mut Criterion) {
    let vocab = Vocabulary::captcha();

    let sequences: Vec<Vec<u32>> = vec![
        vec![0, 11, 11, 0, 12, 0, 4, 4, 0, 13, 0, 0],
        vec![10, 10, 0, 36, 0, 1, 0, 0, 34, 34, 0, 0],
        vec![0; 12],
        vec![5, 5, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7],
    ];

    c.bench_function("decode_prediction_single", |b| {
        b.iter(|| vocab.decode_prediction(black_box(&sequences[0])).unwrap());
    });

    c.bench_function("decode_prediction_batch_4", |b| {
        b.iter(|| {
            for seq in &sequences {
                let _ = vocab.decode_prediction(black_box(seq)).unwrap();
            }
        });
    });

    let target = vocab.encode("AB3C").unwrap();
    c.bench_function("decode_target", |b| {
        b.iter(|| vocab.decode_target(black_box(&target)).unwrap());
    });
}

criterion_group!(benches, bench_greedy_decode);
criterion_main!(benches);
