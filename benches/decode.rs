use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use fsg_decoder::acoustic::TableScorer;
use fsg_decoder::config::DecoderConfig;
use fsg_decoder::ctx::CiPhone;
use fsg_decoder::dict::SimpleDictionary;
use fsg_decoder::fsg::SimpleFsg;
use fsg_decoder::hmm::SimpleHmmContext;
use fsg_decoder::Search;

/// A flat one-state-to-final grammar with `n_words` competing single-phone
/// words, each tied to its own senone, plus `n_frames` acoustic frames that
/// favour word 0 throughout. Exercises the full per-frame beam-pruning and
/// propagation path (spec.md §4.2) rather than just HMM evaluation in
/// isolation.
fn build_search(n_words: u16, n_frames: usize) -> Search {
    let mut dict = SimpleDictionary::new();
    let mut fsg = SimpleFsg::new(2, 0, 1);
    for i in 1..=n_words {
        let wid = dict.add_word(&format!("W{i}"), &[CiPhone(i)]);
        fsg.word_add(&format!("W{i}"));
        fsg.add_trans(0, 1, wid, 0);
    }

    let mut config = DecoderConfig::default();
    config.fsgusefiller = false;
    config.fsgusealtpron = false;
    config.beam = -1_000_000;
    config.pbeam = -1_000_000;
    config.wbeam = -1_000_000;

    let ctx = SimpleHmmContext::new(1, vec![-10], vec![], 0);
    let mut senscores = vec![-100_000; (n_words + 1) as usize];
    senscores[1] = -1;
    let frames = vec![senscores; n_frames];

    let mut search = Search::init(config, Box::new(dict), Box::new(ctx), Box::new(TableScorer::new(frames))).unwrap();
    search.add_fsg("g", Box::new(fsg));
    search.select_fsg("g").unwrap();
    search.reinit().unwrap();
    search
}

fn bench_decode_by_vocab_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/vocab_size");
    for &n_words in &[10u16, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n_words), &n_words, |b, &n_words| {
            b.iter(|| {
                let mut search = build_search(n_words, 20);
                search.start().unwrap();
                for _ in 0..20 {
                    search.step().unwrap();
                }
                search.finish();
                search.hyp()
            });
        });
    }
    group.finish();
}

fn bench_decode_by_frame_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/frame_count");
    for &n_frames in &[10usize, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(n_frames), &n_frames, |b, &n_frames| {
            b.iter(|| {
                let mut search = build_search(50, n_frames);
                search.start().unwrap();
                for _ in 0..n_frames {
                    search.step().unwrap();
                }
                search.finish();
                search.lattice().is_some()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode_by_vocab_size, bench_decode_by_frame_count);
criterion_main!(benches);
