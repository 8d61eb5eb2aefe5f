use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kotoba_ai::{parse_conversation, parse_sentence_analysis, parse_word_enrichment};

const WORD: &str = r#"{"translation":"遍在する","partOfSpeech":"adjective","examples":[{"english":"Smartphones are ubiquitous.","japanese":"スマートフォンは遍在する。"}]}"#;

const ANALYSIS: &str = r#"{"translation":"土砂降りだ。","idioms":[{"idiom":"raining cats and dogs","meaning":"土砂降り"}],"grammars":[{"pattern":"be + -ing","explanation":"現在進行形","level":"BEGINNER"}]}"#;

const CONVERSATION: &str = r#"{"description":"Two friends.","speakers":[{"id":"A","name":"Alice"},{"id":"B","name":"Bob"}],"lines":[{"speaker":"A","english":"Hi!","japanese":"やあ！"},{"speaker":"B","english":"Hello.","japanese":"こんにちは。"}]}"#;

fn bench_word(c: &mut Criterion) {
    let mut group = c.benchmark_group("word_enrichment");
    group.bench_function("strict", |b| {
        b.iter(|| parse_word_enrichment(black_box(WORD)))
    });
    let wrapped = format!("Sure, here it is:\n{WORD}\nAnything else?");
    group.bench_function("extracted", |b| {
        b.iter(|| parse_word_enrichment(black_box(&wrapped)))
    });
    group.finish();
}

fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_analysis");
    group.bench_function("strict", |b| {
        b.iter(|| parse_sentence_analysis(black_box(ANALYSIS)))
    });
    let broken = ANALYSIS.replace("]}", ",]}").replace('"', "'");
    group.bench_function("repaired", |b| {
        b.iter(|| parse_sentence_analysis(black_box(&broken)))
    });
    group.bench_function("unreadable", |b| {
        b.iter(|| parse_sentence_analysis(black_box("The sentence contains no idioms.")))
    });
    group.finish();
}

fn bench_conversation(c: &mut Criterion) {
    c.bench_function("conversation/strict", |b| {
        b.iter(|| parse_conversation(black_box(CONVERSATION)))
    });
}

criterion_group!(benches, bench_word, bench_analysis, bench_conversation);
criterion_main!(benches);
